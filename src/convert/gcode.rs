//! # Toolpath Metadata
//!
//! Reads print estimates out of slicer comments and prepares a toolpath for
//! V3 firmware.
//!
//! Recognised comments (case-insensitive, `:` or `=`):
//!
//! | Comment | Meaning |
//! |---------|---------|
//! | `;TIME:1234` | print time, seconds |
//! | `; estimated printing time = 1h 2m 3s` | print time |
//! | `;Filament used: 1.2m` or `;MATERIAL:1200` | filament, m or mm |
//! | `;LAYER_COUNT:42` | layers |
//! | `;LAYER:7` | one layer (counted when no total is given) |
//!
//! Without a time comment the estimate is one second per ten moves, at least
//! a minute. Without a filament comment the largest `E` value is used, or one
//! metre.

use serde::Serialize;

/// Lines searched for an existing metadata block.
const METADATA_SCAN_LINES: usize = 50;

const MIN_PRINT_TIME_S: u32 = 60;
const DEFAULT_FILAMENT_MM: f64 = 1000.0;

/// Estimates extracted from a toolpath.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PrintInfo {
    pub print_time_s: u32,
    pub filament_mm: f64,
    pub layer_count: u32,
}

/// Extract print estimates from slicer comments, with fallbacks.
pub fn extract_print_info(toolpath: &[u8]) -> PrintInfo {
    let text = String::from_utf8_lossy(toolpath);
    let mut print_time_s = 0u32;
    let mut filament_mm = 0.0f64;
    let mut layer_total: Option<u32> = None;
    let mut layer_marks = 0u32;
    let mut moves = 0u32;
    let mut max_e = 0.0f64;

    for line in text.lines() {
        let line = line.trim();
        if let Some(comment) = line.strip_prefix(';') {
            let comment = comment.trim_start();
            if let Some(value) = keyed(comment, &["time"]) {
                if let Ok(secs) = value.parse() {
                    print_time_s = secs;
                }
            } else if comment.to_ascii_lowercase().starts_with("estimated printing time") {
                if let Some((_, value)) = comment.split_once('=') {
                    print_time_s = parse_duration(value);
                }
            } else if let Some(value) = keyed(comment, &["filament used", "material"]) {
                if let Some(mm) = parse_length_mm(value) {
                    filament_mm = mm;
                }
            } else if let Some(value) = keyed(comment, &["layer_count", "layer count"]) {
                layer_total = value.parse().ok();
            } else if keyed(comment, &["layer"]).is_some_and(|v| v.parse::<u32>().is_ok()) {
                layer_marks += 1;
            }
            continue;
        }

        let code = line.split(';').next().unwrap_or("");
        if is_move(code) {
            moves += 1;
        }
        if let Some(e) = e_value(code) {
            max_e = max_e.max(e);
        }
    }

    if print_time_s == 0 {
        print_time_s = (moves / 10).max(MIN_PRINT_TIME_S);
    }
    if filament_mm <= 0.0 {
        filament_mm = if max_e > 0.0 { max_e } else { DEFAULT_FILAMENT_MM };
    }

    PrintInfo {
        print_time_s,
        filament_mm,
        layer_count: layer_total.unwrap_or(layer_marks),
    }
}

/// Parameters written into the metadata block.
#[derive(Debug, Clone, PartialEq)]
pub struct Preparation<'a> {
    pub model_id: &'a str,
    pub info: PrintInfo,
    pub layer_height_mm: f32,
}

/// Rewrite a toolpath for V3 firmware.
///
/// `G0` moves become `G1`, lines are trimmed, and a `; machine = …` metadata
/// block is prepended unless one already appears near the top.
pub fn prepare(toolpath: &[u8], params: &Preparation<'_>) -> Vec<u8> {
    let text = String::from_utf8_lossy(toolpath);
    let has_metadata = text
        .lines()
        .take(METADATA_SCAN_LINES)
        .any(|l| l.to_ascii_lowercase().contains("; machine"));

    let mut out = String::with_capacity(text.len() + 256);
    if !has_metadata {
        out.push_str(&format!("; machine = {}\n", params.model_id));
        out.push_str(&format!("; print_time = {}\n", params.info.print_time_s));
        out.push_str(&format!("; total_filament = {:.1}\n", params.info.filament_mm));
        out.push_str("; nozzle_diameter = 0.4\n");
        out.push_str(&format!("; layer_height = {}\n", params.layer_height_mm));
        out.push_str("; filament_diameter = 1.75\n");
        out.push_str("; filament_type = PLA\n");
        out.push('\n');
    }
    for line in text.lines() {
        let line = line.trim();
        if line == "G0" {
            out.push_str("G1");
        } else if let Some(rest) = line.strip_prefix("G0 ").or_else(|| line.strip_prefix("G0\t")) {
            out.push_str("G1 ");
            out.push_str(rest);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out.into_bytes()
}

/// Value of a `key: value` / `key = value` comment, if `comment` starts with
/// one of `keys`.
fn keyed<'a>(comment: &'a str, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        let Some(head) = comment.get(..key.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(key) {
            continue;
        }
        let rest = comment[key.len()..].trim_start();
        if let Some(value) = rest.strip_prefix(':').or_else(|| rest.strip_prefix('=')) {
            return Some(value.trim());
        }
    }
    None
}

/// `1h 2m 3s` → 3723. Units may also run together (`1h2m`).
fn parse_duration(text: &str) -> u32 {
    let mut total = 0u32;
    let mut number = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        if !number.is_empty() {
            let n: u32 = number.parse().unwrap_or(0);
            let scale = match c.to_ascii_lowercase() {
                'd' => 86_400,
                'h' => 3600,
                'm' => 60,
                's' => 1,
                _ => 0,
            };
            total = total.saturating_add(n.saturating_mul(scale));
            if !c.is_whitespace() {
                number.clear();
            }
        }
    }
    total
}

/// `1.5m` → 1500, `1500mm` / `1500` → 1500.
fn parse_length_mm(text: &str) -> Option<f64> {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let value: f64 = text[..end].parse().ok()?;
    let unit = text[end..].trim_start().to_ascii_lowercase();
    if unit.starts_with("mm") || !unit.starts_with('m') {
        Some(value)
    } else {
        Some(value * 1000.0)
    }
}

fn is_move(code: &str) -> bool {
    code.starts_with("G0 ") || code.starts_with("G1 ")
}

fn e_value(code: &str) -> Option<f64> {
    code.split_whitespace()
        .find_map(|word| word.strip_prefix('E'))
        .and_then(|v| v.parse().ok())
}
