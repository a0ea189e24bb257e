//! # Status Telemetry
//!
//! Parsing of the `query=a` reply into a [`StatusSnapshot`].
//!
//! The reply is a series of `k:value` segments. Several segments may share a
//! line, joined by `.`; since firmware versions contain dots too, a dot only
//! separates segments when it is followed by `<letter>:`.
//!
//! ```text
//! j:9511,11
//! t:1,205,0,210
//! n:dv1MX0A000.s:3FM1XPUS5CA68P0044.v:1.3.5
//! d:42,18,25
//! ```

use serde::Serialize;
use tracing::debug;

use crate::error::ProtocolError;
use crate::printer::{StateClass, states};

/// # Status Snapshot
///
/// Immutable point-in-time printer telemetry. Optional fields absent from a
/// reply keep their default value; the state code is always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Firmware state code (`j:` first field)
    pub state_code: u32,
    pub sub_state: u32,
    /// Temperatures in °C
    pub extruder_temp: i32,
    pub extruder_target: i32,
    pub bed_temp: i32,
    /// Print progress, 0-100
    pub print_percent: u32,
    pub elapsed_min: u32,
    pub remaining_min: u32,
    /// Firmware error code; `None` when the printer reports no error
    pub error_code: Option<u32>,
    pub filament_remaining_mm: u32,
    pub model_id: String,
    pub serial_number: String,
    pub firmware_version: String,
    /// Z offset in 1/100 mm
    pub z_offset: i32,
    pub auto_level: bool,
}

/// Status keys this parser understands.
const KEYS: &[char] = &['j', 't', 'n', 's', 'v', 'e', 'd', 'f', 'o', 'l'];

impl StatusSnapshot {
    /// Display name of the state code.
    pub fn state_name(&self) -> String {
        states::name_of(self.state_code)
    }

    /// Classification of the state code.
    pub fn state_class(&self) -> StateClass {
        states::class_of(self.state_code)
    }

    /// Whether the printer will accept a new job.
    pub fn is_idle(&self) -> bool {
        states::is_idle(self.state_code)
    }

    /// Parse a reply body.
    ///
    /// A body with no recognised segment is not telemetry and yields
    /// `UnknownCommand`. Telemetry without a `j:` segment, or with a
    /// recognised segment that does not parse, is rejected as `Desync`;
    /// a partly read snapshot is never returned.
    pub(crate) fn parse(body: &str) -> Result<Self, ProtocolError> {
        let mut status = StatusSnapshot::default();
        let mut recognised = 0usize;
        let mut has_state = false;
        let mut first_unknown = None;

        for line in body.lines() {
            for segment in split_segments(line.trim()) {
                let Some((key, value)) = split_key(segment) else {
                    continue;
                };
                if !KEYS.contains(&key) {
                    debug!(key = %key, "skipping unknown status field");
                    first_unknown.get_or_insert_with(|| segment.trim().to_string());
                    continue;
                }
                recognised += 1;
                has_state |= key == 'j';
                status.apply(key, value).map_err(|e| {
                    ProtocolError::Desync(format!("status field {:?}: {}", segment.trim(), e))
                })?;
            }
        }

        if recognised == 0 {
            return Err(ProtocolError::UnknownCommand(first_unknown.unwrap_or_else(|| {
                body.trim().lines().next().unwrap_or("").to_string()
            })));
        }
        if !has_state {
            return Err(ProtocolError::Desync(
                "status reply without a j: state field".to_string(),
            ));
        }
        Ok(status)
    }

    fn apply(&mut self, key: char, value: &str) -> Result<(), std::num::ParseIntError> {
        let fields: Vec<&str> = value.split(',').map(str::trim).collect();
        let field = |i: usize| fields.get(i).copied().filter(|f| !f.is_empty());

        match key {
            'j' => {
                self.state_code = fields[0].parse()?;
                if let Some(sub) = field(1) {
                    self.sub_state = sub.parse()?;
                }
            }
            't' => {
                if let Some(v) = field(1) {
                    self.extruder_temp = v.parse()?;
                }
                if let Some(v) = field(2) {
                    self.bed_temp = v.parse()?;
                }
                if let Some(v) = field(3) {
                    self.extruder_target = v.parse()?;
                }
            }
            'n' => self.model_id = value.trim().to_string(),
            's' => self.serial_number = value.trim().to_string(),
            'v' => self.firmware_version = value.trim().to_string(),
            'e' => {
                let code: u32 = fields[0].parse()?;
                self.error_code = (code != 0).then_some(code);
            }
            'd' => {
                if let Some(v) = field(0) {
                    self.print_percent = v.parse::<u32>()?.min(100);
                }
                if let Some(v) = field(1) {
                    self.elapsed_min = v.parse()?;
                }
                if let Some(v) = field(2) {
                    self.remaining_min = v.parse()?;
                }
            }
            'f' => self.filament_remaining_mm = fields[0].parse()?,
            'o' => self.z_offset = fields[0].parse()?,
            'l' => self.auto_level = value.trim() == "1",
            _ => {}
        }
        Ok(())
    }

    /// Render as a reply body in the firmware's format.
    pub fn to_reply_body(&self) -> String {
        let mut body = format!(
            "j:{},{}\nt:1,{},{},{}\nd:{},{},{}\ne:{}\nf:{}\no:{}\nl:{}\n",
            self.state_code,
            self.sub_state,
            self.extruder_temp,
            self.bed_temp,
            self.extruder_target,
            self.print_percent,
            self.elapsed_min,
            self.remaining_min,
            self.error_code.unwrap_or(0),
            self.filament_remaining_mm,
            self.z_offset,
            u8::from(self.auto_level),
        );
        if !self.model_id.is_empty() {
            body.push_str(&format!("n:{}\n", self.model_id));
        }
        if !self.serial_number.is_empty() {
            body.push_str(&format!("s:{}\n", self.serial_number));
        }
        if !self.firmware_version.is_empty() {
            body.push_str(&format!("v:{}\n", self.firmware_version));
        }
        body
    }
}

/// Split a line on `.` where the dot is followed by `<letter>:`.
fn split_segments(line: &str) -> Vec<&str> {
    let bytes = line.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    for i in 0..bytes.len() {
        if bytes[i] == b'.'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_alphabetic()
            && bytes[i + 2] == b':'
        {
            segments.push(&line[start..i]);
            start = i + 1;
        }
    }
    segments.push(&line[start..]);
    segments
}

fn split_key(segment: &str) -> Option<(char, &str)> {
    let segment = segment.trim();
    let bytes = segment.as_bytes();
    if bytes.len() < 2 || bytes[1] != b':' || !bytes[0].is_ascii_alphabetic() {
        return None;
    }
    Some((bytes[0] as char, &segment[2..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "j:9511,11\nt:1,205,0,210\nn:dv1MX0A000.s:SN123456.v:1.3.5\nd:42,18,25\ne:0\nf:12000\no:15\nl:1";

    #[test]
    fn test_parse_sample() {
        let status = StatusSnapshot::parse(SAMPLE).unwrap();
        assert_eq!(status.state_code, 9511);
        assert_eq!(status.sub_state, 11);
        assert_eq!(status.extruder_temp, 205);
        assert_eq!(status.bed_temp, 0);
        assert_eq!(status.extruder_target, 210);
        assert_eq!(status.model_id, "dv1MX0A000");
        assert_eq!(status.serial_number, "SN123456");
        assert_eq!(status.firmware_version, "1.3.5");
        assert_eq!(status.print_percent, 42);
        assert_eq!(status.elapsed_min, 18);
        assert_eq!(status.remaining_min, 25);
        assert_eq!(status.error_code, None);
        assert_eq!(status.filament_remaining_mm, 12000);
        assert_eq!(status.z_offset, 15);
        assert!(status.auto_level);
        assert!(status.is_idle());
    }

    #[test]
    fn test_firmware_dots_are_not_separators() {
        assert_eq!(split_segments("v:1.3.5.n:x"), vec!["v:1.3.5", "n:x"]);
        assert_eq!(split_segments("v:1.3.5"), vec!["v:1.3.5"]);
    }

    #[test]
    fn test_bad_field_rejects_reply() {
        assert!(matches!(
            StatusSnapshot::parse("j:9O02,0\nt:1,205,0,210"),
            Err(ProtocolError::Desync(_))
        ));
        assert!(matches!(
            StatusSnapshot::parse("j:9002,0\nt:1,2x5,0,210"),
            Err(ProtocolError::Desync(_))
        ));
    }

    #[test]
    fn test_missing_state_rejects_reply() {
        assert!(matches!(
            StatusSnapshot::parse("t:1,205,0,210\nd:42,18,25"),
            Err(ProtocolError::Desync(_))
        ));
    }

    #[test]
    fn test_error_code() {
        let status = StatusSnapshot::parse("j:9060,0\ne:17").unwrap();
        assert_eq!(status.error_code, Some(17));
        assert_eq!(status.state_name(), "Error");
    }

    #[test]
    fn test_nothing_recognised() {
        assert!(matches!(
            StatusSnapshot::parse("hello"),
            Err(ProtocolError::UnknownCommand(ref s)) if s == "hello"
        ));
        assert!(matches!(
            StatusSnapshot::parse("z:1"),
            Err(ProtocolError::UnknownCommand(ref s)) if s == "z:1"
        ));
    }

    #[test]
    fn test_reply_body_parses_back() {
        let status = StatusSnapshot::parse(SAMPLE).unwrap();
        let again = StatusSnapshot::parse(&status.to_reply_body()).unwrap();
        assert_eq!(again, status);
    }
}
