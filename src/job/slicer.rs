//! # External Slicer
//!
//! Geometry is sliced by an external engine run as a batch process. The
//! engine is optional: when it is missing, jobs that start from geometry fail
//! with [`SlicerError::Unavailable`] and toolpath jobs are unaffected.
//!
//! [`CuraEngine`] looks for the binary in [`SlicerConfig::engine_dir`] first,
//! then on `PATH`, and for `definitions/fdmprinter.def.json` in the engine
//! directory.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::Quality;
use crate::config::SlicerConfig;
use crate::error::SlicerError;
use crate::printer::PrinterModel;

/// How often a running engine is checked for exit.
const WAIT_STEP: Duration = Duration::from_millis(100);

/// Trailing stderr kept for error messages.
const STDERR_TAIL: usize = 500;

const ENGINE_NAMES: &[&str] = &["CuraEngine", "CuraEngine.exe", "curaengine", "curaengine.exe"];

/// Turns a geometry file into a toolpath file.
pub trait Slicer: Send + Sync {
    /// Slice `geometry` for `model` and return the path of the toolpath written.
    fn slice(
        &self,
        geometry: &Path,
        model: &PrinterModel,
        quality: Quality,
    ) -> Result<PathBuf, SlicerError>;
}

/// CuraEngine driven from the command line.
#[derive(Debug, Clone)]
pub struct CuraEngine {
    config: SlicerConfig,
}

impl CuraEngine {
    pub fn new(config: SlicerConfig) -> Self {
        Self { config }
    }

    /// Whether both the binary and the machine definition can be found.
    pub fn is_available(&self) -> bool {
        self.executable().is_ok() && self.definition().is_ok()
    }

    fn executable(&self) -> Result<PathBuf, SlicerError> {
        let local = ENGINE_NAMES
            .iter()
            .map(|name| self.config.engine_dir.join(name))
            .find(|p| p.is_file());
        if let Some(path) = local {
            return Ok(path);
        }
        let path_var = std::env::var_os("PATH").unwrap_or_default();
        std::env::split_paths(&path_var)
            .flat_map(|dir| ENGINE_NAMES.iter().map(move |name| dir.join(name)))
            .find(|p| p.is_file())
            .ok_or_else(|| {
                SlicerError::Unavailable(format!(
                    "no CuraEngine in {} or on PATH",
                    self.config.engine_dir.display()
                ))
            })
    }

    fn definition(&self) -> Result<PathBuf, SlicerError> {
        let path = self
            .config
            .engine_dir
            .join("definitions")
            .join("fdmprinter.def.json");
        if path.is_file() {
            Ok(path)
        } else {
            Err(SlicerError::Unavailable(format!(
                "machine definition {} not found",
                path.display()
            )))
        }
    }

    fn output_path(&self, geometry: &Path) -> PathBuf {
        let stem = geometry
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        self.config.output_dir.join(format!("{stem}.gcode"))
    }
}

/// `-s key=value` settings for a model and quality preset.
pub fn settings(model: &PrinterModel, quality: Quality) -> Vec<(&'static str, String)> {
    vec![
        ("machine_width", model.width_mm.to_string()),
        ("machine_depth", model.depth_mm.to_string()),
        ("machine_height", model.height_mm.to_string()),
        ("machine_heated_bed", model.heated_bed.to_string()),
        ("machine_nozzle_size", "0.4".to_string()),
        ("material_diameter", "1.75".to_string()),
        ("material_print_temperature", "210".to_string()),
        ("retraction_enable", "true".to_string()),
        ("retraction_amount", "4.5".to_string()),
        ("retraction_speed", "25".to_string()),
        ("speed_travel", "60".to_string()),
        ("adhesion_type", "skirt".to_string()),
        ("support_enable", "false".to_string()),
        ("layer_height", quality.layer_height_mm().to_string()),
        ("speed_print", quality.print_speed_mm_s().to_string()),
        ("infill_sparse_density", quality.infill_percent().to_string()),
    ]
}

impl Slicer for CuraEngine {
    fn slice(
        &self,
        geometry: &Path,
        model: &PrinterModel,
        quality: Quality,
    ) -> Result<PathBuf, SlicerError> {
        let exe = self.executable()?;
        let definition = self.definition()?;
        let output = self.output_path(geometry);

        let mut args: Vec<OsString> = vec!["slice".into(), "-v".into(), "-j".into(), definition.into()];
        for (key, value) in settings(model, quality) {
            args.push("-s".into());
            args.push(format!("{key}={value}").into());
        }
        args.push("-o".into());
        args.push(output.clone().into());
        args.push("-l".into());
        args.push(geometry.into());

        info!(engine = %exe.display(), geometry = %geometry.display(), ?quality, "slicing");
        let mut child = Command::new(&exe)
            .args(&args)
            .current_dir(&self.config.engine_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SlicerError::Unavailable(format!("cannot run {}: {e}", exe.display())))?;

        // Drain stderr on its own thread so a chatty engine cannot block on a full pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        let deadline = Instant::now() + self.config.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                warn!(timeout = ?self.config.timeout, "slicer timed out");
                let _ = child.kill();
                let _ = child.wait();
                return Err(SlicerError::Timeout(self.config.timeout));
            }
            std::thread::sleep(WAIT_STEP);
        };
        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default();

        if !status.success() {
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let start = (start..stderr.len())
                .find(|&i| stderr.is_char_boundary(i))
                .unwrap_or(stderr.len());
            return Err(SlicerError::Failed {
                status: status.to_string(),
                stderr: stderr[start..].trim().to_string(),
            });
        }
        if !output.is_file() {
            return Err(SlicerError::NoOutput(output.display().to_string()));
        }
        debug!(output = %output.display(), "slicer finished");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::models;

    fn missing_engine() -> CuraEngine {
        CuraEngine::new(SlicerConfig {
            engine_dir: PathBuf::from("/nonexistent/vinci-engine"),
            output_dir: std::env::temp_dir(),
            timeout: Duration::from_secs(1),
        })
    }

    #[test]
    fn test_missing_definition_is_unavailable() {
        let engine = missing_engine();
        assert!(!engine.is_available());
        let model = models::lookup("dv1MX0A000").unwrap();
        let err = engine
            .slice(Path::new("part.stl"), model, Quality::Normal)
            .unwrap_err();
        assert!(matches!(err, SlicerError::Unavailable(_)));
    }

    #[test]
    fn test_settings_follow_model_and_quality() {
        let model = models::lookup("dv1PA0A000").unwrap();
        let settings = settings(model, Quality::Fine);
        let get = |key: &str| {
            settings
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("machine_width"), "200");
        assert_eq!(get("machine_heated_bed"), "true");
        assert_eq!(get("layer_height"), "0.1");
        assert_eq!(get("speed_print"), "25");
    }

    #[test]
    fn test_output_named_after_geometry() {
        let engine = missing_engine();
        let out = engine.output_path(Path::new("/tmp/uploads/bracket.stl"));
        assert_eq!(out.file_name().unwrap(), "bracket.gcode");
    }
}
