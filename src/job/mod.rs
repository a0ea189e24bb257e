//! # Job Controller
//!
//! Runs one print end to end:
//!
//! ```text
//! geometry ──slicer──▶ toolpath ──prepare──▶ convert ──▶ upload ──▶ start print
//! ```
//!
//! A job refuses to start unless the session is connected and the printer
//! reports an idle state; that check happens before any frame is sent. The
//! session is occupied for the whole upload. Nothing is kept between jobs.
//!
//! Progress is reported through a callback as a stage plus an overall
//! percentage, so a UI can show "uploading 62%".

pub mod slicer;

pub use slicer::{CuraEngine, Slicer};

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::convert::{self, ConversionProfile, PrintInfo, gcode};
use crate::error::{PreconditionError, VinciError};
use crate::protocol::commands::Command;
use crate::session::{BusyKind, Session, SessionState};
use crate::upload::{self, UploadOutcome, UploadReport};

/// Slicing quality preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Fine,
    #[default]
    Normal,
    Draft,
}

impl Quality {
    pub fn layer_height_mm(self) -> f32 {
        match self {
            Quality::Fine => 0.1,
            Quality::Normal => 0.2,
            Quality::Draft => 0.3,
        }
    }

    pub fn print_speed_mm_s(self) -> u32 {
        match self {
            Quality::Fine => 25,
            Quality::Normal => 30,
            Quality::Draft => 40,
        }
    }

    pub fn infill_percent(self) -> u32 {
        match self {
            Quality::Fine | Quality::Normal => 20,
            Quality::Draft => 15,
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fine" => Ok(Quality::Fine),
            "normal" => Ok(Quality::Normal),
            "draft" => Ok(Quality::Draft),
            other => Err(format!("unknown quality {other:?} (fine, normal, draft)")),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quality::Fine => "fine",
            Quality::Normal => "normal",
            Quality::Draft => "draft",
        };
        f.write_str(name)
    }
}

/// Where a job is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Slicing,
    Converting,
    Uploading,
    Starting,
    Done,
    Cancelled,
    Failed,
}

/// One progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub stage: JobStage,
    /// Overall progress, 0 to 100.
    pub percent: u8,
    pub message: String,
}

impl JobProgress {
    pub fn new(stage: JobStage, percent: u8, message: impl Into<String>) -> Self {
        Self {
            stage,
            percent: percent.min(100),
            message: message.into(),
        }
    }
}

/// A job that reached the printer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub name: String,
    pub model_id: String,
    pub info: PrintInfo,
    pub container_bytes: usize,
    pub upload: UploadReport,
}

/// How a job ended, short of an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "report", rename_all = "lowercase")]
pub enum JobResult {
    /// Uploaded and the print was started.
    Started(JobReport),
    /// The upload was cancelled; nothing was started.
    Cancelled(UploadReport),
}

const UPLOAD_FROM: u8 = 30;
const UPLOAD_SPAN: u8 = 65;

/// Check that `session` can take a job, and select the conversion profile.
///
/// Sends nothing.
pub fn check_ready(session: &Session) -> Result<ConversionProfile, VinciError> {
    match session.state() {
        SessionState::Connected => {}
        SessionState::Disconnected => return Err(PreconditionError::NotConnected.into()),
        SessionState::Busy(BusyKind::Uploading) => return Err(PreconditionError::JobActive.into()),
        state => {
            let status = session.status();
            return Err(if matches!(state, SessionState::Busy(_)) {
                PreconditionError::NotIdle {
                    code: status.state_code,
                    name: status.state_name(),
                }
            } else {
                PreconditionError::InvalidState {
                    operation: "print",
                    state: state.to_string(),
                }
            }
            .into());
        }
    }
    let status = session.status();
    if !status.is_idle() {
        return Err(PreconditionError::NotIdle {
            code: status.state_code,
            name: status.state_name(),
        }
        .into());
    }
    Ok(ConversionProfile::for_model(session.model_id())?)
}

/// Print a toolpath file.
pub fn run_print_from_toolpath(
    session: &Session,
    path: &Path,
    mut progress: impl FnMut(JobProgress),
) -> Result<JobResult, VinciError> {
    check_ready(session)?;
    let toolpath = std::fs::read(path)?;
    let name = upload_name(path);
    print_toolpath(session, &name, &toolpath, Quality::default(), &mut progress)
}

/// Slice a geometry file with `slicer`, then print the result.
pub fn run_print_from_geometry(
    session: &Session,
    path: &Path,
    quality: Quality,
    slicer: &dyn Slicer,
    mut progress: impl FnMut(JobProgress),
) -> Result<JobResult, VinciError> {
    let profile = check_ready(session)?;
    progress(JobProgress::new(JobStage::Slicing, 0, "slicing geometry"));
    let sliced = slicer.slice(path, profile.model, quality)?;
    let toolpath = std::fs::read(&sliced)?;
    info!(lines = toolpath.iter().filter(|&&b| b == b'\n').count(), "sliced");
    let result = print_toolpath(session, &upload_name(path), &toolpath, quality, &mut progress);
    if let Err(e) = std::fs::remove_file(&sliced) {
        debug!(path = %sliced.display(), error = %e, "could not remove sliced toolpath");
    }
    result
}

/// Convert, upload and start a toolpath already in memory.
pub fn print_toolpath(
    session: &Session,
    name: &str,
    toolpath: &[u8],
    quality: Quality,
    progress: &mut dyn FnMut(JobProgress),
) -> Result<JobResult, VinciError> {
    let profile = check_ready(session)?;

    progress(JobProgress::new(JobStage::Converting, 10, "converting toolpath"));
    let info = gcode::extract_print_info(toolpath);
    let prepared = gcode::prepare(
        toolpath,
        &gcode::Preparation {
            model_id: profile.model_id(),
            info,
            layer_height_mm: quality.layer_height_mm(),
        },
    );
    let container = convert::convert(&prepared, &profile)?;
    info!(
        name,
        bytes = container.len(),
        print_time_s = info.print_time_s,
        filament_mm = info.filament_mm,
        "converted"
    );

    progress(JobProgress::new(JobStage::Uploading, UPLOAD_FROM, "uploading"));
    let outcome = upload::upload(session, name, container.as_bytes(), |done, total| {
        let pct = if total == 0 { 100 } else { done * 100 / total };
        let overall = UPLOAD_FROM as usize + pct * UPLOAD_SPAN as usize / 100;
        progress(JobProgress::new(
            JobStage::Uploading,
            overall as u8,
            format!("uploading {pct}%"),
        ));
    })?;
    let report = match outcome {
        UploadOutcome::Completed(report) => report,
        UploadOutcome::Cancelled(report) => {
            progress(JobProgress::new(JobStage::Cancelled, 0, "upload cancelled"));
            return Ok(JobResult::Cancelled(report));
        }
    };

    progress(JobProgress::new(JobStage::Starting, 97, "starting print"));
    session.control(Command::StartPrint)?;
    if let Err(e) = session.refresh() {
        debug!(error = %e, "status refresh after start failed");
    }

    let minutes = info.print_time_s / 60;
    progress(JobProgress::new(
        JobStage::Done,
        100,
        format!("print started, about {minutes} min"),
    ));
    Ok(JobResult::Started(JobReport {
        name: name.to_string(),
        model_id: profile.model_id().to_string(),
        info,
        container_bytes: container.len(),
        upload: report,
    }))
}

/// File name announced to the printer. Commas would break the upload frame.
fn upload_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "model".to_string());
    let clean: String = stem
        .chars()
        .map(|c| if c == ',' || !c.is_ascii_graphic() { '_' } else { c })
        .collect();
    format!("{clean}.gcode")
}
