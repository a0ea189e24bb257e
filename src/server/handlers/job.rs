//! Print job handlers.

use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{PreconditionError, SlicerError, VinciError};
use crate::job::{self, CuraEngine, JobResult, Quality};

use super::super::state::AppState;
use super::{ApiError, success};

/// What an uploaded file is, by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Geometry,
    Toolpath,
}

fn input_kind(filename: &str) -> Option<InputKind> {
    let ext = Path::new(filename)
        .extension()?
        .to_string_lossy()
        .to_ascii_lowercase();
    match ext.as_str() {
        "stl" | "obj" | "3mf" => Some(InputKind::Geometry),
        "gcode" | "gco" | "g" => Some(InputKind::Toolpath),
        _ => None,
    }
}

/// Keep only the final path component so uploads stay inside the upload dir.
fn safe_filename(name: &str) -> Option<String> {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && n != "." && n != "..")
}

/// Write an upload into its own job directory.
async fn store_upload(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, bytes).await
}

/// POST /api/print - Upload a geometry or toolpath file and print it.
///
/// Multipart fields: `file` (required), `quality` (fine, normal, draft;
/// geometry only). The job runs in the background; poll `/api/status`.
pub async fn print(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut quality = Quality::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Multipart error: {e}")))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                let filename = field.file_name().unwrap_or("upload.gcode").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;
                upload = Some((filename, bytes.to_vec()));
            }
            "quality" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read quality: {e}")))?;
                quality = text.parse().map_err(ApiError::bad_request)?;
            }
            _ => {}
        }
    }

    let (filename, bytes) = upload.ok_or_else(|| ApiError::bad_request("No file field found"))?;
    let filename =
        safe_filename(&filename).ok_or_else(|| ApiError::bad_request("Invalid file name"))?;
    let kind = input_kind(&filename).ok_or_else(|| {
        ApiError::bad_request("Unsupported file type (expected .stl, .obj, .3mf or .gcode)")
    })?;

    let session = state.session().await.ok_or(PreconditionError::NotConnected)?;
    job::check_ready(&session)?;

    let engine = CuraEngine::new(state.config.slicer.clone());
    if kind == InputKind::Geometry && !engine.is_available() {
        return Err(VinciError::from(SlicerError::Unavailable(
            "no slicing engine installed; upload a .gcode file instead".to_string(),
        ))
        .into());
    }

    let job_id = state
        .begin_job(&filename)
        .ok_or(PreconditionError::JobActive)?;

    let path: PathBuf = state.upload_path(job_id, &filename);
    if let Err(e) = store_upload(&path, &bytes).await {
        state.job().fail(format!("Error: {e}"));
        return Err(ApiError::internal(format!("Cannot store upload: {e}")));
    }
    info!(%job_id, file = %filename, ?kind, %quality, "job accepted");

    let job_status = state.job.clone();
    tokio::task::spawn_blocking(move || {
        let report = |progress: job::JobProgress| {
            job_status
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .apply(&progress);
        };
        let result = match kind {
            InputKind::Geometry => {
                job::run_print_from_geometry(&session, &path, quality, &engine, report)
            }
            InputKind::Toolpath => job::run_print_from_toolpath(&session, &path, report),
        };
        let mut status = job_status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match result {
            Ok(JobResult::Started(done)) => {
                info!(%job_id, blocks = done.upload.blocks.len(), "job finished");
            }
            Ok(JobResult::Cancelled(_)) => info!(%job_id, "job cancelled"),
            Err(e) => {
                error!(%job_id, error = %e, "job failed");
                status.fail(format!("Error: {e}"));
            }
        }
        if let Some(dir) = path.parent()
            && let Err(e) = std::fs::remove_dir_all(dir)
        {
            tracing::debug!(path = %dir.display(), error = %e, "could not remove upload");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        success(json!({ "job_id": job_id, "message": "Job started" })),
    ))
}

/// GET /api/job - Progress of the current or last job.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let job = state.job().clone();
    success(json!({ "job": job }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_kind() {
        assert_eq!(input_kind("part.STL"), Some(InputKind::Geometry));
        assert_eq!(input_kind("part.gcode"), Some(InputKind::Toolpath));
        assert_eq!(input_kind("part.3w"), None);
        assert_eq!(input_kind("README"), None);
    }

    #[test]
    fn test_safe_filename_strips_directories() {
        assert_eq!(safe_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(safe_filename("..").as_deref(), None);
    }

    #[tokio::test]
    async fn test_same_filename_uploads_do_not_collide() {
        let dir = std::env::temp_dir().join(format!("vinci-uploads-{}", uuid::Uuid::new_v4()));
        let first = dir.join("job-a").join("part.gcode");
        let second = dir.join("job-b").join("part.gcode");

        store_upload(&first, b"G1 X1\n").await.unwrap();
        store_upload(&second, b"G1 X2\n").await.unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), b"G1 X1\n");
        assert_eq!(std::fs::read(&second).unwrap(), b"G1 X2\n");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
