//! Server state and configuration.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::{SessionConfig, SlicerConfig};
use crate::job::{JobProgress, JobStage};
use crate::session::Session;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:8080")
    pub listen_addr: String,
    /// Where uploaded files are stored before printing
    pub upload_dir: PathBuf,
    pub session: SessionConfig,
    pub slicer: SlicerConfig,
}

/// Progress of the current (or last) job, as shown to clients.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStatus {
    pub active: bool,
    pub id: Option<Uuid>,
    pub filename: Option<String>,
    pub stage: Option<JobStage>,
    pub percent: u8,
    pub message: String,
    /// RFC 3339 start time
    pub started_at: Option<String>,
}

impl JobStatus {
    fn started(filename: &str) -> Self {
        Self {
            active: true,
            id: Some(Uuid::new_v4()),
            filename: Some(filename.to_string()),
            stage: None,
            percent: 0,
            message: "queued".to_string(),
            started_at: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn apply(&mut self, progress: &JobProgress) {
        self.stage = Some(progress.stage);
        self.percent = progress.percent;
        self.message = progress.message.clone();
        if matches!(
            progress.stage,
            JobStage::Done | JobStage::Cancelled | JobStage::Failed
        ) {
            self.active = false;
        }
    }

    pub fn fail(&mut self, message: String) {
        self.active = false;
        self.stage = Some(JobStage::Failed);
        self.message = message;
    }
}

/// Application state shared across handlers.
pub struct AppState {
    pub config: ServerConfig,
    /// The connected printer, if any.
    pub session: RwLock<Option<Arc<Session>>>,
    /// Updated from the blocking job thread, hence a std mutex.
    pub job: Arc<Mutex<JobStatus>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            session: RwLock::new(None),
            job: Arc::new(Mutex::new(JobStatus::default())),
        }
    }

    pub async fn session(&self) -> Option<Arc<Session>> {
        self.session.read().await.clone()
    }

    pub fn job(&self) -> MutexGuard<'_, JobStatus> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Where a job's uploaded file is kept. Each job gets its own directory
    /// so the printer still sees the original file name.
    pub fn upload_path(&self, job_id: Uuid, filename: &str) -> PathBuf {
        self.config.upload_dir.join(job_id.to_string()).join(filename)
    }

    /// Claim the job slot. Returns `None` if a job is already running.
    pub fn begin_job(&self, filename: &str) -> Option<Uuid> {
        let mut job = self.job();
        if job.active {
            return None;
        }
        *job = JobStatus::started(filename);
        job.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::new(ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            upload_dir: PathBuf::from("uploads"),
            session: SessionConfig::default(),
            slicer: SlicerConfig::default(),
        })
    }

    #[test]
    fn test_job_slot_is_exclusive() {
        let state = state();
        assert!(state.begin_job("a.gcode").is_some());
        assert!(state.begin_job("b.gcode").is_none());
        state.job().apply(&JobProgress::new(JobStage::Done, 100, "done"));
        assert!(state.begin_job("b.gcode").is_some());
    }

    #[test]
    fn test_upload_paths_are_per_job() {
        let state = state();
        let first = state.begin_job("part.gcode").unwrap();
        state.job().fail("Error: test".to_string());
        let second = state.begin_job("part.gcode").unwrap();

        let a = state.upload_path(first, "part.gcode");
        let b = state.upload_path(second, "part.gcode");
        assert_ne!(a, b);
        assert!(a.starts_with("uploads"));
        assert_eq!(a.file_name(), b.file_name());
        assert_eq!(a.file_name().and_then(|n| n.to_str()), Some("part.gcode"));
    }
}
