//! # Configuration
//!
//! Tunables for the session, the upload manager and the slicer. Every value
//! has a default matching V3 firmware behaviour; binaries override them from
//! command-line flags.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// # Session Configuration
///
/// | Setting | Default |
/// |---------|---------|
/// | Status poll interval | 2 s |
/// | Control command timeout | 5 s |
/// | Block acknowledgment timeout | 30 s |
/// | Block retry limit | 3 |
/// | Consecutive poll failures before teardown | 3 |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub command_timeout: Duration,
    pub block_timeout: Duration,
    /// Retries per block after the first attempt.
    pub block_retries: u32,
    pub poll_failure_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            command_timeout: Duration::from_secs(5),
            block_timeout: Duration::from_secs(30),
            block_retries: 3,
            poll_failure_threshold: 3,
        }
    }
}

/// # Slicer Configuration
///
/// Where to find the external slicing engine and how long to let it run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicerConfig {
    /// Directory holding the engine binary and its `definitions/` folder.
    pub engine_dir: PathBuf,
    /// Where sliced toolpaths are written.
    pub output_dir: PathBuf,
    pub timeout: Duration,
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            engine_dir: PathBuf::from("cura-engine"),
            output_dir: std::env::temp_dir(),
            timeout: Duration::from_secs(120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.block_retries, 3);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"block_retries": 5}"#).unwrap();
        assert_eq!(config.block_retries, 5);
        assert_eq!(config.command_timeout, Duration::from_secs(5));
    }
}
