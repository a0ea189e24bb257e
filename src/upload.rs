//! # Upload Manager
//!
//! Moves a container to the printer in fixed 8192-byte blocks.
//!
//! ```text
//! host                                printer
//!  │ XYZv3/upload=name.3w,20480\n   →   │
//!  │                                ←   │ ok$
//!  │ [0][8192][8192 bytes][0000]    →   │
//!  │                                ←   │ ok$
//!  │ [1][8192][8192 bytes][0000]    →   │
//!  │                                ←   │ ok$
//!  │ [2][4096][4096 bytes][0000]    →   │
//!  │                                ←   │ ok$
//!  │ XYZv3/uploadDidFinish\n        →   │
//!  │                                ←   │ ok$
//! ```
//!
//! Blocks go strictly in order with exactly one outstanding. A block whose
//! acknowledgment does not arrive in time (or arrives garbled) is resent, up to
//! [`SessionConfig::block_retries`] extra attempts. An acknowledgment naming a
//! different block aborts the transfer. The cancellation flag is checked
//! before every block and every resend; a link aborted by a disconnect while
//! cancellation is raised also ends the transfer as cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{ProtocolError, TransportError, UploadError, VinciError};
use crate::protocol::commands::{self, BLOCK_SIZE, Command};
use crate::protocol::Reply;
use crate::session::{Link, Session};

/// Timing and retry limits for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub block_timeout: Duration,
    pub command_timeout: Duration,
    /// Retries per block after the first attempt.
    pub retries: u32,
}

impl From<&SessionConfig> for UploadPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            block_timeout: config.block_timeout,
            command_timeout: config.command_timeout,
            retries: config.block_retries,
        }
    }
}

/// Per-block transfer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockRecord {
    pub index: u32,
    pub len: usize,
    /// Resends after the first attempt.
    pub retries: u32,
}

/// What was transferred.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub name: String,
    pub total_bytes: usize,
    /// Acknowledged blocks, in order.
    pub blocks: Vec<BlockRecord>,
}

impl UploadReport {
    pub fn total_retries(&self) -> u32 {
        self.blocks.iter().map(|b| b.retries).sum()
    }

    pub fn bytes_acknowledged(&self) -> usize {
        self.blocks.iter().map(|b| b.len).sum()
    }
}

/// Result of a transfer that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "report", rename_all = "lowercase")]
pub enum UploadOutcome {
    Completed(UploadReport),
    Cancelled(UploadReport),
}

impl UploadOutcome {
    pub fn report(&self) -> &UploadReport {
        match self {
            UploadOutcome::Completed(r) | UploadOutcome::Cancelled(r) => r,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, UploadOutcome::Completed(_))
    }
}

/// Lifecycle of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadStatus {
    Pending,
    InProgress,
    Acknowledged,
    Failed,
}

/// Transient state of one transfer. Lives only inside [`transfer`].
struct UploadJob<'a> {
    container: &'a [u8],
    status: UploadStatus,
    report: UploadReport,
}

impl<'a> UploadJob<'a> {
    fn next_block(&self) -> Option<(u32, &'a [u8])> {
        let index = self.report.blocks.len();
        let start = index * BLOCK_SIZE;
        if start >= self.container.len() {
            return None;
        }
        let end = (start + BLOCK_SIZE).min(self.container.len());
        let container: &'a [u8] = self.container;
        Some((index as u32, &container[start..end]))
    }

    fn advance(&mut self, status: UploadStatus) {
        debug!(from = ?self.status, to = ?status, "upload status");
        self.status = status;
    }
}

/// Number of blocks a container of `len` bytes occupies.
pub fn block_count(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE)
}

/// Upload a container through a session.
///
/// The session is `Busy(Uploading)` for the duration and polling pauses.
/// `progress` receives `(bytes_acknowledged, total_bytes)` after each block.
pub fn upload(
    session: &Session,
    name: &str,
    container: &[u8],
    progress: impl FnMut(usize, usize),
) -> Result<UploadOutcome, VinciError> {
    let policy = UploadPolicy::from(session.config());
    session.with_upload(|link, cancel| transfer(link, name, container, &policy, cancel, progress))
}

/// Drive the block protocol over a link the caller already owns exclusively.
pub fn transfer(
    link: &mut Link,
    name: &str,
    container: &[u8],
    policy: &UploadPolicy,
    cancel: &AtomicBool,
    mut progress: impl FnMut(usize, usize),
) -> Result<UploadOutcome, VinciError> {
    if u32::try_from(container.len()).is_err() {
        return Err(UploadError::TooLarge(container.len()).into());
    }
    let mut job = UploadJob {
        container,
        status: UploadStatus::Pending,
        report: UploadReport {
            name: name.to_string(),
            total_bytes: container.len(),
            blocks: Vec::with_capacity(block_count(container.len())),
        },
    };

    info!(
        name,
        bytes = container.len(),
        blocks = block_count(container.len()),
        "upload starting"
    );
    let begin = commands::begin_upload(name, container.len())?;
    match link.exchange(&begin, policy.command_timeout)? {
        Reply::Ack { .. } => {}
        Reply::Error(code) => return Err(UploadError::Refused(code).into()),
        other => {
            return Err(ProtocolError::UnexpectedReply {
                expected: "ok",
                got: other.describe(),
            }
            .into());
        }
    }
    job.advance(UploadStatus::InProgress);

    while let Some((index, payload)) = job.next_block() {
        if cancel.load(Ordering::SeqCst) {
            info!(name, block = index, "upload cancelled");
            job.advance(UploadStatus::Failed);
            return Ok(UploadOutcome::Cancelled(job.report));
        }
        let retries = match send_block(link, index, payload, policy, cancel) {
            Ok(Some(retries)) => retries,
            Ok(None) => {
                info!(name, block = index, "upload cancelled");
                job.advance(UploadStatus::Failed);
                return Ok(UploadOutcome::Cancelled(job.report));
            }
            Err(e) => {
                job.advance(UploadStatus::Failed);
                return Err(e);
            }
        };
        job.report.blocks.push(BlockRecord {
            index,
            len: payload.len(),
            retries,
        });
        progress(job.report.bytes_acknowledged(), container.len());
    }

    let finish = commands::encode(Command::EndUpload, b"")?;
    let confirmed = match link.exchange(&finish, policy.block_timeout) {
        Ok(Reply::Ack { .. }) => Ok(()),
        Ok(other) => Err(UploadError::Unconfirmed(other.describe())),
        Err(VinciError::Transport(TransportError::Timeout(t))) => {
            Err(UploadError::Unconfirmed(format!("no reply within {t:?}")))
        }
        Err(e) if e.is_fatal_to_session() => {
            job.advance(UploadStatus::Failed);
            return Err(e);
        }
        Err(e) => Err(UploadError::Unconfirmed(e.to_string())),
    };
    if let Err(e) = confirmed {
        job.advance(UploadStatus::Failed);
        return Err(e.into());
    }

    job.advance(UploadStatus::Acknowledged);
    info!(
        name,
        blocks = job.report.blocks.len(),
        retries = job.report.total_retries(),
        "upload complete"
    );
    Ok(UploadOutcome::Completed(job.report))
}

/// Send one block until acknowledged. Returns the number of resends, or
/// `None` when cancellation was raised before the block was acknowledged.
fn send_block(
    link: &mut Link,
    index: u32,
    payload: &[u8],
    policy: &UploadPolicy,
    cancel: &AtomicBool,
) -> Result<Option<u32>, VinciError> {
    let frame = commands::encode_block(index, payload)?;
    let attempts = policy.retries + 1;
    for attempt in 0..attempts {
        if attempt > 0 && cancel.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let failure = match link.exchange(&frame, policy.block_timeout) {
            Ok(Reply::Ack { block: Some(acked) }) if acked != index => {
                warn!(sent = index, acked, "acknowledgment for wrong block");
                return Err(UploadError::AckMismatch { sent: index, acked }.into());
            }
            Ok(Reply::Ack { .. }) => return Ok(Some(attempt)),
            Ok(Reply::Error(code)) => return Err(ProtocolError::Rejected(code).into()),
            Ok(other) => other.describe(),
            Err(_) if cancel.load(Ordering::SeqCst) => return Ok(None),
            Err(VinciError::Transport(e)) if e.is_timeout() => e.to_string(),
            Err(VinciError::Protocol(e)) => e.to_string(),
            Err(e) => return Err(e),
        };
        warn!(block = index, attempt = attempt + 1, attempts, %failure, "block not acknowledged");
    }
    Err(UploadError::BlockTimeout {
        block: index,
        attempts,
    }
    .into())
}
