//! # Error Types
//!
//! This module defines error types used throughout the vinci library.
//!
//! Each layer has its own error enum so callers can tell a dead serial link
//! from a confused codec, a refused conversion, or a request that was rejected
//! before any work started. [`VinciError`] wraps them all.

use std::time::Duration;

use thiserror::Error;

/// Serial link failures. Fatal to the current session, never to the process.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The port is already held by another process (or another session).
    #[error("port {port} is busy: {detail}")]
    PortBusy { port: String, detail: String },

    /// The port could not be opened for any other reason.
    #[error("cannot open {port}: {detail}")]
    Unavailable { port: String, detail: String },

    /// No bytes arrived within the allowed window.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A previous read or write failed; the endpoint must be reopened.
    #[error("endpoint is dead: {0}")]
    Dead(String),

    /// The endpoint has been closed.
    #[error("endpoint is closed")]
    Closed,

    /// I/O error from the operating system (device unplugged, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error merely reports silence on the line.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

/// Framing and reply-interpretation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame boundaries can no longer be located reliably.
    #[error("protocol desync: {0}")]
    Desync(String),

    /// The input ended before a complete frame was seen.
    #[error("truncated frame: {0}")]
    Truncated(String),

    /// A frame's integrity marker did not check out.
    #[error("integrity check failed: {0}")]
    Checksum(String),

    /// The device sent a reply this codec does not recognise.
    #[error("unknown command from device: {0:?}")]
    UnknownCommand(String),

    /// The device answered with an explicit error.
    #[error("printer rejected request: {0}")]
    Rejected(String),

    /// A well-formed reply of the wrong kind for the request.
    #[error("unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply { expected: &'static str, got: String },

    /// An outgoing frame could not be encoded.
    #[error("cannot encode frame: {0}")]
    Encode(String),
}

/// Toolpath ↔ container conversion failures. Always raised before any byte
/// reaches the printer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// No profile exists for this model identifier.
    #[error("unsupported printer model {0:?}")]
    UnsupportedModel(String),

    /// The container names a different model than the profile used to open it.
    #[error("container is for model {found:?}, profile is {expected:?}")]
    ModelMismatch { expected: String, found: String },

    /// The container header or body is malformed.
    #[error("corrupt container: {0}")]
    Corrupt(String),

    /// The decrypted payload does not match the header checksum.
    #[error("payload checksum mismatch")]
    ChecksumMismatch,

    /// The toolpath is too large for the container's 32-bit length fields.
    #[error("toolpath too large: {0} bytes")]
    TooLarge(usize),

    /// Compression of the payload failed.
    #[error("archive error: {0}")]
    Archive(String),
}

/// Requests rejected before starting work. No side effects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("no printer connected")]
    NotConnected,

    #[error("printer is not idle (state {code}: {name})")]
    NotIdle { code: u32, name: String },

    #[error("{operation} is not allowed while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("a job is already running")]
    JobActive,

    #[error("printer model is unknown; reconnect before printing")]
    UnknownModel,
}

/// Failures of the external slicing engine.
#[derive(Debug, Error)]
pub enum SlicerError {
    /// No slicing engine is installed; only toolpath input can be printed.
    #[error("slicing engine not available: {0}")]
    Unavailable(String),

    #[error("slicing engine exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("slicing engine timed out after {0:?}")]
    Timeout(Duration),

    #[error("slicing engine produced no output at {0}")]
    NoOutput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Block-transfer failures.
#[derive(Debug, Error)]
pub enum UploadError {
    /// A block went unacknowledged through every allowed attempt.
    #[error("block {block} was not acknowledged after {attempts} attempts")]
    BlockTimeout { block: u32, attempts: u32 },

    /// The printer acknowledged a block other than the one just sent.
    #[error("acknowledgment for block {acked} while block {sent} was outstanding")]
    AckMismatch { sent: u32, acked: u32 },

    /// The printer refused to start the transfer.
    #[error("printer refused upload: {0}")]
    Refused(String),

    /// The printer did not confirm the end of the transfer.
    #[error("printer did not confirm end of upload: {0}")]
    Unconfirmed(String),

    /// The container does not fit the block index space.
    #[error("container too large: {0} bytes")]
    TooLarge(usize),
}

/// Main error type for vinci operations
#[derive(Debug, Error)]
pub enum VinciError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("slicer error: {0}")]
    Slicer(#[from] SlicerError),

    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    /// Connect failed during the handshake; the session was never created.
    #[error("connection failed: {0}")]
    Connect(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VinciError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            VinciError::Transport(_) => "transport",
            VinciError::Protocol(_) => "protocol",
            VinciError::Conversion(_) => "conversion",
            VinciError::Precondition(_) => "precondition",
            VinciError::Slicer(_) => "slicer",
            VinciError::Upload(_) => "upload",
            VinciError::Connect(_) => "connect",
            VinciError::Io(_) => "io",
        }
    }

    /// Whether the error leaves the serial link unusable.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, VinciError::Transport(e) if !e.is_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_not_fatal() {
        let err = VinciError::from(TransportError::Timeout(Duration::from_secs(1)));
        assert!(!err.is_fatal_to_session());
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn test_dead_endpoint_is_fatal() {
        let err = VinciError::from(TransportError::Dead("unplugged".into()));
        assert!(err.is_fatal_to_session());
    }

    #[test]
    fn test_precondition_message() {
        let err = VinciError::from(PreconditionError::NotIdle {
            code: 9002,
            name: "Printing".into(),
        });
        assert_eq!(
            err.to_string(),
            "precondition failed: printer is not idle (state 9002: Printing)"
        );
    }
}
