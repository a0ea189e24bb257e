//! # Printer Replies
//!
//! Decoding of printer → host messages.
//!
//! Every reply is ASCII text closed by a `$` terminator. The body is one of:
//!
//! | Body | Meaning |
//! |------|---------|
//! | `ok`, `ok,<n>` | Acknowledgment, optionally naming an upload block |
//! | `E<code>`, `error...` | Request refused |
//! | `k:value` segments | Status telemetry |
//!
//! Anything else is an [`ProtocolError::UnknownCommand`]. Telemetry without a
//! `j:` state segment, or with a field that does not parse, is a `Desync`.
//!
//! ## Resynchronisation
//!
//! [`Decoder`] buffers raw bytes from the link. When a body is corrupt or the
//! buffer grows past [`MAX_REPLY_LEN`] with no terminator, the bytes up to the
//! next `$` (or the whole buffer) are discarded and `Desync` is returned; no
//! prefix of a bad frame is ever interpreted.

use crate::error::ProtocolError;
use crate::protocol::status::StatusSnapshot;

/// Reply terminator.
pub const TERMINATOR: u8 = b'$';

/// Longest body accepted before the stream is considered desynchronised.
pub const MAX_REPLY_LEN: usize = 64 * 1024;

/// One decoded printer reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Request accepted. Upload acks may carry the block index.
    Ack { block: Option<u32> },
    /// Request refused, with the firmware's error text.
    Error(String),
    /// Telemetry.
    Status(StatusSnapshot),
}

impl Reply {
    /// Short description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Reply::Ack { block: None } => "ok".to_string(),
            Reply::Ack { block: Some(n) } => format!("ok,{}", n),
            Reply::Error(e) => format!("error {:?}", e),
            Reply::Status(s) => format!("status (state {})", s.state_code),
        }
    }

    /// Wire bytes for this reply, terminator included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = match self {
            Reply::Ack { block: None } => "ok".to_string(),
            Reply::Ack { block: Some(n) } => format!("ok,{}", n),
            Reply::Error(e) => e.clone(),
            Reply::Status(s) => s.to_reply_body(),
        };
        body.push(TERMINATOR as char);
        body.into_bytes()
    }
}

/// Decode exactly one complete reply.
///
/// `raw` must hold one body and its terminator; trailing whitespace is
/// tolerated, anything else after the terminator is a desync.
///
/// ## Example
///
/// ```
/// use vinci::protocol::reply::{self, Reply};
///
/// assert_eq!(reply::decode(b"ok$").unwrap(), Reply::Ack { block: None });
/// assert!(reply::decode(b"ok").is_err());
/// ```
pub fn decode(raw: &[u8]) -> Result<Reply, ProtocolError> {
    let Some(end) = raw.iter().position(|&b| b == TERMINATOR) else {
        return Err(ProtocolError::Truncated(format!(
            "no terminator in {} bytes",
            raw.len()
        )));
    };
    if raw[end + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
        return Err(ProtocolError::Desync(format!(
            "{} bytes after terminator",
            raw.len() - end - 1
        )));
    }
    decode_body(&raw[..end])
}

fn decode_body(body: &[u8]) -> Result<Reply, ProtocolError> {
    if body.len() > MAX_REPLY_LEN {
        return Err(ProtocolError::Desync(format!(
            "reply body of {} bytes",
            body.len()
        )));
    }
    if let Some(b) = body
        .iter()
        .find(|&&b| !(b == b'\r' || b == b'\n' || b == b'\t' || (0x20..=0x7E).contains(&b)))
    {
        return Err(ProtocolError::Desync(format!(
            "byte 0x{:02X} in reply body",
            b
        )));
    }

    // Validated as printable ASCII above.
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return Err(ProtocolError::Desync("empty reply".to_string()));
    }

    let lower = text.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("ok") {
        let rest = rest.trim_start_matches([',', ':', ' ']).trim();
        if rest.is_empty() {
            return Ok(Reply::Ack { block: None });
        }
        return match rest.parse::<u32>() {
            Ok(n) => Ok(Reply::Ack { block: Some(n) }),
            Err(_) => Err(ProtocolError::UnknownCommand(text.to_string())),
        };
    }

    let bytes = text.as_bytes();
    if (bytes[0] == b'E' && bytes.get(1).is_some_and(u8::is_ascii_digit))
        || lower.starts_with("err")
    {
        return Ok(Reply::Error(text.to_string()));
    }

    StatusSnapshot::parse(text).map(Reply::Status)
}

/// # Streaming Reply Decoder
///
/// Accumulates bytes read from the link and yields complete replies.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the link.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for a terminator.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Take the next complete reply, if any.
    ///
    /// `Ok(None)` means more bytes are needed. On `Err` the offending bytes
    /// have already been discarded and decoding can continue.
    pub fn next_reply(&mut self) -> Result<Option<Reply>, ProtocolError> {
        // Leading whitespace between replies is noise.
        let skip = self
            .buf
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.buf.drain(..skip);

        match self.buf.iter().position(|&b| b == TERMINATOR) {
            Some(end) => {
                let frame: Vec<u8> = self.buf.drain(..=end).collect();
                decode_body(&frame[..end]).map(Some)
            }
            None if self.buf.len() > MAX_REPLY_LEN => {
                let dropped = self.buf.len();
                self.buf.clear();
                Err(ProtocolError::Desync(format!(
                    "no terminator within {} bytes",
                    dropped
                )))
            }
            None => Ok(None),
        }
    }
}
