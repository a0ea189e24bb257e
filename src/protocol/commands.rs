//! # V3 Command Frames
//!
//! Frames sent from the host to the printer.
//!
//! ## Control Frames
//!
//! Control commands are ASCII lines with a fixed prefix:
//!
//! ```text
//! XYZv3/<verb>\n
//! ```
//!
//! | Command | Verb |
//! |---------|------|
//! | Handshake / status query | `query=a` |
//! | Home axes | `action=home` |
//! | Load filament | `action=loadfilament` |
//! | Unload filament | `action=unloadfilament` |
//! | Pause / resume / cancel | `action=pause`, `action=resume`, `action=cancel` |
//! | Begin upload | `upload=<name>,<size>` |
//! | End upload | `uploadDidFinish` |
//! | Start print | `action=print[start]` |
//!
//! ## Block Frames
//!
//! Container data travels in binary blocks, all integers **big-endian**:
//!
//! ```text
//! ┌──────────┬──────────┬───────────────┬─────────────┐
//! │ index u32│ len u32  │ payload (len) │ 00 00 00 00 │
//! └──────────┴──────────┴───────────────┴─────────────┘
//! ```
//!
//! The declared length must equal the payload length and the trailer must be
//! four zero bytes; anything else is rejected whole.

use crate::error::ProtocolError;

/// Prefix of every control frame.
pub const PREFIX: &str = "XYZv3/";

/// Maximum payload carried by one upload block.
pub const BLOCK_SIZE: usize = 8192;

/// Bytes preceding a block payload (index + length).
pub const BLOCK_HEADER_LEN: usize = 8;

/// Integrity trailer closing every block.
pub const BLOCK_TRAILER: [u8; 4] = [0; 4];

/// Longest control line accepted by [`decode_command`].
const MAX_COMMAND_LEN: usize = 512;

/// Closed set of command identifiers understood by V3 firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Handshake,
    Home,
    QueryStatus,
    LoadFilament,
    UnloadFilament,
    Pause,
    Resume,
    Cancel,
    BeginUpload,
    UploadBlock,
    EndUpload,
    StartPrint,
}

impl Command {
    /// Text verb following [`PREFIX`], `None` for binary block frames.
    ///
    /// For [`Command::BeginUpload`] the verb is followed by the argument.
    pub const fn verb(self) -> Option<&'static str> {
        match self {
            Command::Handshake | Command::QueryStatus => Some("query=a"),
            Command::Home => Some("action=home"),
            Command::LoadFilament => Some("action=loadfilament"),
            Command::UnloadFilament => Some("action=unloadfilament"),
            Command::Pause => Some("action=pause"),
            Command::Resume => Some("action=resume"),
            Command::Cancel => Some("action=cancel"),
            Command::BeginUpload => Some("upload="),
            Command::EndUpload => Some("uploadDidFinish"),
            Command::StartPrint => Some("action=print[start]"),
            Command::UploadBlock => None,
        }
    }

    /// Whether the command carries an argument after its verb.
    pub const fn takes_argument(self) -> bool {
        matches!(self, Command::BeginUpload)
    }
}

/// Commands recognised when parsing a control line. `query=a` parses as
/// [`Command::QueryStatus`]; the handshake is the same exchange on the wire.
const PARSEABLE: &[Command] = &[
    Command::QueryStatus,
    Command::Home,
    Command::LoadFilament,
    Command::UnloadFilament,
    Command::Pause,
    Command::Resume,
    Command::Cancel,
    Command::BeginUpload,
    Command::EndUpload,
    Command::StartPrint,
];

/// # Outgoing Frame
///
/// One host → printer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Sequence index, meaningful only for [`Command::UploadBlock`].
    pub index: u32,
    /// Verb argument for control frames, container bytes for blocks.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self.command.verb() {
            Some(verb) => {
                let mut out =
                    Vec::with_capacity(PREFIX.len() + verb.len() + self.payload.len() + 1);
                out.extend_from_slice(PREFIX.as_bytes());
                out.extend_from_slice(verb.as_bytes());
                out.extend_from_slice(&self.payload);
                out.push(b'\n');
                out
            }
            None => {
                let mut out =
                    Vec::with_capacity(BLOCK_HEADER_LEN + self.payload.len() + BLOCK_TRAILER.len());
                out.extend_from_slice(&self.index.to_be_bytes());
                out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
                out.extend_from_slice(&self.payload);
                out.extend_from_slice(&BLOCK_TRAILER);
                out
            }
        }
    }

    /// Argument of a control frame as text.
    pub fn argument(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("")
    }
}

/// Encode a control command.
///
/// `payload` is the verb argument; only [`Command::BeginUpload`] takes one.
///
/// ## Example
///
/// ```
/// use vinci::protocol::commands::{self, Command};
///
/// let frame = commands::encode(Command::Home, b"").unwrap();
/// assert_eq!(frame.to_bytes(), b"XYZv3/action=home\n");
/// ```
pub fn encode(command: Command, payload: &[u8]) -> Result<Frame, ProtocolError> {
    if command == Command::UploadBlock {
        return Err(ProtocolError::Encode(
            "upload blocks need an index; use encode_block".to_string(),
        ));
    }
    if !command.takes_argument() && !payload.is_empty() {
        return Err(ProtocolError::Encode(format!(
            "{:?} takes no argument",
            command
        )));
    }
    if let Some(b) = payload
        .iter()
        .find(|b| !(0x20..=0x7E).contains(*b) || **b == b'$')
    {
        return Err(ProtocolError::Encode(format!(
            "byte 0x{:02X} not allowed in a control frame",
            b
        )));
    }
    Ok(Frame {
        command,
        index: 0,
        payload: payload.to_vec(),
    })
}

/// Encode the frame that announces an upload of `size` bytes.
pub fn begin_upload(name: &str, size: usize) -> Result<Frame, ProtocolError> {
    if name.contains(',') {
        return Err(ProtocolError::Encode(format!(
            "upload name {:?} contains a comma",
            name
        )));
    }
    encode(Command::BeginUpload, format!("{},{}", name, size).as_bytes())
}

/// Encode one upload block.
pub fn encode_block(index: u32, payload: &[u8]) -> Result<Frame, ProtocolError> {
    if payload.len() > BLOCK_SIZE {
        return Err(ProtocolError::Encode(format!(
            "block of {} bytes exceeds {}",
            payload.len(),
            BLOCK_SIZE
        )));
    }
    Ok(Frame {
        command: Command::UploadBlock,
        index,
        payload: payload.to_vec(),
    })
}

/// Decode one block frame from the start of `raw`.
///
/// Returns the frame and the number of bytes consumed.
pub fn decode_block(raw: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    if raw.len() < BLOCK_HEADER_LEN {
        return Err(ProtocolError::Truncated(format!(
            "block header needs {} bytes, have {}",
            BLOCK_HEADER_LEN,
            raw.len()
        )));
    }
    let index = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let declared = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
    if declared > BLOCK_SIZE {
        return Err(ProtocolError::Desync(format!(
            "block {} declares {} bytes (max {})",
            index, declared, BLOCK_SIZE
        )));
    }

    let end = BLOCK_HEADER_LEN + declared;
    let total = end + BLOCK_TRAILER.len();
    if raw.len() < total {
        return Err(ProtocolError::Truncated(format!(
            "block {} needs {} bytes, have {}",
            index,
            total,
            raw.len()
        )));
    }
    if raw[end..total] != BLOCK_TRAILER {
        return Err(ProtocolError::Checksum(format!(
            "block {} trailer is {:02X?}",
            index,
            &raw[end..total]
        )));
    }

    Ok((
        Frame {
            command: Command::UploadBlock,
            index,
            payload: raw[BLOCK_HEADER_LEN..end].to_vec(),
        },
        total,
    ))
}

/// Decode one control line (without or with its trailing newline).
pub fn decode_command(line: &[u8]) -> Result<Frame, ProtocolError> {
    if line.len() > MAX_COMMAND_LEN {
        return Err(ProtocolError::Desync(format!(
            "control line of {} bytes",
            line.len()
        )));
    }
    let text = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::Desync("control line is not text".to_string()))?
        .trim_end_matches(['\r', '\n']);

    let body = text
        .strip_prefix(PREFIX)
        .ok_or_else(|| ProtocolError::UnknownCommand(text.to_string()))?;

    for &command in PARSEABLE {
        let Some(verb) = command.verb() else { continue };
        if command.takes_argument() {
            if let Some(arg) = body.strip_prefix(verb) {
                return encode(command, arg.as_bytes());
            }
        } else if body == verb {
            return encode(command, b"");
        }
    }

    Err(ProtocolError::UnknownCommand(text.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_control_frames() {
        let cases = [
            (Command::QueryStatus, "XYZv3/query=a\n"),
            (Command::Pause, "XYZv3/action=pause\n"),
            (Command::EndUpload, "XYZv3/uploadDidFinish\n"),
            (Command::StartPrint, "XYZv3/action=print[start]\n"),
        ];
        for (command, wire) in cases {
            assert_eq!(encode(command, b"").unwrap().to_bytes(), wire.as_bytes());
        }
    }

    #[test]
    fn test_begin_upload() {
        let frame = begin_upload("part.gcode", 20480).unwrap();
        assert_eq!(frame.to_bytes(), b"XYZv3/upload=part.gcode,20480\n");
        assert!(begin_upload("a,b", 1).is_err());
    }

    #[test]
    fn test_argument_rejected_for_plain_commands() {
        assert!(matches!(
            encode(Command::Home, b"now"),
            Err(ProtocolError::Encode(_))
        ));
        assert!(encode(Command::BeginUpload, b"x$,1").is_err());
        assert!(encode(Command::UploadBlock, b"").is_err());
    }

    #[test]
    fn test_block_layout() {
        let frame = encode_block(2, &[0xAA, 0xBB, 0xCC]).unwrap();
        assert_eq!(
            frame.to_bytes(),
            vec![0, 0, 0, 2, 0, 0, 0, 3, 0xAA, 0xBB, 0xCC, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_block_decode() {
        let bytes = encode_block(7, &[1, 2, 3, 4]).unwrap().to_bytes();
        let (frame, used) = decode_block(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(frame.index, 7);
        assert_eq!(frame.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_block_decode_rejects_bad_trailer() {
        let mut bytes = encode_block(0, &[9; 16]).unwrap().to_bytes();
        let last = bytes.len() - 1;
        bytes[last] = 1;
        assert!(matches!(
            decode_block(&bytes),
            Err(ProtocolError::Checksum(_))
        ));
    }

    #[test]
    fn test_block_decode_rejects_length_overrun() {
        let mut bytes = vec![0, 0, 0, 0];
        bytes.extend_from_slice(&(BLOCK_SIZE as u32 + 1).to_be_bytes());
        assert!(matches!(decode_block(&bytes), Err(ProtocolError::Desync(_))));
    }

    #[test]
    fn test_block_decode_truncated() {
        let bytes = encode_block(0, &[5; 100]).unwrap().to_bytes();
        for cut in [0, 3, 8, 50, bytes.len() - 1] {
            assert!(matches!(
                decode_block(&bytes[..cut]),
                Err(ProtocolError::Truncated(_))
            ));
        }
    }

    #[test]
    fn test_oversized_block_rejected() {
        assert!(encode_block(0, &vec![0; BLOCK_SIZE + 1]).is_err());
        assert!(encode_block(0, &vec![0; BLOCK_SIZE]).is_ok());
    }

    #[test]
    fn test_decode_command() {
        let frame = decode_command(b"XYZv3/action=resume\n").unwrap();
        assert_eq!(frame.command, Command::Resume);

        let frame = decode_command(b"XYZv3/upload=a.gcode,100\r\n").unwrap();
        assert_eq!(frame.command, Command::BeginUpload);
        assert_eq!(frame.argument(), "a.gcode,100");

        assert!(matches!(
            decode_command(b"XYZv3/action=dance\n"),
            Err(ProtocolError::UnknownCommand(_))
        ));
        assert!(matches!(
            decode_command(b"M104 S200\n"),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }
}
