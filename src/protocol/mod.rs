//! # XYZ V3 Protocol Implementation
//!
//! Pure encoding and decoding for the serial protocol spoken by da Vinci
//! printers. Nothing in this module performs I/O.
//!
//! ## Module Structure
//!
//! - [`commands`]: Host → printer control lines and upload blocks
//! - [`reply`]: Printer → host replies and the resynchronising stream decoder
//! - [`status`]: Status telemetry parsing
//!
//! ## Usage Example
//!
//! ```
//! use vinci::protocol::{commands::{self, Command}, reply::{Decoder, Reply}};
//!
//! // Request status
//! let frame = commands::encode(Command::QueryStatus, b"").unwrap();
//! assert_eq!(frame.to_bytes(), b"XYZv3/query=a\n");
//!
//! // Feed whatever the link returned
//! let mut decoder = Decoder::new();
//! decoder.push(b"j:9511,0\nt:1,24,0,0\n$");
//! let Some(Reply::Status(status)) = decoder.next_reply().unwrap() else { panic!() };
//! assert!(status.is_idle());
//! ```
//!
//! ## Protocol Properties
//!
//! - 115200 baud, 8N1, over USB CDC serial
//! - Strict request → reply ordering, one request in flight
//! - Replies end with `$`; upload blocks carry a length and a zero trailer

pub mod commands;
pub mod reply;
pub mod status;

pub use commands::{Command, Frame};
pub use reply::{Decoder, Reply};
pub use status::StatusSnapshot;

/// Fixed line speed of the V3 family.
pub const BAUD_RATE: u32 = 115_200;
