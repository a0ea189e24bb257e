//! # Vinci - da Vinci 3D Printer Library
//!
//! Vinci drives XYZprinting da Vinci printers that speak the V3 serial
//! protocol. It provides:
//!
//! - **Protocol implementation**: V3 control frames, replies and status telemetry
//! - **Conversion**: plaintext toolpaths to the encrypted `.3w` container and back
//! - **Upload**: block transfer with per-block acknowledgment and retry
//! - **Session**: connection lifecycle with a background status poller
//! - **Jobs**: slice, convert, upload and start a print in one call
//!
//! ## Quick Start
//!
//! ```no_run
//! use vinci::{Session, config::SessionConfig, job};
//! use std::path::Path;
//!
//! // Connect and handshake
//! let session = Session::connect("/dev/ttyACM0", SessionConfig::default())?;
//! println!("{} is {}", session.model_id(), session.state());
//!
//! // Print a toolpath
//! job::run_print_from_toolpath(&session, Path::new("part.gcode"), |p| {
//!     println!("{:?} {}%", p.stage, p.percent);
//! })?;
//!
//! # Ok::<(), vinci::VinciError>(())
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | V3 frame codec and status parsing |
//! | [`transport`] | Serial port and simulated printer |
//! | [`convert`] | `.3w` container encryption |
//! | [`upload`] | Block upload manager |
//! | [`session`] | Connection state machine and poller |
//! | [`job`] | Print jobs and the external slicer |
//! | [`printer`] | Model table and state codes |
//! | [`server`] | HTTP control surface |
//! | [`config`] | Timing and slicer settings |
//! | [`error`] | Error types |
//!
//! ## Supported Printers
//!
//! The V3 family: da Vinci 1.0 Pro, 1.0A, 2.0A Duo, Jr. 1.0/2.0 variants,
//! Mini and Nano lines. Older V1/V2 firmware is not supported.

pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod printer;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;
pub mod upload;

// Re-exports for convenience
pub use error::VinciError;
pub use printer::PrinterModel;
pub use session::{Session, SessionState};
