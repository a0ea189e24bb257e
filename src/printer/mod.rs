//! # Printer Module
//!
//! Device-specific data for the da Vinci V3 family.
//!
//! ## Modules
//!
//! - [`models`]: Model identifiers, build volumes and container encryption
//! - [`states`]: Firmware state codes and their classification

pub mod models;
pub mod states;

pub use models::{Encryption, PrinterModel};
pub use states::StateClass;
