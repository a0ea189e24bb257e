//! # Printer State Codes
//!
//! The firmware reports its state as a four-digit number in the `j:` status
//! field. Codes are grouped into classes that the session state machine and
//! the job controller reason about.

use serde::Serialize;

/// Coarse classification of a firmware state code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    /// Ready to accept a job.
    Idle,
    /// Nozzle heating ahead of a print.
    Heating,
    Printing,
    Paused,
    Cancelling,
    /// Doing something other than printing (homing, loading, calibrating, ...)
    Busy,
    Error,
    /// Code not present in the table.
    Unknown,
}

impl StateClass {
    /// Whether a print job is in progress (heating counts).
    pub fn is_printing(self) -> bool {
        matches!(self, StateClass::Heating | StateClass::Printing)
    }
}

/// One row of the state table.
#[derive(Debug, Clone, Copy)]
pub struct StateCode {
    pub code: u32,
    pub name: &'static str,
    pub class: StateClass,
}

const fn state(code: u32, name: &'static str, class: StateClass) -> StateCode {
    StateCode { code, name, class }
}

use StateClass::*;

/// Canonical idle code reported by most V3 firmware.
pub const IDLE: u32 = 9511;

/// Code the firmware reports while cancelling a job.
pub const CANCELLING: u32 = 9050;

/// Known state codes.
pub const STATE_CODES: &[StateCode] = &[
    state(9000, "Initial", Busy),
    state(9001, "Heating", Heating),
    state(9002, "Printing", Printing),
    state(9003, "Calibrating", Busy),
    state(9004, "Calibrating", Busy),
    state(9005, "Cooling Down", Busy),
    state(9006, "Print Complete", Busy),
    state(9007, "Idle (Cooled)", Idle),
    state(9008, "Homing", Busy),
    state(9009, "Unloading Filament", Busy),
    state(9010, "Loading Filament", Busy),
    state(9011, "Idle (Cooled)", Idle),
    state(9012, "Calibrating", Busy),
    state(9021, "Loading Filament", Busy),
    state(9029, "Homing", Busy),
    state(9030, "Calibrating", Busy),
    state(9031, "Calibrating", Busy),
    state(9032, "Calibrating", Busy),
    state(9033, "Calibrating", Busy),
    state(9034, "Idle", Idle),
    state(9039, "Printing", Printing),
    state(9040, "Paused", Paused),
    state(CANCELLING, "Cancelling", Cancelling),
    state(9060, "Error", Error),
    state(9070, "Busy", Busy),
    state(9080, "Scanning", Busy),
    state(9090, "Cleaning Nozzle", Busy),
    state(9100, "Updating Firmware", Busy),
    state(9500, "Ready", Idle),
    state(9510, "Idle", Idle),
    state(IDLE, "Idle", Idle),
    state(9520, "Busy", Busy),
    state(9530, "Busy", Busy),
];

/// Classify a state code.
pub fn class_of(code: u32) -> StateClass {
    lookup(code).map_or(StateClass::Unknown, |s| s.class)
}

/// Display name of a state code, `Unknown(n)` for codes not in the table.
pub fn name_of(code: u32) -> String {
    match lookup(code) {
        Some(s) => s.name.to_string(),
        None => format!("Unknown({})", code),
    }
}

/// Whether the printer will accept a new job in this state.
pub fn is_idle(code: u32) -> bool {
    class_of(code) == StateClass::Idle
}

fn lookup(code: u32) -> Option<&'static StateCode> {
    STATE_CODES.iter().find(|s| s.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_codes() {
        for code in [9007, 9011, 9034, 9500, 9510, 9511] {
            assert!(is_idle(code), "{code} should be idle");
        }
        assert!(!is_idle(9002));
        assert!(!is_idle(9006));
        assert!(!is_idle(0));
    }

    #[test]
    fn test_heating_counts_as_printing() {
        assert!(class_of(9001).is_printing());
        assert!(class_of(9039).is_printing());
        assert!(!class_of(9040).is_printing());
    }

    #[test]
    fn test_unknown_code_name() {
        assert_eq!(name_of(1234), "Unknown(1234)");
        assert_eq!(class_of(1234), StateClass::Unknown);
        assert_eq!(name_of(9040), "Paused");
    }
}
