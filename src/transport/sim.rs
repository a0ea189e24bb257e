//! # Simulated Printer
//!
//! An in-memory [`Transport`] that behaves like V3 firmware: it parses the
//! host's frames with the same codec, answers status queries, tracks the
//! print state, and acknowledges upload blocks.
//!
//! Faults are scripted through a [`SimHandle`], which stays usable after the
//! transport itself has been moved into a session:
//!
//! ```
//! use vinci::transport::SimulatedPrinter;
//!
//! let (printer, handle) = SimulatedPrinter::new();
//! handle.drop_acks(1, 2); // swallow the ack for block 1 twice
//! handle.never_ack(5);
//! # drop(printer);
//! ```
//!
//! Reads wait at most a millisecond: when nothing is queued the simulator
//! reports a timeout almost at once, which keeps retry scenarios fast.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::Transport;
use crate::error::TransportError;
use crate::printer::states;
use crate::protocol::commands::{self, Command, PREFIX};
use crate::protocol::{Reply, StatusSnapshot};

/// Longest a read waits when nothing is queued.
const IDLE_READ: Duration = Duration::from_millis(1);

/// Something the simulated printer received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// A control frame.
    Command(Command),
    /// An upload block transmission (retransmissions appear again).
    Block { index: u32, len: usize },
}

#[derive(Debug, Default)]
struct Script {
    /// Remaining acks to swallow per block.
    drop_acks: HashMap<u32, u32>,
    never_ack: HashSet<u32>,
    /// Blocks acknowledged with the wrong index.
    misack: HashSet<u32>,
    /// Include the block index in acks.
    indexed_acks: bool,
    silent_status: bool,
    /// Status replies still to swallow.
    drop_status: u32,
    /// Status replies still to garble.
    corrupt_status: u32,
    refuse_upload: bool,
    unplugged: bool,
}

#[derive(Debug)]
struct SimState {
    status: StatusSnapshot,
    script: Script,
    uploading: bool,
    accepted: BTreeMap<u32, Vec<u8>>,
    events: Vec<SimEvent>,
    bytes_received: usize,
}

/// Shared control over a [`SimulatedPrinter`].
#[derive(Debug, Clone)]
pub struct SimHandle(Arc<Mutex<SimState>>);

/// # Simulated Printer
pub struct SimulatedPrinter {
    shared: Arc<Mutex<SimState>>,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    closed: bool,
}

impl SimulatedPrinter {
    /// An idle miniMaker that acknowledges everything.
    pub fn new() -> (Self, SimHandle) {
        Self::with_model("dv1MX0A000")
    }

    /// An idle printer reporting the given model identifier.
    pub fn with_model(model_id: &str) -> (Self, SimHandle) {
        let status = StatusSnapshot {
            state_code: states::IDLE,
            extruder_temp: 24,
            bed_temp: 23,
            filament_remaining_mm: 120_000,
            model_id: model_id.to_string(),
            serial_number: "SIM0000001".to_string(),
            firmware_version: "1.3.5".to_string(),
            ..Default::default()
        };
        let shared = Arc::new(Mutex::new(SimState {
            status,
            script: Script::default(),
            uploading: false,
            accepted: BTreeMap::new(),
            events: Vec::new(),
            bytes_received: 0,
        }));
        let printer = Self {
            shared: shared.clone(),
            inbox: Vec::new(),
            outbox: VecDeque::new(),
            closed: false,
        };
        (printer, SimHandle(shared))
    }

    /// Parse as many complete frames from the inbox as possible.
    fn process(&mut self) {
        let shared = self.shared.clone();
        let mut state = lock(&shared);
        loop {
            if self.inbox.is_empty() {
                return;
            }
            if self.inbox.starts_with(PREFIX.as_bytes()) || !state.uploading {
                let Some(nl) = self.inbox.iter().position(|&b| b == b'\n') else {
                    return;
                };
                let line: Vec<u8> = self.inbox.drain(..=nl).collect();
                match commands::decode_command(&line) {
                    Ok(frame) => {
                        state.events.push(SimEvent::Command(frame.command));
                        if let Some(reply) = state.handle_command(frame.command, frame.argument()) {
                            let mut bytes = reply.to_bytes();
                            if matches!(reply, Reply::Status(_)) && state.script.corrupt_status > 0 {
                                state.script.corrupt_status -= 1;
                                // "j:9511" becomes "j:O511"
                                bytes[2] = b'O';
                            }
                            self.outbox.extend(bytes);
                        }
                    }
                    Err(_) => self.outbox.extend(Reply::Error("E1".to_string()).to_bytes()),
                }
            } else {
                match commands::decode_block(&self.inbox) {
                    Ok((frame, used)) => {
                        self.inbox.drain(..used);
                        state.events.push(SimEvent::Block {
                            index: frame.index,
                            len: frame.payload.len(),
                        });
                        if let Some(reply) = state.handle_block(frame.index, frame.payload) {
                            self.outbox.extend(reply.to_bytes());
                        }
                    }
                    Err(crate::error::ProtocolError::Truncated(_)) => return,
                    Err(_) => {
                        self.inbox.clear();
                        self.outbox.extend(Reply::Error("E9".to_string()).to_bytes());
                        return;
                    }
                }
            }
        }
    }
}

impl SimState {
    fn handle_command(&mut self, command: Command, argument: &str) -> Option<Reply> {
        let ok = Some(Reply::Ack { block: None });
        match command {
            Command::Handshake | Command::QueryStatus => {
                if self.script.silent_status {
                    None
                } else if self.script.drop_status > 0 {
                    self.script.drop_status -= 1;
                    None
                } else {
                    Some(Reply::Status(self.status.clone()))
                }
            }
            Command::BeginUpload => {
                if self.script.refuse_upload {
                    return Some(Reply::Error("E7".to_string()));
                }
                let valid = argument
                    .rsplit_once(',')
                    .is_some_and(|(_, size)| size.parse::<usize>().is_ok());
                if !valid {
                    return Some(Reply::Error("E2".to_string()));
                }
                self.uploading = true;
                self.accepted.clear();
                ok
            }
            Command::EndUpload => {
                self.uploading = false;
                ok
            }
            Command::StartPrint => {
                self.status.state_code = 9002;
                ok
            }
            Command::Pause => {
                if states::class_of(self.status.state_code).is_printing() {
                    self.status.state_code = 9040;
                }
                ok
            }
            Command::Resume => {
                if self.status.state_code == 9040 {
                    self.status.state_code = 9002;
                }
                ok
            }
            Command::Cancel => {
                self.status.state_code = states::IDLE;
                self.status.print_percent = 0;
                ok
            }
            Command::Home | Command::LoadFilament | Command::UnloadFilament => ok,
            Command::UploadBlock => Some(Reply::Error("E1".to_string())),
        }
    }

    fn handle_block(&mut self, index: u32, payload: Vec<u8>) -> Option<Reply> {
        if self.script.never_ack.contains(&index) {
            return None;
        }
        if let Some(remaining) = self.script.drop_acks.get_mut(&index)
            && *remaining > 0
        {
            *remaining -= 1;
            return None;
        }
        self.accepted.insert(index, payload);
        if self.script.misack.contains(&index) {
            return Some(Reply::Ack {
                block: Some(index + 1),
            });
        }
        Some(Reply::Ack {
            block: self.script.indexed_acks.then_some(index),
        })
    }
}

impl Transport for SimulatedPrinter {
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if lock(&self.shared).script.unplugged {
            return Err(TransportError::Dead("device unplugged".to_string()));
        }
        if self.outbox.is_empty() {
            std::thread::sleep(timeout.min(IDLE_READ));
            return Err(TransportError::Timeout(timeout));
        }
        let n = max_bytes.max(1).min(self.outbox.len());
        Ok(self.outbox.drain(..n).collect())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        {
            let mut state = lock(&self.shared);
            if state.script.unplugged {
                return Err(TransportError::Dead("device unplugged".to_string()));
            }
            state.bytes_received += data.len();
        }
        self.inbox.extend_from_slice(data);
        self.process();
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

fn lock(shared: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimHandle {
    fn state(&self) -> MutexGuard<'_, SimState> {
        lock(&self.0)
    }

    /// Force the reported state code.
    pub fn set_state(&self, code: u32) {
        self.state().status.state_code = code;
    }

    /// Current simulated telemetry.
    pub fn status(&self) -> StatusSnapshot {
        self.state().status.clone()
    }

    /// Swallow the ack for `block` the next `times` transmissions.
    pub fn drop_acks(&self, block: u32, times: u32) {
        self.state().script.drop_acks.insert(block, times);
    }

    /// Never acknowledge `block`.
    pub fn never_ack(&self, block: u32) {
        self.state().script.never_ack.insert(block);
    }

    /// Acknowledge `block` as if it were `block + 1`.
    pub fn misack(&self, block: u32) {
        self.state().script.misack.insert(block);
    }

    /// Echo block indexes in acks.
    pub fn indexed_acks(&self, on: bool) {
        self.state().script.indexed_acks = on;
    }

    /// Stop answering status queries.
    pub fn silence_status(&self, on: bool) {
        self.state().script.silent_status = on;
    }

    /// Leave the next `times` status queries unanswered.
    pub fn drop_status(&self, times: u32) {
        self.state().script.drop_status = times;
    }

    /// Garble the state code of the next `times` status replies.
    pub fn corrupt_status(&self, times: u32) {
        self.state().script.corrupt_status = times;
    }

    /// Refuse the next upload announcement.
    pub fn refuse_upload(&self, on: bool) {
        self.state().script.refuse_upload = on;
    }

    /// Fail every later read and write.
    pub fn unplug(&self) {
        self.state().script.unplugged = true;
    }

    /// Everything received so far, in order.
    pub fn events(&self) -> Vec<SimEvent> {
        self.state().events.clone()
    }

    /// Control commands received so far.
    pub fn commands(&self) -> Vec<Command> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Command(c) => Some(*c),
                SimEvent::Block { .. } => None,
            })
            .collect()
    }

    /// Block transmissions `(index, len)` in arrival order.
    pub fn blocks(&self) -> Vec<(u32, usize)> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Block { index, len } => Some((*index, *len)),
                SimEvent::Command(_) => None,
            })
            .collect()
    }

    /// Container bytes reassembled from acknowledged blocks.
    pub fn uploaded(&self) -> Vec<u8> {
        self.state().accepted.values().flatten().copied().collect()
    }

    /// Total bytes written by the host.
    pub fn bytes_received(&self) -> usize {
        self.state().bytes_received
    }

    /// Forget recorded events.
    pub fn clear_events(&self) {
        self.state().events.clear();
    }
}
