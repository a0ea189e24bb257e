//! # Printer Session
//!
//! A [`Session`] owns one connected printer: the serial link, the latest
//! [`StatusSnapshot`], and the control surface (home, filament, pause, resume,
//! cancel).
//!
//! ## State machine
//!
//! ```text
//! Disconnected → Connecting → Connected ⇄ Busy(Printing | Paused | Uploading)
//!                                 │
//!                                 └──────→ Error (absorbing, reconnect to leave)
//! ```
//!
//! `Busy(Printing)` and `Busy(Paused)` are read from the printer's reported
//! state code; `Busy(Uploading)` is held while the upload manager owns the link.
//!
//! ## Concurrency
//!
//! A background thread polls status every [`SessionConfig::poll_interval`].
//! Every exchange (poll, control command, or a whole upload) takes the link
//! mutex, so frames are never interleaved. The poller skips a tick while the
//! link is held. [`Session::disconnect`] never waits for the mutex: it raises
//! the link's abort flag and the holder closes the link when it lets go. The snapshot lives in a
//! `tokio::sync::watch` cell: the poller replaces it whole, readers clone an
//! `Arc` and never block the writer.

mod link;

pub use link::Link;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{PreconditionError, ProtocolError, VinciError};
use crate::printer::models::{self, PrinterModel};
use crate::printer::StateClass;
use crate::protocol::commands::{self, Command, Frame};
use crate::protocol::{Reply, StatusSnapshot};
use crate::transport::{SerialTransport, Transport};

/// What the session is busy with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyKind {
    Printing,
    Paused,
    Uploading,
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "activity", rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Busy(BusyKind),
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Busy(BusyKind::Printing) => write!(f, "busy (printing)"),
            SessionState::Busy(BusyKind::Paused) => write!(f, "busy (paused)"),
            SessionState::Busy(BusyKind::Uploading) => write!(f, "busy (uploading)"),
            SessionState::Error => write!(f, "error"),
        }
    }
}

/// Link ownership as tracked by the session itself.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lifecycle {
    Connected,
    Uploading,
    Failed(String),
    Disconnected,
}

struct Shared {
    port: String,
    config: SessionConfig,
    link: Mutex<Option<Link>>,
    status: watch::Sender<Arc<StatusSnapshot>>,
    lifecycle: Mutex<Lifecycle>,
    /// Set after a cancel is acknowledged; cleared by the next poll.
    cancel_pending: AtomicBool,
    /// Checked by the upload manager between blocks.
    upload_cancel: AtomicBool,
    /// Aborts the exchange in flight on the link.
    link_abort: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The guard, or `None` if someone else holds the mutex.
fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

impl Shared {
    fn lifecycle(&self) -> Lifecycle {
        lock(&self.lifecycle).clone()
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        *lock(&self.lifecycle) = next;
    }

    fn publish(&self, snapshot: StatusSnapshot) {
        self.cancel_pending.store(false, Ordering::SeqCst);
        self.status.send_replace(Arc::new(snapshot));
    }

    /// Close the link and mark the session failed. Caller holds the link lock.
    fn fail(&self, link: &mut Option<Link>, reason: String) {
        if let Some(mut l) = link.take() {
            l.close();
        }
        warn!(port = %self.port, %reason, "session torn down");
        let mut lifecycle = lock(&self.lifecycle);
        if *lifecycle != Lifecycle::Disconnected {
            *lifecycle = Lifecycle::Failed(reason);
        }
    }

    /// Close the link if the session was disconnected while it was held.
    /// Caller holds the link lock.
    fn release(&self, link: &mut Option<Link>) {
        if self.lifecycle() == Lifecycle::Disconnected
            && let Some(mut l) = link.take()
        {
            l.close();
        }
    }

    /// One request/response exchange under the link lock.
    fn exchange(&self, frame: &Frame, timeout: Duration) -> Result<Reply, VinciError> {
        let mut guard = lock(&self.link);
        let link = guard.as_mut().ok_or(PreconditionError::NotConnected)?;
        let result = link.exchange(frame, timeout);
        if let Err(e) = &result
            && e.is_fatal_to_session()
        {
            self.fail(&mut guard, e.to_string());
        }
        self.release(&mut guard);
        result
    }

    fn state(&self) -> SessionState {
        match self.lifecycle() {
            Lifecycle::Disconnected => SessionState::Disconnected,
            Lifecycle::Failed(_) => SessionState::Error,
            Lifecycle::Uploading => SessionState::Busy(BusyKind::Uploading),
            Lifecycle::Connected => {
                if self.cancel_pending.load(Ordering::SeqCst) {
                    return SessionState::Connected;
                }
                match self.status.borrow().state_class() {
                    StateClass::Heating | StateClass::Printing => {
                        SessionState::Busy(BusyKind::Printing)
                    }
                    StateClass::Paused => SessionState::Busy(BusyKind::Paused),
                    _ => SessionState::Connected,
                }
            }
        }
    }
}

/// Handle to one connected printer.
///
/// Sessions are explicitly owned; any number can exist side by side. Dropping
/// the handle disconnects.
pub struct Session {
    shared: Arc<Shared>,
    model_id: String,
    model: Option<&'static PrinterModel>,
    stop: Mutex<Option<mpsc::Sender<()>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Open a serial port and connect.
    pub fn connect(port: &str, config: SessionConfig) -> Result<Self, VinciError> {
        info!(port, "connecting");
        let mut transport = SerialTransport::open(port)?;
        transport.set_write_timeout(config.command_timeout);
        Self::open(Box::new(transport), config)
    }

    /// Connect over an already-open transport.
    ///
    /// Performs the handshake and reads the initial snapshot. On failure the
    /// transport is closed and no session is created.
    pub fn open(transport: Box<dyn Transport>, config: SessionConfig) -> Result<Self, VinciError> {
        let port = transport.name().to_string();
        debug!(port = %port, state = %SessionState::Connecting, "handshake");
        let mut link = Link::new(transport);
        let link_abort = link.abort_handle();
        let handshake = commands::encode(Command::Handshake, b"")?;
        let snapshot = match link.exchange(&handshake, config.command_timeout) {
            Ok(Reply::Status(snapshot)) => snapshot,
            Ok(other) => {
                link.close();
                return Err(VinciError::Connect(format!(
                    "handshake answered with {}",
                    other.describe()
                )));
            }
            Err(e) => {
                link.close();
                return Err(VinciError::Connect(format!("handshake failed: {e}")));
            }
        };

        let model_id = snapshot.model_id.clone();
        let model = models::lookup(&model_id);
        match model {
            Some(m) => info!(port = %port, model = m.name, state = %snapshot.state_name(), "connected"),
            None => warn!(port = %port, model_id = %model_id, "connected to unrecognised model"),
        }

        let (status, _) = watch::channel(Arc::new(snapshot));
        let shared = Arc::new(Shared {
            port,
            config,
            link: Mutex::new(Some(link)),
            status,
            lifecycle: Mutex::new(Lifecycle::Connected),
            cancel_pending: AtomicBool::new(false),
            upload_cancel: AtomicBool::new(false),
            link_abort,
        });

        let (stop_tx, stop_rx) = mpsc::channel();
        let poller_shared = shared.clone();
        let poller = std::thread::Builder::new()
            .name("vinci-poller".to_string())
            .spawn(move || poll_loop(&poller_shared, &stop_rx))?;

        Ok(Self {
            shared,
            model_id,
            model,
            stop: Mutex::new(Some(stop_tx)),
            poller: Mutex::new(Some(poller)),
        })
    }

    /// Name of the connected endpoint.
    pub fn port(&self) -> &str {
        &self.shared.port
    }

    /// Model identifier reported at handshake.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Known model record, if the identifier is in the table.
    pub fn model(&self) -> Option<&'static PrinterModel> {
        self.model
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Why the session entered [`SessionState::Error`], if it did.
    pub fn failure(&self) -> Option<String> {
        match self.shared.lifecycle() {
            Lifecycle::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Latest snapshot.
    pub fn status(&self) -> Arc<StatusSnapshot> {
        self.shared.status.borrow().clone()
    }

    /// Receiver notified whenever a new snapshot is published.
    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.shared.status.subscribe()
    }

    /// Query status now instead of waiting for the next poll.
    pub fn refresh(&self) -> Result<Arc<StatusSnapshot>, VinciError> {
        self.require_link("refresh")?;
        let frame = commands::encode(Command::QueryStatus, b"")?;
        match self.shared.exchange(&frame, self.shared.config.command_timeout)? {
            Reply::Status(snapshot) => {
                self.shared.publish(snapshot);
                Ok(self.status())
            }
            other => Err(ProtocolError::UnexpectedReply {
                expected: "status",
                got: other.describe(),
            }
            .into()),
        }
    }

    pub fn home(&self) -> Result<(), VinciError> {
        self.require("home", |s| s == SessionState::Connected)?;
        self.control(Command::Home)
    }

    pub fn load_filament(&self) -> Result<(), VinciError> {
        self.require("load filament", |s| s == SessionState::Connected)?;
        self.control(Command::LoadFilament)
    }

    pub fn unload_filament(&self) -> Result<(), VinciError> {
        self.require("unload filament", |s| s == SessionState::Connected)?;
        self.control(Command::UnloadFilament)
    }

    pub fn pause(&self) -> Result<(), VinciError> {
        self.require("pause", |s| s == SessionState::Busy(BusyKind::Printing))?;
        self.control(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), VinciError> {
        self.require("resume", |s| s == SessionState::Busy(BusyKind::Paused))?;
        self.control(Command::Resume)
    }

    /// Cancel whatever the printer is busy with.
    ///
    /// During an upload this only raises the cancellation flag; the upload
    /// manager stops before the next block. Otherwise a cancel frame is sent
    /// and the session reports `Connected` until the next poll says otherwise.
    pub fn cancel(&self) -> Result<(), VinciError> {
        let state = self.require("cancel", |s| matches!(s, SessionState::Busy(_)))?;
        if state == SessionState::Busy(BusyKind::Uploading) {
            info!(port = %self.shared.port, "upload cancellation requested");
            self.shared.upload_cancel.store(true, Ordering::SeqCst);
            return Ok(());
        }
        self.control(Command::Cancel)?;
        self.shared.cancel_pending.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Close the link and stop the poller. Always permitted and idempotent.
    ///
    /// Does not wait for an upload in flight. Its pending exchange is aborted
    /// and it ends as cancelled. The upload closes the link when it lets go.
    pub fn disconnect(&self) {
        self.shared.upload_cancel.store(true, Ordering::SeqCst);
        let was = self.shared.lifecycle();
        self.shared.set_lifecycle(Lifecycle::Disconnected);
        self.shared.link_abort.store(true, Ordering::SeqCst);
        if let Some(stop) = lock(&self.stop).take() {
            let _ = stop.send(());
        }
        match try_lock(&self.shared.link) {
            Some(mut guard) => {
                if let Some(mut link) = guard.take() {
                    link.close();
                }
            }
            None => debug!(port = %self.shared.port, "link busy, closing when released"),
        }
        if let Some(poller) = lock(&self.poller).take() {
            let _ = poller.join();
        }
        if was != Lifecycle::Disconnected {
            info!(port = %self.shared.port, "disconnected");
        }
    }

    /// Run `f` with exclusive use of the link for a whole upload.
    ///
    /// The session reports `Busy(Uploading)` meanwhile and the poller skips
    /// its ticks. The flag passed to `f` is raised by [`Session::cancel`] or
    /// [`Session::disconnect`].
    pub(crate) fn with_upload<R>(
        &self,
        f: impl FnOnce(&mut Link, &AtomicBool) -> Result<R, VinciError>,
    ) -> Result<R, VinciError> {
        let mut guard = lock(&self.shared.link);
        let state = self.shared.state();
        if state != SessionState::Connected {
            return Err(PreconditionError::InvalidState {
                operation: "upload",
                state: state.to_string(),
            }
            .into());
        }
        let link = guard.as_mut().ok_or(PreconditionError::NotConnected)?;
        self.shared.upload_cancel.store(false, Ordering::SeqCst);
        self.shared.set_lifecycle(Lifecycle::Uploading);

        let result = f(link, &self.shared.upload_cancel);

        {
            let mut lifecycle = lock(&self.shared.lifecycle);
            if *lifecycle == Lifecycle::Uploading {
                *lifecycle = Lifecycle::Connected;
            }
        }
        if let Err(e) = &result
            && e.is_fatal_to_session()
        {
            self.shared.fail(&mut guard, e.to_string());
        }
        self.shared.release(&mut guard);
        result
    }

    /// Send a control frame and interpret the reply.
    pub(crate) fn control(&self, command: Command) -> Result<(), VinciError> {
        let frame = commands::encode(command, b"")?;
        debug!(port = %self.shared.port, ?command, "control");
        match self.shared.exchange(&frame, self.shared.config.command_timeout)? {
            Reply::Ack { .. } => Ok(()),
            Reply::Status(snapshot) => {
                self.shared.publish(snapshot);
                Ok(())
            }
            Reply::Error(code) => Err(ProtocolError::Rejected(code).into()),
        }
    }

    fn require_link(&self, operation: &'static str) -> Result<SessionState, PreconditionError> {
        let state = self.state();
        match state {
            SessionState::Disconnected => Err(PreconditionError::NotConnected),
            SessionState::Error => Err(PreconditionError::InvalidState {
                operation,
                state: state.to_string(),
            }),
            _ => Ok(state),
        }
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: impl Fn(SessionState) -> bool,
    ) -> Result<SessionState, PreconditionError> {
        let state = self.require_link(operation)?;
        if allowed(state) {
            Ok(state)
        } else {
            Err(PreconditionError::InvalidState {
                operation,
                state: state.to_string(),
            })
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("port", &self.shared.port)
            .field("model_id", &self.model_id)
            .field("state", &self.state())
            .finish()
    }
}

fn poll_loop(shared: &Shared, stop: &mpsc::Receiver<()>) {
    let threshold = shared.config.poll_failure_threshold.max(1);
    let mut failures = 0u32;
    let frame = match commands::encode(Command::QueryStatus, b"") {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "poller cannot encode status query");
            return;
        }
    };

    loop {
        match stop.recv_timeout(shared.config.poll_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        // An upload or command holds the link; try again next tick.
        let Some(mut guard) = try_lock(&shared.link) else {
            continue;
        };
        let Some(link) = guard.as_mut() else {
            return;
        };
        let error = match link.exchange(&frame, shared.config.command_timeout) {
            Ok(Reply::Status(snapshot)) => {
                failures = 0;
                shared.publish(snapshot);
                continue;
            }
            Ok(other) => VinciError::from(ProtocolError::UnexpectedReply {
                expected: "status",
                got: other.describe(),
            }),
            Err(e) => e,
        };

        if error.is_fatal_to_session() {
            shared.fail(&mut guard, error.to_string());
            return;
        }
        failures += 1;
        warn!(port = %shared.port, failures, threshold, error = %error, "status poll failed");
        if failures >= threshold {
            shared.fail(
                &mut guard,
                format!("{failures} consecutive status polls failed: {error}"),
            );
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulatedPrinter;

    fn quiet_config() -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_secs(3600),
            command_timeout: Duration::from_millis(50),
            block_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    #[test]
    fn test_connect_reads_model() {
        let (printer, _handle) = SimulatedPrinter::with_model("dv1JP0A000");
        let session = Session::open(Box::new(printer), quiet_config()).unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.model_id(), "dv1JP0A000");
        assert!(session.model().is_some());
    }

    #[test]
    fn test_silent_handshake_fails() {
        let (printer, handle) = SimulatedPrinter::new();
        handle.silence_status(true);
        let err = Session::open(Box::new(printer), quiet_config()).unwrap_err();
        assert!(matches!(err, VinciError::Connect(_)));
    }

    #[test]
    fn test_home_requires_connected() {
        let (printer, handle) = SimulatedPrinter::new();
        let session = Session::open(Box::new(printer), quiet_config()).unwrap();
        session.home().unwrap();
        assert!(handle.commands().contains(&Command::Home));

        handle.set_state(9002);
        session.refresh().unwrap();
        assert_eq!(session.state(), SessionState::Busy(BusyKind::Printing));
        let err = session.home().unwrap_err();
        assert!(matches!(
            err,
            VinciError::Precondition(PreconditionError::InvalidState { operation: "home", .. })
        ));
    }

    #[test]
    fn test_cancel_is_optimistic() {
        let (printer, handle) = SimulatedPrinter::new();
        handle.set_state(9002);
        let session = Session::open(Box::new(printer), quiet_config()).unwrap();
        assert_eq!(session.state(), SessionState::Busy(BusyKind::Printing));
        session.cancel().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (printer, _handle) = SimulatedPrinter::new();
        let session = Session::open(Box::new(printer), quiet_config()).unwrap();
        session.disconnect();
        session.disconnect();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.home().unwrap_err(),
            VinciError::Precondition(PreconditionError::NotConnected)
        ));
    }

    #[test]
    fn test_unplug_tears_down() {
        let (printer, handle) = SimulatedPrinter::new();
        let session = Session::open(Box::new(printer), quiet_config()).unwrap();
        handle.unplug();
        assert!(session.home().is_err());
        assert_eq!(session.state(), SessionState::Error);
        assert!(session.failure().is_some());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            SessionState::Busy(BusyKind::Uploading).to_string(),
            "busy (uploading)"
        );
    }
}
