//! # Printer Scenarios
//!
//! End-to-end runs against the simulated printer: sessions, uploads with
//! injected faults, control preconditions and whole print jobs.
//!
//! Timeouts are shortened so retry paths finish quickly. The poll interval
//! is long unless a test exercises the poller.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use vinci::config::SessionConfig;
use vinci::convert::{self, ConversionProfile};
use vinci::error::{ConversionError, PreconditionError, ProtocolError, SlicerError, UploadError};
use vinci::job::{self, JobResult, JobStage, Quality, Slicer};
use vinci::printer::PrinterModel;
use vinci::protocol::Command;
use vinci::session::BusyKind;
use vinci::transport::{SimHandle, SimulatedPrinter};
use vinci::upload::{self, UploadOutcome};
use vinci::{Session, SessionState, VinciError};

const TOOLPATH: &[u8] = b";TIME:900\n;Filament used: 1.5m\n;LAYER_COUNT:2\nG28\n;LAYER:0\nG0 X10 Y10\nG1 X20 Y10 E1.2\n;LAYER:1\nG1 X20 Y20 E2.4\n";

fn fast_config() -> SessionConfig {
    SessionConfig {
        poll_interval: Duration::from_secs(3600),
        command_timeout: Duration::from_millis(30),
        block_timeout: Duration::from_millis(30),
        ..Default::default()
    }
}

fn connect(model_id: &str) -> (Session, SimHandle) {
    let (printer, handle) = SimulatedPrinter::with_model(model_id);
    let session = Session::open(Box::new(printer), fast_config()).unwrap();
    (session, handle)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// ============================================================================
// Uploads
// ============================================================================

#[test]
fn test_upload_splits_into_blocks() {
    let (session, handle) = connect("dv1MX0A000");
    let data = pattern(20 * 1024);

    let outcome = upload::upload(&session, "part.gcode", &data, |_, _| {}).unwrap();

    assert!(outcome.is_completed());
    assert_eq!(handle.blocks(), vec![(0, 8192), (1, 8192), (2, 4096)]);
    assert_eq!(handle.uploaded(), data);
    assert_eq!(outcome.report().total_retries(), 0);
    assert_eq!(session.state(), SessionState::Connected);

    let commands = handle.commands();
    assert_eq!(commands.first(), Some(&Command::QueryStatus));
    assert!(commands.contains(&Command::BeginUpload));
    assert_eq!(commands.last(), Some(&Command::EndUpload));
}

#[test]
fn test_dropped_acks_are_retried() {
    let (session, handle) = connect("dv1MX0A000");
    handle.drop_acks(1, 2);
    let data = pattern(20 * 1024);

    let outcome = upload::upload(&session, "part.gcode", &data, |_, _| {}).unwrap();

    let report = outcome.report();
    assert_eq!(report.blocks[1].retries, 2);
    assert_eq!(report.total_retries(), 2);
    assert_eq!(
        handle.blocks(),
        vec![(0, 8192), (1, 8192), (1, 8192), (1, 8192), (2, 4096)]
    );
    assert_eq!(handle.uploaded(), data);
}

#[test]
fn test_unacknowledged_block_aborts() {
    let (session, handle) = connect("dv1MX0A000");
    handle.never_ack(0);

    let err = upload::upload(&session, "part.gcode", &pattern(20 * 1024), |_, _| {}).unwrap_err();

    assert!(matches!(
        err,
        VinciError::Upload(UploadError::BlockTimeout {
            block: 0,
            attempts: 4
        })
    ));
    assert_eq!(handle.blocks(), vec![(0, 8192); 4]);
    assert!(!handle.commands().contains(&Command::EndUpload));
    // Timeouts leave the link usable.
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn test_mismatched_ack_aborts() {
    let (session, handle) = connect("dv1MX0A000");
    handle.misack(0);

    let err = upload::upload(&session, "part.gcode", &pattern(10_000), |_, _| {}).unwrap_err();

    assert!(matches!(
        err,
        VinciError::Upload(UploadError::AckMismatch { sent: 0, acked: 1 })
    ));
    assert_eq!(handle.blocks(), vec![(0, 8192)]);
}

#[test]
fn test_cancel_during_upload() {
    let (session, handle) = connect("dv1MX0A000");
    let data = pattern(30_000);

    let outcome = upload::upload(&session, "part.gcode", &data, |done, _| {
        if done == 8192 {
            assert_eq!(session.state(), SessionState::Busy(BusyKind::Uploading));
            session.cancel().unwrap();
        }
    })
    .unwrap();

    match outcome {
        UploadOutcome::Cancelled(report) => {
            assert_eq!(report.blocks.len(), 1);
            assert_eq!(report.bytes_acknowledged(), 8192);
        }
        UploadOutcome::Completed(_) => panic!("upload should have been cancelled"),
    }
    assert_eq!(handle.blocks(), vec![(0, 8192)]);
    assert!(!handle.commands().contains(&Command::Cancel));
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn test_unplug_during_upload_tears_down() {
    let (session, handle) = connect("dv1MX0A000");

    let err = upload::upload(&session, "part.gcode", &pattern(20_000), |done, _| {
        if done == 8192 {
            handle.unplug();
        }
    })
    .unwrap_err();

    assert!(err.is_fatal_to_session());
    assert_eq!(session.state(), SessionState::Error);
    assert!(session.failure().is_some());
}

#[test]
fn test_disconnect_does_not_wait_for_stalled_upload() {
    let (printer, handle) = SimulatedPrinter::with_model("dv1MX0A000");
    let config = SessionConfig {
        block_timeout: Duration::from_millis(500),
        ..fast_config()
    };
    let session = Session::open(Box::new(printer), config).unwrap();
    handle.never_ack(1);
    let data = pattern(30_000);

    std::thread::scope(|scope| {
        let upload = scope.spawn(|| upload::upload(&session, "part.gcode", &data, |_, _| {}));
        assert!(wait_for(|| handle.blocks().contains(&(1, 8192))));

        let started = Instant::now();
        session.disconnect();
        assert!(started.elapsed() < Duration::from_millis(400));

        let outcome = upload.join().unwrap().unwrap();
        assert!(matches!(outcome, UploadOutcome::Cancelled(ref r) if r.blocks.len() == 1));
    });

    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.failure().is_none());
    assert!(handle.blocks().len() < 5);
    assert!(!handle.commands().contains(&Command::EndUpload));
}

#[test]
fn test_upload_completes_while_poller_runs() {
    let (printer, handle) = SimulatedPrinter::with_model("dv1MX0A000");
    let config = SessionConfig {
        poll_interval: Duration::from_millis(5),
        ..fast_config()
    };
    let session = Session::open(Box::new(printer), config).unwrap();
    let data = pattern(40_000);

    let outcome = upload::upload(&session, "part.gcode", &data, |_, _| {
        std::thread::sleep(Duration::from_millis(10));
    })
    .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.report().total_retries(), 0);
    assert_eq!(handle.uploaded(), data);
    assert_eq!(session.state(), SessionState::Connected);
}

// ============================================================================
// Session control
// ============================================================================

#[test]
fn test_pause_and_resume_follow_print_state() {
    let (session, handle) = connect("dv1MX0A000");

    let err = session.pause().unwrap_err();
    assert!(matches!(
        err,
        VinciError::Precondition(PreconditionError::InvalidState {
            operation: "pause",
            ..
        })
    ));

    handle.set_state(9002);
    session.refresh().unwrap();
    session.pause().unwrap();
    session.refresh().unwrap();
    assert_eq!(session.state(), SessionState::Busy(BusyKind::Paused));

    assert!(session.pause().is_err());
    session.resume().unwrap();
    session.refresh().unwrap();
    assert_eq!(session.state(), SessionState::Busy(BusyKind::Printing));

    let sent: Vec<Command> = handle
        .commands()
        .into_iter()
        .filter(|c| matches!(c, Command::Pause | Command::Resume))
        .collect();
    assert_eq!(sent, vec![Command::Pause, Command::Resume]);
}

#[test]
fn test_cancel_print_reads_connected_until_next_poll() {
    let (session, handle) = connect("dv1MX0A000");
    handle.set_state(9002);
    session.refresh().unwrap();

    session.cancel().unwrap();
    assert_eq!(session.state(), SessionState::Connected);

    session.refresh().unwrap();
    assert!(session.status().is_idle());
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn test_poll_failures_move_session_to_error() {
    let (printer, handle) = SimulatedPrinter::new();
    let config = SessionConfig {
        poll_interval: Duration::from_millis(10),
        command_timeout: Duration::from_millis(10),
        block_timeout: Duration::from_millis(10),
        poll_failure_threshold: 3,
        ..Default::default()
    };
    let session = Session::open(Box::new(printer), config).unwrap();
    handle.silence_status(true);

    assert!(wait_for(|| session.state() == SessionState::Error));
    assert!(session.home().is_err());
    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn test_corrupt_status_is_not_published() {
    let (session, handle) = connect("dv1MX0A000");
    handle.set_state(9002);
    session.refresh().unwrap();
    assert_eq!(session.state(), SessionState::Busy(BusyKind::Printing));

    handle.corrupt_status(1);
    let err = session.refresh().unwrap_err();

    assert!(matches!(
        err,
        VinciError::Protocol(ProtocolError::Desync(_))
    ));
    assert_eq!(session.status().state_code, 9002);
    assert_eq!(session.state(), SessionState::Busy(BusyKind::Printing));
    assert!(matches!(
        session.home(),
        Err(VinciError::Precondition(PreconditionError::InvalidState { .. }))
    ));
}

#[test]
fn test_missed_polls_below_threshold_are_tolerated() {
    let (printer, handle) = SimulatedPrinter::new();
    let config = SessionConfig {
        poll_interval: Duration::from_millis(10),
        command_timeout: Duration::from_millis(20),
        poll_failure_threshold: 3,
        ..fast_config()
    };
    let session = Session::open(Box::new(printer), config).unwrap();
    handle.set_state(9002);
    assert!(wait_for(
        || session.state() == SessionState::Busy(BusyKind::Printing)
    ));

    let polls = || {
        handle
            .commands()
            .into_iter()
            .filter(|c| *c == Command::QueryStatus)
            .count()
    };
    // Two misses then a good poll, twice over: five misses in all, never
    // three in a row.
    for _ in 0..2 {
        let before = polls();
        handle.drop_status(2);
        assert!(wait_for(|| polls() >= before + 3));
        assert!(wait_for(|| polls() >= before + 4));
        assert_eq!(session.state(), SessionState::Busy(BusyKind::Printing));
        assert!(session.failure().is_none());
    }
}

#[test]
fn test_poller_publishes_snapshots() {
    let (printer, handle) = SimulatedPrinter::new();
    let config = SessionConfig {
        poll_interval: Duration::from_millis(10),
        command_timeout: Duration::from_millis(30),
        ..Default::default()
    };
    let session = Session::open(Box::new(printer), config).unwrap();

    handle.set_state(9002);
    assert!(wait_for(
        || session.state() == SessionState::Busy(BusyKind::Printing)
    ));
}

#[test]
fn test_operations_after_disconnect() {
    let (session, handle) = connect("dv1MX0A000");
    session.disconnect();
    handle.clear_events();

    assert!(matches!(
        session.home(),
        Err(VinciError::Precondition(PreconditionError::NotConnected))
    ));
    assert!(matches!(
        job::check_ready(&session),
        Err(VinciError::Precondition(PreconditionError::NotConnected))
    ));
    assert!(handle.events().is_empty());
}

// ============================================================================
// Print jobs
// ============================================================================

#[test]
fn test_print_toolpath_end_to_end() {
    let (session, handle) = connect("dv1JP0A000");
    let mut stages = Vec::new();

    let result = job::print_toolpath(
        &session,
        "part.gcode",
        TOOLPATH,
        Quality::Normal,
        &mut |p| stages.push(p.stage),
    )
    .unwrap();

    let JobResult::Started(report) = result else {
        panic!("job should have started");
    };
    assert_eq!(report.model_id, "dv1JP0A000");
    assert_eq!(report.info.print_time_s, 900);
    assert_eq!(report.info.layer_count, 2);
    assert_eq!(report.container_bytes, handle.uploaded().len());

    assert_eq!(handle.commands().last(), Some(&Command::StartPrint));
    assert_eq!(handle.status().state_code, 9002);
    assert_eq!(session.state(), SessionState::Busy(BusyKind::Printing));

    assert_eq!(stages.first(), Some(&JobStage::Converting));
    assert_eq!(stages.last(), Some(&JobStage::Done));
    assert!(stages.contains(&JobStage::Uploading));

    // What reached the printer decrypts to the prepared toolpath.
    let profile = ConversionProfile::for_model("dv1JP0A000").unwrap();
    let plaintext = convert::invert(&handle.uploaded(), &profile).unwrap();
    let text = String::from_utf8(plaintext).unwrap();
    assert!(text.starts_with("; machine = dv1JP0A000\n"));
    assert!(text.contains("G1 X10 Y10\n"));
    assert!(!text.contains("G0 "));
}

#[test]
fn test_busy_printer_refuses_job_before_sending() {
    let (session, handle) = connect("dv1MX0A000");
    handle.set_state(9002);
    session.refresh().unwrap();
    let before = handle.bytes_received();
    handle.clear_events();

    let err = job::print_toolpath(&session, "part.gcode", TOOLPATH, Quality::Normal, &mut |_| {})
        .unwrap_err();

    assert!(matches!(
        err,
        VinciError::Precondition(PreconditionError::NotIdle { code: 9002, .. })
    ));
    assert_eq!(handle.bytes_received(), before);
    assert!(handle.events().is_empty());
}

#[test]
fn test_unknown_model_refuses_job() {
    let (session, handle) = connect("dvZZZZZZZZ");
    handle.clear_events();

    let err = job::print_toolpath(&session, "part.gcode", TOOLPATH, Quality::Normal, &mut |_| {})
        .unwrap_err();

    assert!(matches!(
        err,
        VinciError::Conversion(ConversionError::UnsupportedModel(ref id)) if id == "dvZZZZZZZZ"
    ));
    assert!(handle.events().is_empty());
}

#[test]
fn test_refused_upload_fails_job() {
    let (session, handle) = connect("dv1MX0A000");
    handle.refuse_upload(true);

    let err = job::print_toolpath(&session, "part.gcode", TOOLPATH, Quality::Normal, &mut |_| {})
        .unwrap_err();

    assert!(matches!(err, VinciError::Upload(UploadError::Refused(_))));
    assert!(!handle.commands().contains(&Command::StartPrint));
    assert_eq!(session.state(), SessionState::Connected);
}

/// Writes a fixed toolpath instead of running a real engine.
struct CannedSlicer {
    output: PathBuf,
}

impl Slicer for CannedSlicer {
    fn slice(
        &self,
        geometry: &Path,
        model: &PrinterModel,
        quality: Quality,
    ) -> Result<PathBuf, SlicerError> {
        assert_eq!(geometry.extension().and_then(|e| e.to_str()), Some("stl"));
        assert_eq!(model.id, "dv1MX0A000");
        assert_eq!(quality, Quality::Draft);
        std::fs::write(&self.output, TOOLPATH)?;
        Ok(self.output.clone())
    }
}

#[test]
fn test_print_from_geometry_uses_slicer() {
    let (session, handle) = connect("dv1MX0A000");
    let dir = std::env::temp_dir().join(format!("vinci-scenario-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let slicer = CannedSlicer {
        output: dir.join("sliced.gcode"),
    };
    let mut stages = Vec::new();

    let result = job::run_print_from_geometry(
        &session,
        &dir.join("bracket.stl"),
        Quality::Draft,
        &slicer,
        |p| stages.push(p.stage),
    )
    .unwrap();

    let JobResult::Started(report) = result else {
        panic!("job should have started");
    };
    assert_eq!(report.name, "bracket.gcode");
    assert_eq!(stages.first(), Some(&JobStage::Slicing));
    assert_eq!(handle.commands().last(), Some(&Command::StartPrint));
    assert!(!slicer.output.exists());

    let _ = std::fs::remove_dir_all(&dir);
}
