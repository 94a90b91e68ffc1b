//! A session that never starts still ends with the usual stop line.
//!
//! Installs a process-wide logger, so this file holds a single test.

use std::sync::{Arc, Mutex};

use log::{Level, LevelFilter, Log, Metadata, Record};

use detect_streamer::{SessionReport, SessionState, StopReason, StreamError};

#[derive(Clone, Default)]
struct CaptureLogger {
    records: Arc<Mutex<Vec<(Level, String)>>>,
}

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut records) = self.records.lock() {
            records.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

#[test]
fn unresolvable_model_reports_zero_frames_and_fails() {
    let logger = CaptureLogger::default();
    let records = logger.records.clone();
    log::set_boxed_logger(Box::new(logger)).expect("logger installed once");
    log::set_max_level(LevelFilter::Trace);

    let report = SessionReport::not_started(StreamError::ModelLoadFailed {
        model: "onnx://missing".to_string(),
        reason: "no backend for scheme".to_string(),
    });

    assert!(matches!(
        report.stop,
        StopReason::Failed(StreamError::ModelLoadFailed { .. })
    ));
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.frames_processed, 0);
    assert_eq!(report.final_state, SessionState::Failed);
    assert_eq!(report.encoder, None);

    let records = records.lock().unwrap().clone();
    let stop_lines: Vec<_> = records
        .iter()
        .filter(|(_, msg)| msg.starts_with("Session: stopped"))
        .collect();
    assert_eq!(stop_lines.len(), 1, "{:?}", records);
    let (level, msg) = stop_lines[0];
    assert_eq!(*level, Level::Error);
    assert!(msg.contains("onnx://missing"), "{}", msg);
    assert!(msg.contains("after 0 frames, 0 transmitted"), "{}", msg);
}
