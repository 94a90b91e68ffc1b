//! Probing failures during encoder negotiation are diagnostics, not warnings.
//!
//! Installs a process-wide logger, so this file holds a single test.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::{Level, LevelFilter, Log, Metadata, Record};

use detect_streamer::encode::scripted::ScriptedExecutor;
use detect_streamer::{EncoderBackend, EncoderCandidate, PipelineConfig, PipelineWriterBackend};

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
fn failed_candidate_is_logged_below_warning_and_next_is_committed() -> Result<()> {
    let logger = CaptureLogger::default();
    let records = logger.records.clone();
    log::set_boxed_logger(Box::new(logger)).expect("logger installed once");
    log::set_max_level(LevelFilter::Trace);

    let config = PipelineConfig {
        width: 640,
        height: 480,
        fps: 30,
        bitrate_kbps: 500,
        ..PipelineConfig::default()
    };
    let executor = ScriptedExecutor::new().erroring("enc-a").accepting("enc-b");
    let mut writer = PipelineWriterBackend::with_candidates(
        Box::new(executor),
        vec![
            EncoderCandidate::new("enc-a", "appsrc name=src ! enc-a ! rtph264pay ! udpsink"),
            EncoderCandidate::new("enc-b", "appsrc name=src ! enc-b ! rtph264pay ! udpsink"),
        ],
    );

    writer.open(&config)?;
    assert_eq!(writer.encoder().as_deref(), Some("enc-b"));
    writer.close()?;

    let records = records.lock().unwrap().clone();
    let about_a: Vec<_> = records
        .iter()
        .filter(|(_, msg)| msg.contains("enc-a"))
        .collect();
    assert!(!about_a.is_empty(), "probe of enc-a was not logged");
    assert!(
        about_a.iter().all(|(level, _)| *level == Level::Debug),
        "{:?}",
        about_a
    );
    assert!(records
        .iter()
        .all(|(level, _)| *level != Level::Warn && *level != Level::Error));
    assert!(records
        .iter()
        .any(|(level, msg)| *level == Level::Info && msg.contains("enc-b")));
    Ok(())
}
