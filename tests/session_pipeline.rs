use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use detect_streamer::detect::{DetectorCall, ScriptedDetector};
use detect_streamer::encode::scripted::{ScriptedExecutor, ScriptedLauncher};
use detect_streamer::encode::{CodecTag, ProcessEncoderBackend};
use detect_streamer::{
    BoundingBox, CancelToken, Detection, EncoderBackend, EncoderCandidate, Frame, PipelineConfig,
    PipelineWriterBackend, PreviewEvent, Presenter, ReplaySource, SessionState, StopReason,
    StreamError, StreamOrchestrator,
};

const W: u32 = 320;
const H: u32 = 240;

fn config() -> PipelineConfig {
    PipelineConfig {
        width: W,
        height: H,
        headless: true,
        ..PipelineConfig::default()
    }
}

fn person(x: f32) -> Detection {
    Detection::new(0, "person", 0.8, BoundingBox::new(x, 150.0, x + 40.0, 200.0))
}

fn detector(frames: usize) -> ScriptedDetector {
    let script = (0..frames).map(|i| vec![person(100.0 + i as f32)]).collect();
    ScriptedDetector::new(vec!["person".to_string()], script)
}

fn candidates() -> Vec<EncoderCandidate> {
    vec![
        EncoderCandidate::new("enc-a", "appsrc name=src ! enc-a ! rtph264pay ! udpsink"),
        EncoderCandidate::new("enc-b", "appsrc name=src ! enc-b ! rtph264pay ! udpsink"),
    ]
}

fn process_backend(launcher: ScriptedLauncher) -> Box<dyn EncoderBackend> {
    Box::new(
        ProcessEncoderBackend::new("ffmpeg", Box::new(launcher))
            .with_timing(Duration::from_millis(1), Duration::from_millis(50)),
    )
}

/// Presenter recording window titles; quits after `quit_after` frames when set.
#[derive(Clone, Default)]
struct RecordingPresenter {
    titles: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<u32>>,
    quit_after: Option<usize>,
}

impl Presenter for RecordingPresenter {
    fn present(&mut self, title: &str, _frame: &Frame) -> Result<PreviewEvent> {
        let mut titles = self.titles.lock().unwrap();
        titles.push(title.to_string());
        if self.quit_after == Some(titles.len()) {
            return Ok(PreviewEvent::Quit);
        }
        Ok(PreviewEvent::Continue)
    }

    fn close(&mut self) -> Result<()> {
        *self.closed.lock().unwrap() += 1;
        Ok(())
    }
}

#[test]
fn streams_every_frame_in_capture_order() -> Result<()> {
    let source = ReplaySource::uniform(5, W, H)?;
    let device = source.handle();
    let detector = detector(5);
    let calls = detector.call_log();
    let executor = ScriptedExecutor::new().accepting("enc-a");
    let sink = executor.log();
    let writer = PipelineWriterBackend::with_candidates(Box::new(executor), candidates());

    let session = StreamOrchestrator::new(
        config(),
        Box::new(source),
        Box::new(detector),
        vec![Box::new(writer)],
        None,
        CancelToken::new(),
    )?;
    let report = session.run();

    assert_eq!(report.stop, StopReason::EndOfStream);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.frames_processed, 5);
    assert_eq!(report.frames_transmitted, 5);
    assert_eq!(report.encoder.as_deref(), Some("enc-a"));
    assert_eq!(report.final_state, SessionState::Closed);

    let frames = sink.frames();
    assert_eq!(frames.len(), 5);
    for (i, frame) in frames.iter().enumerate() {
        assert!(frame.has_size(W, H));
        // Bottom-right corner is outside every overlay and keeps the capture shade.
        let shade = i as u8;
        assert_eq!(frame.pixel(W - 1, H - 1), Some([shade, shade, shade]));
        // The detection box for this frame was drawn.
        assert_eq!(frame.pixel(100 + i as u32, 175), Some([0, 255, 0]));
    }

    assert!(calls
        .calls()
        .iter()
        .all(|call| *call == DetectorCall::Track { persist: true }));
    assert_eq!(device.opens(), 1);
    assert_eq!(device.closes(), 1);
    assert_eq!(sink.sinks_closed(), 1);
    Ok(())
}

#[test]
fn all_candidates_failing_degrades_to_preview_only() -> Result<()> {
    let source = ReplaySource::uniform(4, W, H)?;
    let executor = ScriptedExecutor::new().erroring("enc-a");
    let probes = executor.log();
    let writer = PipelineWriterBackend::with_candidates(Box::new(executor), candidates());
    let presenter = RecordingPresenter::default();
    let titles = presenter.titles.clone();

    let cfg = PipelineConfig {
        headless: false,
        show_preview: true,
        ..config()
    };
    let session = StreamOrchestrator::new(
        cfg,
        Box::new(source),
        Box::new(detector(4)),
        vec![Box::new(writer)],
        Some(Box::new(presenter.clone())),
        CancelToken::new(),
    )?;
    let report = session.run();

    assert_eq!(report.stop, StopReason::EndOfStream);
    assert_eq!(report.frames_processed, 4);
    assert_eq!(report.frames_transmitted, 0);
    assert_eq!(report.encoder, None);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(probes.probes().len(), 4);
    assert!(probes.frames().is_empty());

    let titles = titles.lock().unwrap().clone();
    assert_eq!(titles.len(), 4);
    assert!(titles.iter().all(|t| t.contains("no stream")));
    assert_eq!(*presenter.closed.lock().unwrap(), 1);
    Ok(())
}

#[test]
fn first_opening_candidate_is_committed_and_later_ones_never_probed() -> Result<()> {
    let executor = ScriptedExecutor::new().accepting("enc-a").accepting("enc-b");
    let probes = executor.log();
    let writer = PipelineWriterBackend::with_candidates(Box::new(executor), candidates());

    let report = StreamOrchestrator::new(
        config(),
        Box::new(ReplaySource::uniform(2, W, H)?),
        Box::new(detector(2)),
        vec![Box::new(writer)],
        None,
        CancelToken::new(),
    )?
    .run();

    assert_eq!(report.encoder.as_deref(), Some("enc-a"));
    let probed = probes.probes();
    assert_eq!(probed.len(), 1);
    assert_eq!(probed[0].1, CodecTag::Auto);
    assert!(probed.iter().all(|(descriptor, _)| !descriptor.contains("enc-b")));
    Ok(())
}

#[test]
fn encoder_dying_at_launch_fails_without_writing() -> Result<()> {
    let source = ReplaySource::uniform(5, W, H)?;
    let device = source.handle();
    let launcher = ScriptedLauncher::exiting_immediately(1).with_diagnostics(&["rtp: bind failed"]);
    let process = launcher.log();

    let report = StreamOrchestrator::new(
        config(),
        Box::new(source),
        Box::new(detector(5)),
        vec![process_backend(launcher)],
        None,
        CancelToken::new(),
    )?
    .run();

    match &report.stop {
        StopReason::Failed(StreamError::LaunchFailed { diagnostic, .. }) => {
            assert!(diagnostic.contains("bind failed"), "{}", diagnostic);
        }
        other => panic!("unexpected stop {:?}", other),
    }
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.final_state, SessionState::Failed);
    assert_eq!(report.frames_processed, 0);
    assert_eq!(process.writes(), 0);
    assert_eq!(device.closes(), 1);
    Ok(())
}

#[test]
fn encoder_dying_mid_stream_stops_after_k_frames_with_full_teardown() -> Result<()> {
    let source = ReplaySource::uniform(10, W, H)?;
    let device = source.handle();
    let launcher = ScriptedLauncher::exiting_after(3, 1);
    let process = launcher.log();

    let report = StreamOrchestrator::new(
        config(),
        Box::new(source),
        Box::new(detector(10)),
        vec![process_backend(launcher)],
        None,
        CancelToken::new(),
    )?
    .run();

    assert!(matches!(
        report.stop,
        StopReason::Failed(StreamError::TransportCrashed { .. })
    ));
    assert_eq!(process.writes(), 3);
    assert_eq!(report.frames_transmitted, 3);
    assert_eq!(report.frames_processed, 3);
    assert_eq!(device.closes(), 1);
    assert!(!device.is_open());
    assert!(process.reaped());
    assert!(process.input_closed());
    Ok(())
}

#[test]
fn unavailable_strategy_hands_over_to_the_next() -> Result<()> {
    let writer = PipelineWriterBackend::with_candidates(
        Box::new(ScriptedExecutor::new().without_native_transport()),
        candidates(),
    );
    let launcher = ScriptedLauncher::healthy();
    let process = launcher.log();

    let report = StreamOrchestrator::new(
        config(),
        Box::new(ReplaySource::uniform(3, W, H)?),
        Box::new(detector(3)),
        vec![Box::new(writer), process_backend(launcher)],
        None,
        CancelToken::new(),
    )?
    .run();

    assert_eq!(report.stop, StopReason::EndOfStream);
    assert_eq!(report.encoder.as_deref(), Some("ffmpeg"));
    assert_eq!(process.writes(), 3);
    assert!(process.input_closed());
    assert_eq!(process.kills(), 0);
    Ok(())
}

#[test]
fn lost_pipeline_mid_stream_continues_as_preview() -> Result<()> {
    let executor = ScriptedExecutor::new().accepting("enc-a").failing_push_after(2);
    let writer = PipelineWriterBackend::with_candidates(Box::new(executor), candidates());

    let report = StreamOrchestrator::new(
        config(),
        Box::new(ReplaySource::uniform(5, W, H)?),
        Box::new(detector(5)),
        vec![Box::new(writer)],
        None,
        CancelToken::new(),
    )?
    .run();

    assert_eq!(report.stop, StopReason::EndOfStream);
    assert_eq!(report.frames_processed, 5);
    assert_eq!(report.frames_transmitted, 2);
    Ok(())
}

#[test]
fn cancelled_before_first_frame() -> Result<()> {
    let source = ReplaySource::uniform(3, W, H)?;
    let device = source.handle();
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = StreamOrchestrator::new(
        config(),
        Box::new(source),
        Box::new(detector(3)),
        Vec::new(),
        None,
        cancel,
    )?
    .run();

    assert_eq!(report.stop, StopReason::Cancelled);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.frames_processed, 0);
    assert_eq!(device.closes(), 1);
    Ok(())
}

#[test]
fn quit_key_in_preview_cancels_the_session() -> Result<()> {
    let presenter = RecordingPresenter {
        quit_after: Some(2),
        ..RecordingPresenter::default()
    };
    let titles = presenter.titles.clone();
    let cancel = CancelToken::new();
    let cfg = PipelineConfig {
        headless: false,
        ..config()
    };
    let executor = ScriptedExecutor::new().accepting("enc-a");

    let report = StreamOrchestrator::new(
        cfg,
        Box::new(ReplaySource::uniform(10, W, H)?),
        Box::new(detector(10)),
        vec![Box::new(PipelineWriterBackend::with_candidates(
            Box::new(executor),
            candidates(),
        ))],
        Some(Box::new(presenter)),
        cancel.clone(),
    )?
    .run();

    assert_eq!(report.stop, StopReason::Cancelled);
    assert_eq!(report.frames_processed, 2);
    assert!(cancel.is_cancelled());
    let titles = titles.lock().unwrap().clone();
    assert!(titles.iter().all(|t| t == "Stream preview - q to quit"));
    Ok(())
}

#[test]
fn headless_never_presents() -> Result<()> {
    let presenter = RecordingPresenter::default();
    let titles = presenter.titles.clone();

    let report = StreamOrchestrator::new(
        config(),
        Box::new(ReplaySource::uniform(3, W, H)?),
        Box::new(detector(3)),
        Vec::new(),
        Some(Box::new(presenter.clone())),
        CancelToken::new(),
    )?
    .run();

    assert_eq!(report.frames_processed, 3);
    assert!(titles.lock().unwrap().is_empty());
    // Surfaces are still torn down.
    assert_eq!(*presenter.closed.lock().unwrap(), 1);
    Ok(())
}

#[test]
fn model_load_failure_never_touches_the_device() -> Result<()> {
    let source = ReplaySource::uniform(3, W, H)?;
    let device = source.handle();
    let launcher = ScriptedLauncher::healthy();
    let process = launcher.log();

    let report = StreamOrchestrator::new(
        config(),
        Box::new(source),
        Box::new(detector(3).failing_load()),
        vec![process_backend(launcher)],
        None,
        CancelToken::new(),
    )?
    .run();

    assert!(matches!(
        report.stop,
        StopReason::Failed(StreamError::ModelLoadFailed { .. })
    ));
    assert_eq!(report.exit_code(), 1);
    assert_eq!(device.opens(), 0);
    assert!(process.launches().is_empty());
    Ok(())
}

#[test]
fn missing_device_fails_before_transport_negotiation() -> Result<()> {
    let launcher = ScriptedLauncher::healthy();
    let process = launcher.log();

    let report = StreamOrchestrator::new(
        config(),
        Box::new(ReplaySource::uniform(3, W, H)?.unavailable()),
        Box::new(detector(3)),
        vec![process_backend(launcher)],
        None,
        CancelToken::new(),
    )?
    .run();

    assert!(matches!(
        report.stop,
        StopReason::Failed(StreamError::DeviceUnavailable { .. })
    ));
    assert!(process.launches().is_empty());
    Ok(())
}

#[test]
fn inference_failure_is_fatal_and_tears_down() -> Result<()> {
    let source = ReplaySource::uniform(5, W, H)?;
    let device = source.handle();
    let launcher = ScriptedLauncher::healthy();
    let process = launcher.log();

    let report = StreamOrchestrator::new(
        config(),
        Box::new(source),
        Box::new(detector(5).failing_at(2)),
        vec![process_backend(launcher)],
        None,
        CancelToken::new(),
    )?
    .run();

    match &report.stop {
        StopReason::Failed(StreamError::StageFailed { stage, .. }) => {
            assert_eq!(*stage, "inference")
        }
        other => panic!("unexpected stop {:?}", other),
    }
    assert_eq!(report.frames_transmitted, 2);
    assert_eq!(process.writes(), 2);
    assert!(process.input_closed());
    assert_eq!(device.closes(), 1);
    Ok(())
}

#[test]
fn tracking_disabled_uses_plain_detection() -> Result<()> {
    let detector = detector(2);
    let calls = detector.call_log();
    let cfg = PipelineConfig {
        tracking_enabled: false,
        ..config()
    };

    StreamOrchestrator::new(
        cfg,
        Box::new(ReplaySource::uniform(2, W, H)?),
        Box::new(detector),
        Vec::new(),
        None,
        CancelToken::new(),
    )?
    .run();

    assert_eq!(calls.calls(), [DetectorCall::Detect, DetectorCall::Detect]);
    Ok(())
}

#[test]
fn capture_at_another_size_is_rescaled() -> Result<()> {
    let executor = ScriptedExecutor::new().accepting("enc-a");
    let sink = executor.log();
    let source = ReplaySource::new("wide", vec![Frame::filled(640, 480, [9, 9, 9])?]);

    StreamOrchestrator::new(
        config(),
        Box::new(source),
        Box::new(detector(1)),
        vec![Box::new(PipelineWriterBackend::with_candidates(
            Box::new(executor),
            candidates(),
        ))],
        None,
        CancelToken::new(),
    )?
    .run();

    let frames = sink.frames();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].has_size(W, H));
    Ok(())
}

#[test]
fn capture_failure_stops_with_stage_error() -> Result<()> {
    let source = ReplaySource::uniform(5, W, H)?.failing_after(2);
    let device = source.handle();

    let report = StreamOrchestrator::new(
        config(),
        Box::new(source),
        Box::new(detector(5)),
        Vec::new(),
        None,
        CancelToken::new(),
    )?
    .run();

    match &report.stop {
        StopReason::Failed(StreamError::StageFailed { stage, .. }) => assert_eq!(*stage, "capture"),
        other => panic!("unexpected stop {:?}", other),
    }
    assert_eq!(report.frames_processed, 2);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(device.closes(), 1);
    Ok(())
}

/// Transport whose encoder dies at the interrupt that also cancels the session.
struct InterruptedTransport {
    cancel: CancelToken,
    writes_before_interrupt: u64,
    writes: u64,
    open: bool,
}

impl EncoderBackend for InterruptedTransport {
    fn name(&self) -> &str {
        "interrupted"
    }

    fn open(&mut self, _config: &PipelineConfig) -> Result<(), StreamError> {
        self.open = true;
        Ok(())
    }

    fn write(&mut self, _frame: &Frame) -> Result<(), StreamError> {
        if self.writes == self.writes_before_interrupt {
            self.cancel.cancel();
            return Err(StreamError::TransportCrashed {
                diagnostic: "encoder interrupted".to_string(),
            });
        }
        self.writes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn encoder(&self) -> Option<String> {
        Some("interrupted".to_string())
    }
}

#[test]
fn transport_lost_to_the_same_interrupt_counts_as_cancel() -> Result<()> {
    let cancel = CancelToken::new();
    let transport = InterruptedTransport {
        cancel: cancel.clone(),
        writes_before_interrupt: 2,
        writes: 0,
        open: false,
    };

    let report = StreamOrchestrator::new(
        config(),
        Box::new(ReplaySource::uniform(5, W, H)?),
        Box::new(detector(5)),
        vec![Box::new(transport)],
        None,
        cancel,
    )?
    .run();

    assert_eq!(report.stop, StopReason::Cancelled);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.frames_transmitted, 2);
    assert_eq!(report.final_state, SessionState::Closed);
    Ok(())
}
