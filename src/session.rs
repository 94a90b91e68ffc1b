//! Streaming session.
//!
//! `StreamOrchestrator` owns every resource of one session: the capture device,
//! the detector, the ranked transport strategies and the optional preview
//! surface. `run` walks the session through
//! `ModelLoading -> DeviceOpening -> EncoderNegotiating -> Streaming -> Draining`
//! and always finishes with a teardown of transport, device and preview, in
//! that order.

use std::fmt;
use std::time::Instant;

use anyhow::Result;

use crate::annotate::{Annotator, TransportStatus};
use crate::config::PipelineConfig;
use crate::detect::{Detection, Detector, InferenceParams};
use crate::encode::EncoderBackend;
use crate::frame::Frame;
use crate::ingest::{DeviceRequest, FrameSource};
use crate::preview::{PreviewEvent, Presenter};
use crate::{CancelToken, SessionState, StreamError};

/// Frames between status log lines.
pub const STATUS_INTERVAL: u64 = 30;

const STREAM_TITLE: &str = "Stream preview - q to quit";
const PREVIEW_TITLE: &str = "Detection preview - q to quit (no stream)";

// ----------------------------------------------------------------------------
// Report
// ----------------------------------------------------------------------------

/// Why the frame loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The device reported end of stream.
    EndOfStream,
    /// Interrupt signal or cancel keystroke.
    Cancelled,
    Failed(StreamError),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndOfStream => f.write_str("end of stream"),
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Outcome of one session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport {
    pub frames_processed: u64,
    pub frames_transmitted: u64,
    pub stop: StopReason,
    /// Encoder the session committed to, if any.
    pub encoder: Option<String>,
    pub final_state: SessionState,
    pub average_fps: f64,
}

impl SessionReport {
    /// 0 for end of stream or cancellation, 1 for any failure.
    pub fn exit_code(&self) -> i32 {
        match self.stop {
            StopReason::EndOfStream | StopReason::Cancelled => 0,
            StopReason::Failed(_) => 1,
        }
    }

    /// Report for a session that failed before any stage was opened.
    pub fn not_started(err: StreamError) -> Self {
        let report = Self {
            frames_processed: 0,
            frames_transmitted: 0,
            stop: StopReason::Failed(err),
            encoder: None,
            final_state: SessionState::Failed,
            average_fps: 0.0,
        };
        report.log_outcome();
        report
    }

    fn log_outcome(&self) {
        match &self.stop {
            StopReason::Failed(_) => log::error!(
                "Session: stopped ({}) after {} frames, {} transmitted",
                self.stop,
                self.frames_processed,
                self.frames_transmitted
            ),
            _ => log::info!(
                "Session: stopped ({}) after {} frames, {} transmitted, {:.1} fps average",
                self.stop,
                self.frames_processed,
                self.frames_transmitted,
                self.average_fps
            ),
        }
    }
}

// ----------------------------------------------------------------------------
// FPS
// ----------------------------------------------------------------------------

/// Frame-rate from consecutive loop ticks.
#[derive(Clone, Debug, Default)]
pub struct FpsMeter {
    last: Option<Instant>,
    instant: f64,
    smoothed: f64,
}

impl FpsMeter {
    const SMOOTHING: f64 = 0.1;

    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tick at `now` and return the instantaneous rate. A zero
    /// interval keeps the previous value.
    pub fn tick(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f64();
            if dt > 0.0 {
                self.instant = 1.0 / dt;
                self.smoothed = if self.smoothed == 0.0 {
                    self.instant
                } else {
                    Self::SMOOTHING * self.instant + (1.0 - Self::SMOOTHING) * self.smoothed
                };
            }
        }
        self.last = Some(now);
        self.instant
    }

    pub fn instant(&self) -> f64 {
        self.instant
    }

    pub fn smoothed(&self) -> f64 {
        self.smoothed
    }
}

// ----------------------------------------------------------------------------
// Orchestrator
// ----------------------------------------------------------------------------

/// Drives capture -> inference -> overlay -> transport for one session.
pub struct StreamOrchestrator {
    config: PipelineConfig,
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    backends: Vec<Box<dyn EncoderBackend>>,
    presenter: Option<Box<dyn Presenter>>,
    cancel: CancelToken,
    state: SessionState,
    active: Option<usize>,
    encoder: Option<String>,
    started_at: Option<Instant>,
}

impl StreamOrchestrator {
    /// `backends` is tried in order; the first that opens carries the stream.
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        backends: Vec<Box<dyn EncoderBackend>>,
        presenter: Option<Box<dyn Presenter>>,
        cancel: CancelToken,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            detector,
            backends,
            presenter,
            cancel,
            state: SessionState::Idle,
            active: None,
            encoder: None,
            started_at: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the session to completion. Resources are released on every path.
    pub fn run(mut self) -> SessionReport {
        let mut counters = Counters::default();
        let stop = match self.start() {
            Ok(annotator) => self.stream(&annotator, &mut counters),
            Err(err) => StopReason::Failed(err),
        };
        self.teardown();

        let final_state = match stop {
            StopReason::Failed(_) => SessionState::Failed,
            _ => SessionState::Closed,
        };
        self.transition(final_state);

        let average_fps = match self.started_at {
            Some(started) if counters.processed > 0 => {
                let secs = started.elapsed().as_secs_f64();
                if secs > 0.0 {
                    counters.processed as f64 / secs
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        let report = SessionReport {
            frames_processed: counters.processed,
            frames_transmitted: counters.transmitted,
            stop,
            encoder: self.encoder.clone(),
            final_state,
            average_fps,
        };
        report.log_outcome();
        report
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            log::debug!("Session: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Load the model, open the device, negotiate a transport.
    fn start(&mut self) -> Result<Annotator, StreamError> {
        self.transition(SessionState::ModelLoading);
        if let Err(err) = self.detector.load(&self.config.model_path) {
            return Err(StreamError::ModelLoadFailed {
                model: self.config.model_path.clone(),
                reason: format!("{:#}", err),
            });
        }
        log::info!(
            "Session: model {} loaded by {} ({} classes)",
            self.config.model_path,
            self.detector.name(),
            self.detector.class_names().len()
        );
        let annotator = Annotator::new(self.detector.class_names().to_vec());

        self.transition(SessionState::DeviceOpening);
        let request = DeviceRequest::from_config(&self.config);
        if let Err(err) = self.source.open(&request) {
            return Err(StreamError::DeviceUnavailable {
                device: request.device_id,
                reason: format!("{:#}", err),
            });
        }

        self.transition(SessionState::EncoderNegotiating);
        self.negotiate_transport()?;

        self.transition(SessionState::Streaming);
        Ok(annotator)
    }

    fn negotiate_transport(&mut self) -> Result<(), StreamError> {
        for (index, backend) in self.backends.iter_mut().enumerate() {
            match backend.open(&self.config) {
                Ok(()) => {
                    self.encoder = backend.encoder();
                    self.active = Some(index);
                    log::info!(
                        "Session: transport {} ({}) -> {}",
                        backend.name(),
                        self.encoder.as_deref().unwrap_or("unknown encoder"),
                        self.config.target_addr()
                    );
                    return Ok(());
                }
                Err(StreamError::TransportUnavailable { reason }) => {
                    log::info!("Session: transport {} unavailable: {}", backend.name(), reason);
                }
                Err(err) => return Err(err),
            }
        }
        log::warn!("Session: no transport available, running preview only");
        Ok(())
    }

    fn transport_status(&self) -> TransportStatus {
        match self.active {
            Some(_) => TransportStatus::Streaming {
                host: self.config.host.clone(),
                port: self.config.port,
            },
            None => TransportStatus::PreviewOnly,
        }
    }

    fn stream(&mut self, annotator: &Annotator, counters: &mut Counters) -> StopReason {
        let params = InferenceParams::from_config(&self.config);
        let presents = self.config.presents_preview();
        let mut meter = FpsMeter::new();
        let mut status = self.transport_status();
        self.started_at = Some(Instant::now());

        loop {
            if self.cancel.is_cancelled() {
                return StopReason::Cancelled;
            }

            let frame = match self.source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => return StopReason::EndOfStream,
                Err(err) => return stage_failed("capture", err),
            };
            let frame = if frame.has_size(self.config.width, self.config.height) {
                frame
            } else {
                match frame.resized(self.config.width, self.config.height) {
                    Ok(frame) => frame,
                    Err(err) => return stage_failed("resize", err),
                }
            };

            let detections = match self.infer(&frame, &params) {
                Ok(detections) => detections,
                Err(err) => return stage_failed("inference", err),
            };

            let fps = meter.tick(Instant::now());
            let annotated = annotator.draw_detections(&frame, &detections);
            let annotated = annotator.add_telemetry_overlay(
                &annotated,
                counters.processed + 1,
                detections.len(),
                fps,
                &status,
            );

            if let Some(index) = self.active {
                match self.backends[index].write(&annotated) {
                    Ok(()) => counters.transmitted += 1,
                    Err(err) if !err.is_fatal() => {
                        log::warn!("Session: transport lost, continuing preview only: {}", err);
                        if let Err(err) = self.backends[index].close() {
                            log::warn!("Session: closing lost transport: {}", err);
                        }
                        self.active = None;
                        status = self.transport_status();
                    }
                    Err(err) if self.cancel.is_cancelled() => {
                        log::info!("Session: transport stopped during shutdown: {}", err);
                        return StopReason::Cancelled;
                    }
                    Err(err) => return StopReason::Failed(err),
                }
            }
            counters.processed += 1;

            if presents {
                let title = if self.active.is_some() {
                    STREAM_TITLE
                } else {
                    PREVIEW_TITLE
                };
                if let Some(presenter) = self.presenter.as_mut() {
                    match presenter.present(title, &annotated) {
                        Ok(PreviewEvent::Continue) => {}
                        Ok(PreviewEvent::Quit) => {
                            log::info!("Session: quit requested from preview");
                            self.cancel.cancel();
                            return StopReason::Cancelled;
                        }
                        Err(err) => return stage_failed("preview", err),
                    }
                }
            }

            if counters.processed % STATUS_INTERVAL == 0 {
                log::info!(
                    "Session: frame {} | detections {} | fps {:.1} | transmitted {}{}",
                    counters.processed,
                    detections.len(),
                    meter.smoothed(),
                    counters.transmitted,
                    if self.active.is_some() { "" } else { " (preview only)" }
                );
            }
        }
    }

    fn infer(&mut self, frame: &Frame, params: &InferenceParams) -> Result<Vec<Detection>> {
        if self.config.tracking_enabled {
            self.detector.track(frame, params, true)
        } else {
            self.detector.detect(frame, params)
        }
    }

    /// Close transport, then device, then preview. A failing step does not
    /// skip the ones after it.
    fn teardown(&mut self) {
        if self.state == SessionState::Streaming {
            self.transition(SessionState::Draining);
        }
        self.active = None;
        for backend in self.backends.iter_mut() {
            if let Err(err) = backend.close() {
                log::warn!("Session: closing transport {}: {}", backend.name(), err);
            }
        }
        if let Err(err) = self.source.close() {
            log::warn!("Session: closing capture device: {:#}", err);
        }
        if let Some(presenter) = self.presenter.as_mut() {
            if let Err(err) = presenter.close() {
                log::warn!("Session: closing preview: {:#}", err);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    processed: u64,
    transmitted: u64,
}

fn stage_failed(stage: &'static str, err: anyhow::Error) -> StopReason {
    StopReason::Failed(StreamError::StageFailed {
        stage,
        reason: format!("{:#}", err),
    })
}
