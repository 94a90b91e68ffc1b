//! Detect Streamer
//!
//! Real-time capture -> detection -> overlay -> H.264/RTP push streaming.
//!
//! # Architecture
//!
//! One session drives a strictly sequential frame loop:
//!
//! 1. **Capture**: a `FrameSource` hands out BGR24 frames in capture order.
//! 2. **Inference**: an opaque `Detector` returns detections (optionally tracked).
//! 3. **Overlay**: the `Annotator` draws boxes, labels and a telemetry panel on a copy.
//! 4. **Transport**: an `EncoderBackend` turns frames into H.264 over RTP/UDP.
//!
//! Transport strategies are tried in rank order. When none is available the
//! session keeps running as a local previewer. Every exit path tears down the
//! transport, then the capture device, then the preview surface.
//!
//! # Module Structure
//!
//! - `config`: `PipelineConfig` defaults, file loading, validation
//! - `frame`: packed BGR24 `Frame`
//! - `ingest`: frame sources (synthetic, V4L2, replay)
//! - `detect`: `Detector` contract and built-in detectors
//! - `annotate`: detection and telemetry overlays
//! - `encode`: transport strategies (in-process pipeline writer, external encoder process)
//! - `preview`: local presentation surface
//! - `session`: `StreamOrchestrator`, the frame loop and teardown
//! - Core types: `StreamError`, `SessionState`, `CancelToken`

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod annotate;
pub mod config;
pub mod detect;
pub mod encode;
pub mod frame;
pub mod ingest;
pub mod preview;
pub mod session;

pub use annotate::{Annotator, TransportStatus};
pub use config::{PipelineConfig, PipelineConfigFile};
pub use detect::{BoundingBox, Detection, Detector, DetectorRegistry, InferenceParams};
pub use encode::{
    default_candidates, EncoderBackend, EncoderCandidate, PipelineWriterBackend,
    ProcessEncoderBackend, TransportStrategy,
};
pub use frame::Frame;
pub use ingest::{CameraSource, DeviceRequest, FrameSource, ReplaySource};
pub use preview::{PreviewEvent, Presenter, SnapshotPreview};
pub use session::{FpsMeter, SessionReport, StopReason, StreamOrchestrator};

// -------------------- Errors --------------------

/// Failures a streaming session can report.
///
/// `TransportUnavailable` is absorbed by the session (it degrades to preview
/// only). Every other variant stops the session after teardown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamError {
    ModelLoadFailed { model: String, reason: String },
    DeviceUnavailable { device: String, reason: String },
    TransportUnavailable { reason: String },
    /// The external encoder never came up. Carries its diagnostic output.
    LaunchFailed { program: String, diagnostic: String },
    /// The external encoder died mid-session. Carries its last diagnostic lines.
    TransportCrashed { diagnostic: String },
    /// Write on a backend that is not open.
    NotOpen,
    /// Capture or inference failed inside the frame loop.
    StageFailed { stage: &'static str, reason: String },
}

impl StreamError {
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::ModelLoadFailed { .. } => "MODEL_LOAD_FAILED",
            StreamError::DeviceUnavailable { .. } => "DEVICE_UNAVAILABLE",
            StreamError::TransportUnavailable { .. } => "TRANSPORT_UNAVAILABLE",
            StreamError::LaunchFailed { .. } => "LAUNCH_FAILED",
            StreamError::TransportCrashed { .. } => "TRANSPORT_CRASHED",
            StreamError::NotOpen => "NOT_OPEN",
            StreamError::StageFailed { .. } => "STAGE_FAILED",
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, StreamError::TransportUnavailable { .. })
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.code())?;
        match self {
            StreamError::ModelLoadFailed { model, reason } => {
                write!(f, "failed to load model {}: {}", model, reason)
            }
            StreamError::DeviceUnavailable { device, reason } => {
                write!(f, "capture device {} unavailable: {}", device, reason)
            }
            StreamError::TransportUnavailable { reason } => {
                write!(f, "no transport available: {}", reason)
            }
            StreamError::LaunchFailed {
                program,
                diagnostic,
            } => write!(f, "encoder {} failed to start: {}", program, diagnostic),
            StreamError::TransportCrashed { diagnostic } => {
                write!(f, "encoder exited mid-stream: {}", diagnostic)
            }
            StreamError::NotOpen => write!(f, "write on a transport that is not open"),
            StreamError::StageFailed { stage, reason } => {
                write!(f, "{} stage failed: {}", stage, reason)
            }
        }
    }
}

impl std::error::Error for StreamError {}

// -------------------- Session State --------------------

/// Lifecycle of one streaming session. Only the orchestrator moves it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ModelLoading,
    DeviceOpening,
    EncoderNegotiating,
    Streaming,
    Draining,
    Closed,
    Failed,
}

impl SessionState {
    /// The capture device may be held in this state.
    pub fn holds_device(&self) -> bool {
        matches!(
            self,
            SessionState::EncoderNegotiating | SessionState::Streaming | SessionState::Draining
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::ModelLoading => "model-loading",
            SessionState::DeviceOpening => "device-opening",
            SessionState::EncoderNegotiating => "encoder-negotiating",
            SessionState::Streaming => "streaming",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

// -------------------- Cancellation --------------------

/// Shared stop flag. Signal handlers and the preview surface set it; the frame
/// loop checks it once per iteration.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
