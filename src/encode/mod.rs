//! Transport strategies.
//!
//! An `EncoderBackend` turns BGR24 frames into H.264 over RTP/UDP. Two
//! strategies exist:
//!
//! - `PipelineWriterBackend`: hands a pipeline descriptor to an in-process
//!   `PipelineExecutor` (GStreamer with feature `transport-gstreamer`), trying
//!   ranked `EncoderCandidate`s until one opens.
//! - `ProcessEncoderBackend`: pipes raw frames into an external encoder process
//!   (ffmpeg by default) and supervises it.
//!
//! The session holds a ranked list of backends and commits to the first that
//! opens.

mod candidate;
#[cfg(feature = "transport-gstreamer")]
mod gstreamer;
mod pipeline;
mod process;
pub mod scripted;

use std::borrow::Cow;

use crate::config::PipelineConfig;
use crate::frame::Frame;
use crate::StreamError;

pub use candidate::{default_candidates, EncoderCandidate, APPSRC_NAME};
#[cfg(feature = "transport-gstreamer")]
pub use gstreamer::GstreamerExecutor;
pub use pipeline::{
    CodecTag, PipelineExecutor, PipelineSink, PipelineWriterBackend, ProbeAttempt, ProbeOutcome,
    SinkFormat,
};
pub use process::{
    encoder_args, EncoderProcess, ProcessEncoderBackend, ProcessExit, ProcessLauncher,
    SystemLauncher, DEFAULT_ENCODER_PROGRAM,
};

/// A transport strategy with a uniform open/write/close lifecycle.
pub trait EncoderBackend: Send {
    /// Strategy name for logs (`pipeline-writer`, `encoder-process`).
    fn name(&self) -> &str;

    /// Bring the transport up for `config`.
    ///
    /// `TransportUnavailable` means this strategy cannot run here and the next
    /// one may be tried. Any other error is fatal for the session.
    fn open(&mut self, config: &PipelineConfig) -> Result<(), StreamError>;

    /// Push one frame. Fails with `NotOpen` unless `open` succeeded.
    fn write(&mut self, frame: &Frame) -> Result<(), StreamError>;

    /// Release the transport. Safe to call any number of times.
    fn close(&mut self) -> Result<(), StreamError>;

    fn is_open(&self) -> bool;

    /// Encoder actually in use once open (e.g. `x264enc`).
    fn encoder(&self) -> Option<String>;
}

/// Bring `frame` to the configured size before it enters the encoder.
pub(crate) fn conform(frame: &Frame, width: u32, height: u32) -> Result<Cow<'_, Frame>, StreamError> {
    if frame.has_size(width, height) {
        return Ok(Cow::Borrowed(frame));
    }
    frame
        .resized(width, height)
        .map(Cow::Owned)
        .map_err(|err| StreamError::StageFailed {
            stage: "encode",
            reason: err.to_string(),
        })
}

/// Which transport strategies a session tries, in rank order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportStrategy {
    /// In-process pipeline writer when compiled in, then the external process.
    Auto,
    Pipeline,
    Process,
    /// Preview only.
    None,
}

impl std::str::FromStr for TransportStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "pipeline" | "gstreamer" => Ok(Self::Pipeline),
            "process" | "ffmpeg" => Ok(Self::Process),
            "none" | "preview" => Ok(Self::None),
            other => Err(anyhow::anyhow!(
                "unknown transport '{}' (expected auto, pipeline, process or none)",
                other
            )),
        }
    }
}

impl TransportStrategy {
    /// Ranked backends for this strategy. `encoder_program` is the external encoder.
    pub fn backends(&self, encoder_program: &str) -> Vec<Box<dyn EncoderBackend>> {
        let process = || -> Box<dyn EncoderBackend> {
            Box::new(ProcessEncoderBackend::new(
                encoder_program,
                Box::new(SystemLauncher),
            ))
        };
        match self {
            TransportStrategy::Auto => {
                let mut backends = Vec::new();
                if cfg!(feature = "transport-gstreamer") {
                    backends.push(native_pipeline_writer());
                }
                backends.push(process());
                backends
            }
            TransportStrategy::Pipeline => vec![native_pipeline_writer()],
            TransportStrategy::Process => vec![process()],
            TransportStrategy::None => Vec::new(),
        }
    }
}

#[cfg(feature = "transport-gstreamer")]
fn native_pipeline_writer() -> Box<dyn EncoderBackend> {
    Box::new(PipelineWriterBackend::new(Box::new(GstreamerExecutor::new())))
}

#[cfg(not(feature = "transport-gstreamer"))]
fn native_pipeline_writer() -> Box<dyn EncoderBackend> {
    Box::new(PipelineWriterBackend::new(Box::new(NoNativeTransport)))
}

/// Executor for builds without a multimedia framework.
#[cfg(not(feature = "transport-gstreamer"))]
struct NoNativeTransport;

#[cfg(not(feature = "transport-gstreamer"))]
impl PipelineExecutor for NoNativeTransport {
    fn name(&self) -> &str {
        "none"
    }

    fn supports_native_transport(&self) -> bool {
        false
    }

    fn open_sink(
        &mut self,
        _descriptor: &str,
        _tag: CodecTag,
        _format: &SinkFormat,
    ) -> anyhow::Result<Option<Box<dyn PipelineSink>>> {
        Ok(None)
    }
}
