//! In-process pipeline writer.
//!
//! State machine: `Uninitialized -> Probing -> Open | AllFailed`, then `Closed`.
//!
//! Every candidate gets two attempts: automatic codec negotiation first, then
//! the fixed `H264` tag. The first attempt that opens is committed and later
//! candidates are never probed.

use std::fmt;

use anyhow::Result;

use super::candidate::{default_candidates, EncoderCandidate};
use super::{conform, EncoderBackend};
use crate::config::PipelineConfig;
use crate::frame::Frame;
use crate::StreamError;

/// Codec selection handed to the executor with a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecTag {
    /// Let the pipeline negotiate the codec.
    Auto,
    /// Pin the encoded stream to this four-character code.
    FourCc([u8; 4]),
}

impl CodecTag {
    pub const H264: CodecTag = CodecTag::FourCc(*b"H264");
}

impl fmt::Display for CodecTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecTag::Auto => f.write_str("auto"),
            CodecTag::FourCc(code) => f.write_str(&String::from_utf8_lossy(code)),
        }
    }
}

/// Raw frame layout entering the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// An opened pipeline accepting BGR24 frames.
pub trait PipelineSink: Send {
    fn push(&mut self, frame: &Frame) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Runs pipeline descriptors.
pub trait PipelineExecutor: Send {
    fn name(&self) -> &str;

    /// Whether this environment can run native transport pipelines at all.
    fn supports_native_transport(&self) -> bool;

    /// Try to open `descriptor`. `Ok(None)` means the pipeline did not open.
    fn open_sink(
        &mut self,
        descriptor: &str,
        tag: CodecTag,
        format: &SinkFormat,
    ) -> Result<Option<Box<dyn PipelineSink>>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Opened,
    /// The executor reported the pipeline as not opened.
    Declined,
    Failed(String),
}

/// One candidate+tag attempt made during negotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeAttempt {
    pub encoder_name: String,
    pub tag: CodecTag,
    pub outcome: ProbeOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriterState {
    Uninitialized,
    Probing,
    Open,
    AllFailed,
    Closed,
}

/// `EncoderBackend` over a `PipelineExecutor` and a ranked candidate list.
pub struct PipelineWriterBackend {
    executor: Box<dyn PipelineExecutor>,
    candidates: Option<Vec<EncoderCandidate>>,
    state: WriterState,
    sink: Option<Box<dyn PipelineSink>>,
    committed: Option<EncoderCandidate>,
    attempts: Vec<ProbeAttempt>,
    format: Option<SinkFormat>,
    frames_written: u64,
}

impl PipelineWriterBackend {
    /// Writer using `default_candidates` for the session config.
    pub fn new(executor: Box<dyn PipelineExecutor>) -> Self {
        Self {
            executor,
            candidates: None,
            state: WriterState::Uninitialized,
            sink: None,
            committed: None,
            attempts: Vec::new(),
            format: None,
            frames_written: 0,
        }
    }

    /// Writer with an explicit, already ranked, candidate list.
    pub fn with_candidates(
        executor: Box<dyn PipelineExecutor>,
        candidates: Vec<EncoderCandidate>,
    ) -> Self {
        let mut backend = Self::new(executor);
        backend.candidates = Some(candidates);
        backend
    }

    /// Candidate the writer committed to, once open.
    pub fn committed(&self) -> Option<&EncoderCandidate> {
        self.committed.as_ref()
    }

    /// Every probe made by the last `open`, in order.
    pub fn attempts(&self) -> &[ProbeAttempt] {
        &self.attempts
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn probe(
        &mut self,
        candidate: &EncoderCandidate,
        tag: CodecTag,
        format: &SinkFormat,
    ) -> Option<Box<dyn PipelineSink>> {
        let (sink, outcome) =
            match self
                .executor
                .open_sink(&candidate.pipeline_descriptor, tag, format)
            {
                Ok(Some(sink)) => (Some(sink), ProbeOutcome::Opened),
                Ok(None) => (None, ProbeOutcome::Declined),
                Err(err) => (None, ProbeOutcome::Failed(format!("{:#}", err))),
            };
        match &outcome {
            ProbeOutcome::Opened => {}
            ProbeOutcome::Declined => log::debug!(
                "PipelineWriter: {} ({}) did not open",
                candidate.encoder_name,
                tag
            ),
            ProbeOutcome::Failed(reason) => log::debug!(
                "PipelineWriter: {} ({}) failed: {}",
                candidate.encoder_name,
                tag,
                reason
            ),
        }
        self.attempts.push(ProbeAttempt {
            encoder_name: candidate.encoder_name.clone(),
            tag,
            outcome,
        });
        sink
    }
}

impl EncoderBackend for PipelineWriterBackend {
    fn name(&self) -> &str {
        "pipeline-writer"
    }

    fn open(&mut self, config: &PipelineConfig) -> Result<(), StreamError> {
        if self.state == WriterState::Open {
            return Ok(());
        }
        self.attempts.clear();
        self.committed = None;

        if !self.executor.supports_native_transport() {
            self.state = WriterState::AllFailed;
            return Err(StreamError::TransportUnavailable {
                reason: format!(
                    "{} has no native pipeline transport support",
                    self.executor.name()
                ),
            });
        }

        self.state = WriterState::Probing;
        let format = SinkFormat {
            width: config.width,
            height: config.height,
            fps: config.fps,
        };
        let candidates = self
            .candidates
            .clone()
            .unwrap_or_else(|| default_candidates(config));

        for candidate in &candidates {
            for tag in [CodecTag::Auto, CodecTag::H264] {
                if let Some(sink) = self.probe(candidate, tag, &format) {
                    log::info!(
                        "PipelineWriter: streaming via {} ({}) to {}",
                        candidate.encoder_name,
                        tag,
                        config.target_addr()
                    );
                    self.sink = Some(sink);
                    self.committed = Some(candidate.clone());
                    self.format = Some(format);
                    self.frames_written = 0;
                    self.state = WriterState::Open;
                    return Ok(());
                }
            }
        }

        self.state = WriterState::AllFailed;
        log::warn!(
            "PipelineWriter: none of {} encoder candidates opened on {}",
            candidates.len(),
            self.executor.name()
        );
        Err(StreamError::TransportUnavailable {
            reason: format!("all {} encoder candidates failed", candidates.len()),
        })
    }

    fn write(&mut self, frame: &Frame) -> Result<(), StreamError> {
        let (Some(sink), Some(format)) = (self.sink.as_mut(), self.format) else {
            return Err(StreamError::NotOpen);
        };
        if self.state != WriterState::Open {
            return Err(StreamError::NotOpen);
        }
        let frame = conform(frame, format.width, format.height)?;
        if let Err(err) = sink.push(&frame) {
            let reason = format!("{:#}", err);
            log::warn!("PipelineWriter: push failed, dropping transport: {}", reason);
            if let Some(mut sink) = self.sink.take() {
                if let Err(err) = sink.close() {
                    log::debug!("PipelineWriter: close after failed push: {:#}", err);
                }
            }
            self.state = WriterState::Closed;
            return Err(StreamError::TransportUnavailable { reason });
        }
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        let result = match self.sink.take() {
            Some(mut sink) => sink.close().map_err(|err| StreamError::StageFailed {
                stage: "transport-close",
                reason: format!("{:#}", err),
            }),
            None => Ok(()),
        };
        if self.state == WriterState::Open {
            log::info!(
                "PipelineWriter: closed after {} frames",
                self.frames_written
            );
        }
        if self.state != WriterState::Uninitialized {
            self.state = WriterState::Closed;
        }
        result
    }

    fn is_open(&self) -> bool {
        self.state == WriterState::Open
    }

    fn encoder(&self) -> Option<String> {
        self.committed.as_ref().map(|c| c.encoder_name.clone())
    }
}
