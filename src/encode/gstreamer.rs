//! GStreamer pipeline executor.
//!
//! Descriptors are parsed with `gst::parse::launch` and must contain an
//! `appsrc` named `src` (`APPSRC_NAME`). Frames are pushed as BGR buffers with
//! timestamps derived from the frame index and the configured rate.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::candidate::APPSRC_NAME;
use super::pipeline::{CodecTag, PipelineExecutor, PipelineSink, SinkFormat};
use crate::frame::Frame;

/// How long a pipeline gets to report an error after going to Playing.
const STARTUP_CHECK: Duration = Duration::from_millis(200);
const EOS_TIMEOUT: Duration = Duration::from_secs(2);

/// In-process executor backed by the system GStreamer installation.
pub struct GstreamerExecutor {
    available: bool,
}

impl GstreamerExecutor {
    pub fn new() -> Self {
        let available = match gst::init() {
            Ok(()) => ["appsrc", "videoconvert", "rtph264pay", "udpsink"]
                .iter()
                .all(|name| gst::ElementFactory::find(name).is_some()),
            Err(err) => {
                log::warn!("GstreamerExecutor: initialization failed: {}", err);
                false
            }
        };
        Self { available }
    }
}

impl Default for GstreamerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineExecutor for GstreamerExecutor {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn supports_native_transport(&self) -> bool {
        self.available
    }

    fn open_sink(
        &mut self,
        descriptor: &str,
        tag: CodecTag,
        format: &SinkFormat,
    ) -> Result<Option<Box<dyn PipelineSink>>> {
        let descriptor = match tag {
            CodecTag::Auto => descriptor.to_string(),
            CodecTag::FourCc(code) => match pin_codec(descriptor, &code) {
                Some(pinned) => pinned,
                None => return Ok(None),
            },
        };

        let pipeline = gst::parse::launch(&descriptor)
            .context("parse pipeline descriptor")?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow!("descriptor did not produce a pipeline"))?;
        let appsrc = pipeline
            .by_name(APPSRC_NAME)
            .with_context(|| format!("descriptor has no appsrc named '{}'", APPSRC_NAME))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| anyhow!("'{}' element is not an appsrc", APPSRC_NAME))?;

        let fps = i32::try_from(format.fps).context("fps out of range")?;
        let info = gst_video::VideoInfo::builder(
            gst_video::VideoFormat::Bgr,
            format.width,
            format.height,
        )
        .fps(gst::Fraction::new(fps, 1))
        .build()
        .context("build video info")?;
        let caps = info.to_caps().context("build appsrc caps")?;
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(true);

        if pipeline.set_state(gst::State::Playing).is_err() {
            let _ = pipeline.set_state(gst::State::Null);
            return Ok(None);
        }
        if let Some(bus) = pipeline.bus() {
            if let Some(message) = bus.timed_pop_filtered(
                gst::ClockTime::from_mseconds(STARTUP_CHECK.as_millis() as u64),
                &[gst::MessageType::Error],
            ) {
                if let gst::MessageView::Error(err) = message.view() {
                    log::debug!("GstreamerExecutor: pipeline error on start: {}", err.error());
                }
                let _ = pipeline.set_state(gst::State::Null);
                return Ok(None);
            }
        }

        let frame_duration =
            gst::ClockTime::from_nseconds(1_000_000_000 / u64::from(format.fps.max(1)));
        Ok(Some(Box::new(GstreamerSink {
            pipeline,
            appsrc,
            frame_duration,
            frames: 0,
        })))
    }
}

/// Pin the encoded caps right before the RTP payloader.
fn pin_codec(descriptor: &str, code: &[u8; 4]) -> Option<String> {
    let caps = match code {
        b"H264" | b"X264" | b"AVC1" | b"h264" => "video/x-h264,stream-format=byte-stream",
        _ => return None,
    };
    let at = descriptor.find("rtph264pay")?;
    Some(format!("{}{} ! {}", &descriptor[..at], caps, &descriptor[at..]))
}

struct GstreamerSink {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    frame_duration: gst::ClockTime,
    frames: u64,
}

impl PipelineSink for GstreamerSink {
    fn push(&mut self, frame: &Frame) -> Result<()> {
        let mut buffer = gst::Buffer::from_mut_slice(frame.as_bytes().to_vec());
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(self.frame_duration * self.frames);
            buffer.set_duration(self.frame_duration);
        }
        self.appsrc
            .push_buffer(buffer)
            .map_err(|err| anyhow!("appsrc rejected buffer: {:?}", err))?;
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.appsrc.end_of_stream();
        if let Some(bus) = self.pipeline.bus() {
            let _ = bus.timed_pop_filtered(
                gst::ClockTime::from_mseconds(EOS_TIMEOUT.as_millis() as u64),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            );
        }
        self.pipeline
            .set_state(gst::State::Null)
            .context("set pipeline to Null")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h264_tag_pins_caps_before_payloader() {
        let pinned = pin_codec("appsrc name=src ! x264enc ! rtph264pay pt=96 ! udpsink", b"H264")
            .expect("pinned");
        assert_eq!(
            pinned,
            "appsrc name=src ! x264enc ! video/x-h264,stream-format=byte-stream ! rtph264pay pt=96 ! udpsink"
        );
        assert!(pin_codec("appsrc ! x264enc ! rtph264pay", b"MJPG").is_none());
    }
}
