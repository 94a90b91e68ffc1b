//! V4L2 frame source.
//!
//! `V4l2Source` captures from a local device node (e.g. /dev/video0) through
//! memory-mapped buffers. It asks the driver for BGR3 at the requested size and
//! accepts whatever supported layout the driver settles on, converting to BGR24.
//! Frames are rescaled when the driver picks a different size.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_bgr, PixelFormat};
use super::{DeviceRequest, FrameSource, SourceStats};
use crate::frame::Frame;

/// Capture buffers kept in flight.
const BUFFER_COUNT: u32 = 4;

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

/// Production V4L2 source using libv4l.
pub struct V4l2Source {
    path: String,
    state: Option<DeviceState>,
    pixel_format: PixelFormat,
    active_width: u32,
    active_height: u32,
    target_width: u32,
    target_height: u32,
    frame_count: u64,
}

impl V4l2Source {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: None,
            pixel_format: PixelFormat::Bgr24,
            active_width: 0,
            active_height: 0,
            target_width: 0,
            target_height: 0,
            frame_count: 0,
        }
    }
}

impl FrameSource for V4l2Source {
    fn open(&mut self, request: &DeviceRequest) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open v4l2 device {}", self.path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = request.width;
        format.height = request.height;
        format.fourcc = v4l::FourCC::new(b"BGR3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set format on {}: {}", self.path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} settled on unsupported format {}",
                self.path,
                format.fourcc
            )
        })?;

        if request.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(request.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", self.path, err);
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        self.state = Some(state);
        self.pixel_format = pixel_format;
        self.active_width = format.width;
        self.active_height = format.height;
        self.target_width = request.width;
        self.target_height = request.height;
        self.frame_count = 0;

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.path,
            self.active_width,
            self.active_height,
            self.pixel_format
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.active_width, self.active_height, self.pixel_format);
        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let bgr = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_bgr(&buf[..used], width, height, format)
        })?;

        self.frame_count += 1;
        let frame = Frame::from_bgr(width, height, bgr)?;
        Ok(Some(frame.resized(self.target_width, self.target_height)?))
    }

    fn close(&mut self) -> Result<()> {
        if self.state.take().is_some() {
            log::info!("V4l2Source: released {}", self.path);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.path.clone(),
        }
    }
}
