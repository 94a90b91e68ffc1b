//! Frame sources.
//!
//! This module provides the capture side of the pipeline:
//! - Synthetic camera (`stub://` device ids, demos and tests)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - Replay of recorded frames (fixtures)
//!
//! Every source produces packed BGR24 `Frame`s. A source occupies its device from
//! `open` until `close`; `close` is idempotent.

mod camera;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;
pub mod replay;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use camera::CameraSource;
pub use replay::{ReplayHandle, ReplaySource};
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// What the session asks a capture device for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRequest {
    /// Device id: `0`, `/dev/video2`, or `stub://name[?frames=N]`.
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl DeviceRequest {
    pub fn from_config(config: &crate::PipelineConfig) -> Self {
        Self {
            device_id: config.camera_id.clone(),
            width: config.width,
            height: config.height,
            fps: config.fps,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// A blocking capture device.
pub trait FrameSource: Send {
    /// Open the device and apply the requested size and rate.
    ///
    /// An error means the device is unavailable; the caller decides what that
    /// means for the session.
    fn open(&mut self, request: &DeviceRequest) -> Result<()>;

    /// Block until the next frame is available.
    ///
    /// `Ok(None)` signals end of stream (device unplugged, recording exhausted).
    fn read(&mut self) -> Result<Option<Frame>>;

    /// Release the device. Safe to call any number of times.
    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    fn stats(&self) -> SourceStats;
}
