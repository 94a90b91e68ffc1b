//! Camera selection by device id.
//!
//! `stub://...` ids select the synthetic camera. Anything else is a capture
//! device: a bare index `N` means `/dev/videoN`, a path is used as given.

use anyhow::{anyhow, Result};

use super::synthetic::STUB_PREFIX;
use super::{DeviceRequest, FrameSource, SourceStats, SyntheticSource};
use crate::frame::Frame;

/// Frame source chosen from the configured camera id at `open`.
pub struct CameraSource {
    backend: Option<CameraBackend>,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(super::V4l2Source),
}

impl CameraSource {
    pub fn new() -> Self {
        Self { backend: None }
    }

    fn source_mut(&mut self) -> Option<&mut dyn FrameSource> {
        match self.backend.as_mut()? {
            CameraBackend::Synthetic(source) => Some(source),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => Some(source),
        }
    }

    fn source(&self) -> Option<&dyn FrameSource> {
        match self.backend.as_ref()? {
            CameraBackend::Synthetic(source) => Some(source),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => Some(source),
        }
    }
}

impl Default for CameraSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self, request: &DeviceRequest) -> Result<()> {
        if let Some(previous) = self.source_mut() {
            previous.close()?;
        }
        let mut backend = select_backend(&request.device_id)?;
        match &mut backend {
            CameraBackend::Synthetic(source) => source.open(request)?,
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.open(request)?,
        }
        self.backend = Some(backend);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        match self.source_mut() {
            Some(source) => source.read(),
            None => Err(anyhow!("camera read before open")),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.source_mut() {
            Some(source) => source.close(),
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.source().is_some_and(|source| source.is_open())
    }

    fn stats(&self) -> SourceStats {
        self.source().map(|source| source.stats()).unwrap_or_default()
    }
}

fn select_backend(device_id: &str) -> Result<CameraBackend> {
    if device_id.starts_with(STUB_PREFIX) {
        return Ok(CameraBackend::Synthetic(SyntheticSource::new()));
    }
    let path = device_path(device_id)?;
    open_device_backend(path)
}

#[cfg(feature = "ingest-v4l2")]
fn open_device_backend(path: String) -> Result<CameraBackend> {
    Ok(CameraBackend::Device(super::V4l2Source::new(path)))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device_backend(path: String) -> Result<CameraBackend> {
    Err(anyhow!(
        "capture device {} requires the ingest-v4l2 feature",
        path
    ))
}

/// Resolve a camera id to a device node path.
pub(crate) fn device_path(device_id: &str) -> Result<String> {
    let id = device_id.trim();
    if id.is_empty() {
        return Err(anyhow!("camera id must not be empty"));
    }
    if id.chars().all(|c| c.is_ascii_digit()) {
        return Ok(format!("/dev/video{}", id));
    }
    Ok(id.to_string())
}
