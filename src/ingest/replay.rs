//! Replay of pre-recorded frames.
//!
//! `ReplaySource` hands out a fixed list of frames in order and then reports end
//! of stream. A cloned `ReplayHandle` observes open/close activity after the
//! source has been moved into a session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::{DeviceRequest, FrameSource, SourceStats};
use crate::frame::Frame;

#[derive(Debug, Default)]
struct ReplayState {
    opens: u32,
    closes: u32,
    open: bool,
    frames_read: u64,
}

/// Observer for a `ReplaySource`.
#[derive(Clone, Debug, Default)]
pub struct ReplayHandle {
    state: Arc<Mutex<ReplayState>>,
}

impl ReplayHandle {
    pub fn opens(&self) -> u32 {
        self.lock().opens
    }

    /// Number of `close` calls that released an open device.
    pub fn closes(&self) -> u32 {
        self.lock().closes
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn frames_read(&self) -> u64 {
        self.lock().frames_read
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReplayState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Frame source backed by an in-memory recording.
pub struct ReplaySource {
    name: String,
    recording: Vec<Frame>,
    pending: VecDeque<Frame>,
    fail_open: bool,
    fail_read_at: Option<u64>,
    target: Option<(u32, u32)>,
    handle: ReplayHandle,
}

impl ReplaySource {
    pub fn new(name: impl Into<String>, frames: Vec<Frame>) -> Self {
        Self {
            name: name.into(),
            recording: frames,
            pending: VecDeque::new(),
            fail_open: false,
            fail_read_at: None,
            target: None,
            handle: ReplayHandle::default(),
        }
    }

    /// `count` copies of a flat-colour frame.
    pub fn uniform(count: usize, width: u32, height: u32) -> Result<Self> {
        let mut frames = Vec::with_capacity(count);
        for i in 0..count {
            let shade = (i % 256) as u8;
            frames.push(Frame::filled(width, height, [shade, shade, shade])?);
        }
        Ok(Self::new("replay", frames))
    }

    /// Make `open` fail as if the device were missing.
    pub fn unavailable(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Make the read after `frames` successful reads fail.
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_read_at = Some(frames);
        self
    }

    pub fn handle(&self) -> ReplayHandle {
        self.handle.clone()
    }
}

impl FrameSource for ReplaySource {
    fn open(&mut self, request: &DeviceRequest) -> Result<()> {
        if self.fail_open {
            return Err(anyhow!("replay device '{}' is unavailable", self.name));
        }
        self.pending = self.recording.iter().cloned().collect();
        self.target = Some((request.width, request.height));
        let mut state = self.handle.lock();
        state.opens += 1;
        state.open = true;
        state.frames_read = 0;
        log::info!(
            "ReplaySource: connected to {} ({} frames)",
            self.name,
            self.recording.len()
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        let Some((width, height)) = self.target else {
            return Err(anyhow!("replay source read before open"));
        };
        let frames_read = self.handle.frames_read();
        if self.fail_read_at == Some(frames_read) {
            return Err(anyhow!("replay device '{}' read failed", self.name));
        }
        let Some(frame) = self.pending.pop_front() else {
            return Ok(None);
        };
        self.handle.lock().frames_read += 1;
        Ok(Some(frame.resized(width, height)?))
    }

    fn close(&mut self) -> Result<()> {
        if self.target.take().is_some() {
            self.pending.clear();
            let mut state = self.handle.lock();
            state.closes += 1;
            state.open = false;
            log::info!("ReplaySource: released {}", self.name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.target.is_some()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.handle.frames_read(),
            device: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DeviceRequest {
        DeviceRequest {
            device_id: "replay".to_string(),
            width: 4,
            height: 2,
            fps: 30,
        }
    }

    #[test]
    fn replays_in_order_then_ends() -> Result<()> {
        let mut source = ReplaySource::uniform(3, 4, 2)?;
        source.open(&request())?;
        for expected in 0..3u8 {
            let frame = source.read()?.expect("frame");
            assert_eq!(frame.pixel(0, 0), Some([expected; 3]));
        }
        assert!(source.read()?.is_none());
        Ok(())
    }

    #[test]
    fn handle_tracks_open_and_close() -> Result<()> {
        let mut source = ReplaySource::uniform(1, 4, 2)?;
        let handle = source.handle();
        source.open(&request())?;
        assert!(handle.is_open());
        source.close()?;
        source.close()?;
        assert_eq!(handle.opens(), 1);
        assert_eq!(handle.closes(), 1);
        assert!(!handle.is_open());
        Ok(())
    }

    #[test]
    fn frames_are_scaled_to_the_request() -> Result<()> {
        let mut source = ReplaySource::uniform(1, 8, 4)?;
        source.open(&request())?;
        let frame = source.read()?.expect("frame");
        assert!(frame.has_size(4, 2));
        Ok(())
    }

    #[test]
    fn unavailable_device_fails_open() -> Result<()> {
        let mut source = ReplaySource::uniform(1, 4, 2)?.unavailable();
        assert!(source.open(&request()).is_err());
        assert!(!source.is_open());
        Ok(())
    }

    #[test]
    fn read_failure_after_n_frames() -> Result<()> {
        let mut source = ReplaySource::uniform(5, 4, 2)?.failing_after(2);
        source.open(&request())?;
        assert!(source.read()?.is_some());
        assert!(source.read()?.is_some());
        assert!(source.read().is_err());
        Ok(())
    }
}
