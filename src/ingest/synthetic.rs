//! Synthetic camera for `stub://` device ids.
//!
//! Produces a gradient background with a bright block drifting across it, so the
//! downstream encoder sees real motion. `stub://name?frames=N` ends the stream
//! after N frames.

use anyhow::{anyhow, Context, Result};

use super::{DeviceRequest, FrameSource, SourceStats};
use crate::frame::Frame;

pub(crate) const STUB_PREFIX: &str = "stub://";

/// Synthetic frame source.
pub struct SyntheticSource {
    device: String,
    width: u32,
    height: u32,
    frame_limit: Option<u64>,
    frame_count: u64,
    open: bool,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            device: String::new(),
            width: 0,
            height: 0,
            frame_limit: None,
            frame_count: 0,
            open: false,
        }
    }

    fn generate(&self) -> Result<Frame> {
        let mut frame = Frame::blank(self.width, self.height)?;
        let w = self.width;
        let h = self.height;
        for y in 0..h {
            for x in 0..w {
                let px = frame.pixel_mut(x, y);
                px[0] = ((x * 255) / w.max(1)) as u8;
                px[1] = ((y * 255) / h.max(1)) as u8;
                px[2] = (self.frame_count % 256) as u8;
            }
        }

        // Drifting block, one sixth of the frame, moving 4 px per frame.
        let block = (w.min(h) / 6).max(1);
        let travel = w.saturating_sub(block).max(1) as u64;
        let left = ((self.frame_count * 4) % travel) as i32;
        let top = (h / 2).saturating_sub(block / 2) as i32;
        for dy in 0..block as i32 {
            for dx in 0..block as i32 {
                frame.put_pixel(left + dx, top + dy, [240, 240, 240]);
            }
        }
        Ok(frame)
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self, request: &DeviceRequest) -> Result<()> {
        let (name, limit) = parse_stub_id(&request.device_id)?;
        if request.width == 0 || request.height == 0 {
            return Err(anyhow!(
                "invalid synthetic frame size {}x{}",
                request.width,
                request.height
            ));
        }
        self.device = name;
        self.width = request.width;
        self.height = request.height;
        self.frame_limit = limit;
        self.frame_count = 0;
        self.open = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{}@{}fps)",
            request.device_id,
            self.width,
            self.height,
            request.fps
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Err(anyhow!("synthetic source read before open"));
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let frame = self.generate()?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            log::info!("SyntheticSource: released {}", self.device);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.device.clone(),
        }
    }
}

/// Split `stub://name?frames=N` into its name and optional frame limit.
pub(crate) fn parse_stub_id(device_id: &str) -> Result<(String, Option<u64>)> {
    let rest = device_id
        .strip_prefix(STUB_PREFIX)
        .ok_or_else(|| anyhow!("'{}' is not a stub:// device id", device_id))?;
    let (name, query) = match rest.split_once('?') {
        Some((name, query)) => (name, Some(query)),
        None => (rest, None),
    };

    let mut limit = None;
    if let Some(query) = query {
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "frames" => {
                    let frames: u64 = value
                        .parse()
                        .with_context(|| format!("invalid frames value '{}'", value))?;
                    limit = Some(frames);
                }
                "" => {}
                other => return Err(anyhow!("unknown stub option '{}'", other)),
            }
        }
    }
    Ok((name.to_string(), limit))
}
