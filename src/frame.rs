//! Frame buffers flowing through the pipeline.
//!
//! - `Frame`: fixed-size packed BGR24 pixel buffer, row-major.
//!
//! A frame is owned by exactly one loop iteration. The annotator clones before
//! drawing, so the captured buffer is never aliased by a consumer that mutates it.

use anyhow::{anyhow, Context, Result};
use image::{imageops, ImageBuffer, Rgb};

pub const CHANNELS: usize = 3;

/// Packed BGR24 frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a packed BGR24 buffer. Fails when the length does not match the size.
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = byte_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "BGR frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// All-black frame.
    pub fn blank(width: u32, height: u32) -> Result<Self> {
        let len = byte_len(width, height)?;
        Ok(Self {
            width,
            height,
            data: vec![0u8; len],
        })
    }

    /// Frame filled with one BGR colour.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Result<Self> {
        let mut frame = Self::blank(width, height)?;
        for px in frame.data.chunks_exact_mut(CHANNELS) {
            px.copy_from_slice(&bgr);
        }
        Ok(frame)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn has_size(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    /// BGR value at (x, y), or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Set one pixel. Coordinates outside the frame are ignored.
    pub fn put_pixel(&mut self, x: i32, y: i32, bgr: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let offset = self.offset(x as u32, y as u32);
        self.data[offset..offset + CHANNELS].copy_from_slice(&bgr);
    }

    /// Mutable access to the BGR triple at (x, y), bounds already checked by the caller.
    pub(crate) fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let offset = self.offset(x, y);
        &mut self.data[offset..offset + CHANNELS]
    }

    /// Return a copy scaled to `width` x `height`. Same-size input is cloned as is.
    pub fn resized(&self, width: u32, height: u32) -> Result<Self> {
        if self.has_size(width, height) {
            return Ok(self.clone());
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot resize frame to {}x{}", width, height));
        }
        // Channel order is irrelevant for interpolation, so BGR rides in an Rgb buffer.
        let source: ImageBuffer<Rgb<u8>, &[u8]> =
            ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
                .context("frame buffer does not match its dimensions")?;
        let scaled = imageops::resize(&source, width, height, imageops::FilterType::Triangle);
        Self::from_bgr(width, height, scaled.into_raw())
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

fn byte_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length() {
        assert!(Frame::from_bgr(2, 2, vec![0u8; 11]).is_err());
        assert!(Frame::from_bgr(2, 2, vec![0u8; 12]).is_ok());
    }

    #[test]
    fn put_pixel_ignores_out_of_bounds() -> Result<()> {
        let mut frame = Frame::blank(4, 4)?;
        frame.put_pixel(-1, 0, [255, 255, 255]);
        frame.put_pixel(4, 0, [255, 255, 255]);
        assert_eq!(frame, Frame::blank(4, 4)?);

        frame.put_pixel(1, 2, [1, 2, 3]);
        assert_eq!(frame.pixel(1, 2), Some([1, 2, 3]));
        assert_eq!(frame.pixel(4, 4), None);
        Ok(())
    }

    #[test]
    fn resize_changes_dimensions_and_keeps_flat_colour() -> Result<()> {
        let frame = Frame::filled(320, 240, [10, 20, 30])?;
        let scaled = frame.resized(640, 480)?;
        assert!(scaled.has_size(640, 480));
        assert_eq!(scaled.as_bytes().len(), 640 * 480 * 3);
        assert_eq!(scaled.pixel(100, 100), Some([10, 20, 30]));
        Ok(())
    }

    #[test]
    fn resize_to_same_size_is_a_copy() -> Result<()> {
        let frame = Frame::filled(8, 6, [1, 1, 1])?;
        assert_eq!(frame.resized(8, 6)?, frame);
        Ok(())
    }
}
