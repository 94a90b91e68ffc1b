use anyhow::{anyhow, Result};

/// Pixel layouts a capture device may hand back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Bgr24,
    Rgb24,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    /// Map a V4L2 fourcc onto a supported layout.
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"BGR3" => Some(Self::Bgr24),
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"NV12" => Some(Self::Nv12),
            _ => None,
        }
    }
}

/// Convert a captured buffer into packed BGR24.
pub(crate) fn normalize_to_bgr(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let count = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    match format {
        PixelFormat::Bgr24 => {
            expect_len("BGR", pixels, count * 3)?;
            Ok(pixels.to_vec())
        }
        PixelFormat::Rgb24 => {
            expect_len("RGB", pixels, count * 3)?;
            let mut bgr = pixels.to_vec();
            for px in bgr.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            Ok(bgr)
        }
        PixelFormat::Yuyv => {
            if w % 2 != 0 {
                return Err(anyhow!("YUYV frame width {} is odd", width));
            }
            expect_len("YUYV", pixels, count * 2)?;
            let mut bgr = Vec::with_capacity(count * 3);
            for quad in pixels.chunks_exact(4) {
                let u = quad[1] as f32 - 128.0;
                let v = quad[3] as f32 - 128.0;
                bgr.extend_from_slice(&yuv_to_bgr(quad[0] as f32, u, v));
                bgr.extend_from_slice(&yuv_to_bgr(quad[2] as f32, u, v));
            }
            Ok(bgr)
        }
        PixelFormat::Nv12 => {
            if w % 2 != 0 || h % 2 != 0 {
                return Err(anyhow!("NV12 frame {}x{} has an odd dimension", width, height));
            }
            expect_len("NV12", pixels, count + count / 2)?;
            let mut bgr = vec![0u8; count * 3];
            for j in 0..h {
                for i in 0..w {
                    let y = pixels[j * w + i] as f32;
                    let uv_index = count + (j / 2) * w + (i / 2) * 2;
                    let u = pixels[uv_index] as f32 - 128.0;
                    let v = pixels[uv_index + 1] as f32 - 128.0;
                    let offset = (j * w + i) * 3;
                    bgr[offset..offset + 3].copy_from_slice(&yuv_to_bgr(y, u, v));
                }
            }
            Ok(bgr)
        }
    }
}

fn expect_len(label: &str, pixels: &[u8], expected: usize) -> Result<()> {
    if pixels.len() != expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            label,
            expected,
            pixels.len()
        ));
    }
    Ok(())
}

fn yuv_to_bgr(y: f32, u: f32, v: f32) -> [u8; 3] {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    [clamp_to_u8(b), clamp_to_u8(g), clamp_to_u8(r)]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
