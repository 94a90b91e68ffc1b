//! Local presentation surface.
//!
//! `SnapshotPreview` keeps the latest annotated frame as a JPEG on disk (replaced
//! atomically, so viewers never see a torn file) and treats a `q` typed on
//! stdin as the cancel keystroke. Headless sessions construct no presenter.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::frame::Frame;

const JPEG_QUALITY: u8 = 80;

/// What the user asked for while a frame was on screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewEvent {
    Continue,
    Quit,
}

/// Shows annotated frames and reports the cancel keystroke.
pub trait Presenter: Send {
    fn present(&mut self, title: &str, frame: &Frame) -> Result<PreviewEvent>;

    /// Tear the surface down. Safe to call any number of times.
    fn close(&mut self) -> Result<()>;
}

/// Presenter writing JPEG snapshots.
pub struct SnapshotPreview {
    path: PathBuf,
    keys: Option<KeyPoll>,
    title: Option<String>,
    frames: u64,
    open: bool,
}

impl SnapshotPreview {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keys: KeyPoll::stdin(),
            title: None,
            frames: 0,
            open: true,
        }
    }

    /// Disable the stdin keystroke poll (tests, non-interactive runs).
    pub fn without_keyboard(mut self) -> Self {
        self.keys = None;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }
}

impl Presenter for SnapshotPreview {
    fn present(&mut self, title: &str, frame: &Frame) -> Result<PreviewEvent> {
        if !self.open {
            return Err(anyhow!("preview surface is closed"));
        }
        if self.title.as_deref() != Some(title) {
            log::info!("SnapshotPreview: {} -> {}", title, self.path.display());
            self.title = Some(title.to_string());
        }
        let jpeg = encode_jpeg(frame)?;
        write_atomic(&self.path, &jpeg)
            .with_context(|| format!("write preview {}", self.path.display()))?;
        self.frames += 1;

        let quit = match self.keys.as_mut() {
            Some(keys) => keys.quit_requested(),
            None => false,
        };
        Ok(if quit {
            PreviewEvent::Quit
        } else {
            PreviewEvent::Continue
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            log::info!(
                "SnapshotPreview: closed after {} frames ({})",
                self.frames,
                self.path.display()
            );
        }
        Ok(())
    }
}

fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let mut rgb = frame.as_bytes().to_vec();
    for px in rgb.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode(&rgb, frame.width(), frame.height(), ExtendedColorType::Rgb8)
        .map_err(|err| anyhow!("JPEG encode failed: {}", err))?;
    Ok(out)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Keystroke polling
// ----------------------------------------------------------------------------

/// Non-blocking check of stdin for a `q`.
struct KeyPoll {
    #[cfg(target_os = "linux")]
    fd: libc::c_int,
}

impl KeyPoll {
    #[cfg(target_os = "linux")]
    fn stdin() -> Option<Self> {
        Some(Self {
            fd: libc::STDIN_FILENO,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn stdin() -> Option<Self> {
        None
    }

    #[cfg(target_os = "linux")]
    fn quit_requested(&mut self) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pfd is a valid pollfd for the duration of the call.
        let ready = unsafe { libc::poll(&mut pfd, 1, 0) };
        if ready <= 0 || pfd.revents & libc::POLLIN == 0 {
            return false;
        }
        let mut buf = [0u8; 64];
        // SAFETY: buf is writable for buf.len() bytes.
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            return false;
        }
        buf[..n as usize]
            .iter()
            .any(|b| *b == b'q' || *b == b'Q')
    }

    #[cfg(not(target_os = "linux"))]
    fn quit_requested(&mut self) -> bool {
        false
    }
}
