use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_MODEL_PATH: &str = "stub://person";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5004;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_BITRATE_KBPS: u32 = 500;
const DEFAULT_CAMERA_ID: &str = "0";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_DEVICE: &str = "cpu";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfigFile {
    pub model_path: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    pub camera_id: Option<String>,
    pub confidence_threshold: Option<f32>,
    pub iou_threshold: Option<f32>,
    pub inference_device: Option<String>,
    pub tracking_enabled: Option<bool>,
    pub headless: Option<bool>,
    pub show_preview: Option<bool>,
}

/// Configuration snapshot for one streaming session.
///
/// A session takes its own copy at construction and never mutates it; changing
/// any parameter means starting a new session.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub model_path: String,
    pub host: String,
    pub port: u16,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub camera_id: String,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub inference_device: String,
    pub tracking_enabled: bool,
    pub headless: bool,
    pub show_preview: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_path: DEFAULT_MODEL_PATH.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            camera_id: DEFAULT_CAMERA_ID.to_string(),
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
            inference_device: DEFAULT_DEVICE.to_string(),
            tracking_enabled: true,
            headless: false,
            show_preview: true,
        }
    }
}

impl PipelineConfig {
    /// Load a config file (JSON, or TOML when the extension is `.toml`) on top of
    /// the defaults. The result is validated.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = read_config_file(path)?;
        let mut cfg = Self::default();
        cfg.apply_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Overlay every field present in `file`.
    pub fn apply_file(&mut self, file: PipelineConfigFile) {
        if let Some(model_path) = file.model_path {
            self.model_path = model_path;
        }
        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(width) = file.width {
            self.width = width;
        }
        if let Some(height) = file.height {
            self.height = height;
        }
        if let Some(fps) = file.fps {
            self.fps = fps;
        }
        if let Some(bitrate) = file.bitrate_kbps {
            self.bitrate_kbps = bitrate;
        }
        if let Some(camera_id) = file.camera_id {
            self.camera_id = camera_id;
        }
        if let Some(conf) = file.confidence_threshold {
            self.confidence_threshold = conf;
        }
        if let Some(iou) = file.iou_threshold {
            self.iou_threshold = iou;
        }
        if let Some(device) = file.inference_device {
            self.inference_device = device;
        }
        if let Some(tracking) = file.tracking_enabled {
            self.tracking_enabled = tracking;
        }
        if let Some(headless) = file.headless {
            self.headless = headless;
        }
        if let Some(show_preview) = file.show_preview {
            self.show_preview = show_preview;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_path.trim().is_empty() {
            return Err(anyhow!("model_path must not be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host must not be empty"));
        }
        if self.port == 0 {
            return Err(anyhow!("port must be greater than zero"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("frame width and height must be greater than zero"));
        }
        // yuv420p subsamples chroma 2x2; odd sizes are rejected by the encoder.
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(anyhow!(
                "frame size {}x{} must have even dimensions",
                self.width,
                self.height
            ));
        }
        if self.fps == 0 {
            return Err(anyhow!("fps must be >= 1"));
        }
        if self.bitrate_kbps == 0 {
            return Err(anyhow!("bitrate_kbps must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within 0..=1, got {}",
                self.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(anyhow!(
                "iou_threshold must be within 0..=1, got {}",
                self.iou_threshold
            ));
        }
        validate_inference_device(&self.inference_device)?;
        Ok(())
    }

    /// Bytes in one packed BGR24 frame at the configured size.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn target_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True when frames should be shown on a local preview surface.
    pub fn presents_preview(&self) -> bool {
        !self.headless && self.show_preview
    }
}

fn validate_inference_device(device: &str) -> Result<()> {
    match device {
        "cpu" | "cuda" | "mps" => Ok(()),
        other => match other.strip_prefix("cuda:") {
            Some(index) if index.parse::<u32>().is_ok() => Ok(()),
            _ => Err(anyhow!(
                "inference_device must be cpu, cuda, cuda:N or mps, got '{}'",
                other
            )),
        },
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
