//! push_streamer - capture, detect, annotate and push H.264 over RTP.
//!
//! This binary:
//! 1. Builds the session config (defaults <- config file <- flags/env)
//! 2. Resolves the detector for the model path
//! 3. Opens the camera and negotiates a transport (pipeline writer, encoder process)
//! 4. Streams until end of stream, Ctrl-C, a `q` on stdin, or a fatal error
//!
//! Exit code is 0 on end of stream or cancellation, 1 on failure.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use detect_streamer::encode::{TransportStrategy, DEFAULT_ENCODER_PROGRAM};
use detect_streamer::{
    CameraSource, CancelToken, DetectorRegistry, PipelineConfig, PipelineConfigFile, Presenter,
    SessionReport, SnapshotPreview, StreamError, StreamOrchestrator,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Real-time detection overlay streamer (H.264 over RTP/UDP)"
)]
struct Args {
    /// JSON or TOML config file; flags override its values.
    #[arg(long, env = "STREAMER_CONFIG")]
    config: Option<PathBuf>,

    /// Model location (`stub://<class>` for the built-in detector).
    #[arg(long, env = "STREAMER_MODEL_PATH")]
    model_path: Option<String>,

    /// Receiver host.
    #[arg(long, env = "STREAMER_HOST")]
    host: Option<String>,

    /// Receiver UDP port.
    #[arg(long, env = "STREAMER_PORT")]
    port: Option<u16>,

    #[arg(long, env = "STREAMER_WIDTH")]
    width: Option<u32>,

    #[arg(long, env = "STREAMER_HEIGHT")]
    height: Option<u32>,

    #[arg(long, env = "STREAMER_FPS")]
    fps: Option<u32>,

    /// Target H.264 bitrate in kbit/s.
    #[arg(long, env = "STREAMER_BITRATE_KBPS")]
    bitrate_kbps: Option<u32>,

    /// Camera index, device path, or `stub://<name>[?frames=N]`.
    #[arg(long, env = "STREAMER_CAMERA_ID")]
    camera_id: Option<String>,

    #[arg(long, env = "STREAMER_CONFIDENCE")]
    confidence_threshold: Option<f32>,

    #[arg(long, env = "STREAMER_IOU")]
    iou_threshold: Option<f32>,

    /// Inference device: cpu, cuda, cuda:N or mps.
    #[arg(long, env = "STREAMER_DEVICE")]
    inference_device: Option<String>,

    #[arg(long, env = "STREAMER_TRACKING", num_args = 0..=1, default_missing_value = "true")]
    tracking_enabled: Option<bool>,

    /// Run without any preview surface.
    #[arg(long, env = "STREAMER_HEADLESS", num_args = 0..=1, default_missing_value = "true")]
    headless: Option<bool>,

    #[arg(long, env = "STREAMER_SHOW_PREVIEW", num_args = 0..=1, default_missing_value = "true")]
    show_preview: Option<bool>,

    /// Transport strategy: auto, pipeline, process or none.
    #[arg(long, env = "STREAMER_TRANSPORT", default_value = "auto")]
    transport: TransportStrategy,

    /// External encoder executable for the process transport.
    #[arg(long, env = "STREAMER_ENCODER_PROGRAM", default_value = DEFAULT_ENCODER_PROGRAM)]
    encoder_program: String,

    /// Where the preview snapshot is written.
    #[arg(long, env = "STREAMER_PREVIEW_PATH", default_value = "preview.jpg")]
    preview_path: PathBuf,
}

impl Args {
    fn overrides(&self) -> PipelineConfigFile {
        PipelineConfigFile {
            model_path: self.model_path.clone(),
            host: self.host.clone(),
            port: self.port,
            width: self.width,
            height: self.height,
            fps: self.fps,
            bitrate_kbps: self.bitrate_kbps,
            camera_id: self.camera_id.clone(),
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            inference_device: self.inference_device.clone(),
            tracking_enabled: self.tracking_enabled,
            headless: self.headless,
            show_preview: self.show_preview,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };
    config.apply_file(args.overrides());
    config.validate()?;

    log::info!(
        "push_streamer {}: {}x{}@{}fps {}kbps -> {} (camera {}, model {})",
        env!("CARGO_PKG_VERSION"),
        config.width,
        config.height,
        config.fps,
        config.bitrate_kbps,
        config.target_addr(),
        config.camera_id,
        config.model_path
    );

    let detector = match DetectorRegistry::with_builtin().resolve(&config.model_path) {
        Ok(detector) => detector,
        Err(err) => {
            let report = SessionReport::not_started(StreamError::ModelLoadFailed {
                model: config.model_path.clone(),
                reason: format!("{:#}", err),
            });
            std::process::exit(report.exit_code());
        }
    };

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping session...");
        handler_token.cancel();
    })
    .context("install Ctrl-C handler")?;

    let presenter: Option<Box<dyn Presenter>> = if config.presents_preview() {
        Some(Box::new(SnapshotPreview::new(&args.preview_path)))
    } else {
        None
    };
    let backends = args.transport.backends(&args.encoder_program);

    let session = StreamOrchestrator::new(
        config,
        Box::new(CameraSource::new()),
        detector,
        backends,
        presenter,
        cancel,
    )?;
    let report = session.run();
    std::process::exit(report.exit_code());
}
