//! Ranked encoder candidates for the in-process pipeline writer.

use crate::config::PipelineConfig;

/// Name of the `appsrc` element every descriptor feeds frames into.
pub const APPSRC_NAME: &str = "src";

/// One way to build an H.264/RTP pipeline.
///
/// Candidate lists are ordered by preference: quality and latency first,
/// compatibility last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderCandidate {
    pub pipeline_descriptor: String,
    pub encoder_name: String,
}

impl EncoderCandidate {
    pub fn new(encoder_name: impl Into<String>, pipeline_descriptor: impl Into<String>) -> Self {
        Self {
            pipeline_descriptor: pipeline_descriptor.into(),
            encoder_name: encoder_name.into(),
        }
    }
}

/// The built-in candidate ladder for `config`.
pub fn default_candidates(config: &PipelineConfig) -> Vec<EncoderCandidate> {
    let kbps = config.bitrate_kbps;
    let bps = u64::from(kbps) * 1000;
    let encoders = [
        (
            "x264enc",
            format!(
                "x264enc bitrate={} tune=zerolatency speed-preset=ultrafast key-int-max=15",
                kbps
            ),
        ),
        (
            "v4l2h264enc",
            format!(
                "v4l2h264enc extra-controls=\"controls,video_bitrate={}\" ! video/x-h264,profile=baseline",
                bps
            ),
        ),
        (
            "openh264enc",
            format!("openh264enc bitrate={} complexity=low gop-size=15", bps),
        ),
        ("avenc_h264", format!("avenc_h264 bitrate={} gop-size=15", bps)),
    ];

    let mut candidates: Vec<EncoderCandidate> = encoders
        .iter()
        .map(|(name, encoder)| {
            EncoderCandidate::new(
                *name,
                format!(
                    "{} ! {} ! {}",
                    source_stage(config),
                    encoder,
                    rtp_stage(config)
                ),
            )
        })
        .collect();

    candidates.push(EncoderCandidate::new(
        "x264enc-minimal",
        format!(
            "appsrc name={} ! videoconvert ! x264enc tune=zerolatency ! {}",
            APPSRC_NAME,
            rtp_stage(config)
        ),
    ));
    candidates
}

fn source_stage(config: &PipelineConfig) -> String {
    format!(
        "appsrc name={} is-live=true format=time ! videoconvert ! \
         video/x-raw,format=I420,width={},height={},framerate={}/1",
        APPSRC_NAME, config.width, config.height, config.fps
    )
}

fn rtp_stage(config: &PipelineConfig) -> String {
    format!(
        "rtph264pay config-interval=1 pt=96 ! udpsink host={} port={}",
        config.host, config.port
    )
}
