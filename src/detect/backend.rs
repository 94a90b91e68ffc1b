use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Per-call inference parameters taken from the session config.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceParams {
    /// Minimum confidence for a detection to be reported.
    pub confidence: f32,
    /// IoU threshold used by the detector's suppression step.
    pub iou: f32,
    /// Inference device identifier (`cpu`, `cuda`, `cuda:N`, `mps`).
    pub device: String,
}

impl InferenceParams {
    pub fn from_config(config: &crate::PipelineConfig) -> Self {
        Self {
            confidence: config.confidence_threshold,
            iou: config.iou_threshold,
            device: config.inference_device.clone(),
        }
    }
}

/// Object detector collaborator.
///
/// The pipeline treats the model as opaque: it loads it once, then calls either
/// `detect` or `track` exactly once per frame, in capture order.
///
/// Tracking state (identity association across frames) belongs to the detector.
/// With `persist = true` ids survive between calls for the whole session; the only
/// way to reset them is to construct a new detector.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Load model weights. Called once before the first frame.
    fn load(&mut self, model_path: &str) -> Result<()>;

    /// Class-name table indexed by `Detection::class_id`.
    fn class_names(&self) -> &[String];

    /// Run plain per-frame detection.
    fn detect(&mut self, frame: &Frame, params: &InferenceParams) -> Result<Vec<Detection>>;

    /// Run detection plus track association.
    fn track(
        &mut self,
        frame: &Frame,
        params: &InferenceParams,
        persist: bool,
    ) -> Result<Vec<Detection>>;
}
