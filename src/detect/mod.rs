mod backend;
pub mod backends;
mod registry;
mod result;

pub use backend::{Detector, InferenceParams};
pub use backends::{DetectorCall, DetectorCallLog, ScriptedDetector, StubDetector};
pub use registry::DetectorRegistry;
pub use result::{BoundingBox, Detection};
