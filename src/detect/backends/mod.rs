pub mod scripted;
pub mod stub;

pub use scripted::{DetectorCall, DetectorCallLog, ScriptedDetector};
pub use stub::{StubDetector, STUB_SCHEME};
