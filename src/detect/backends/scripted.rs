use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::backend::{Detector, InferenceParams};
use crate::detect::result::Detection;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorCall {
    Detect,
    Track { persist: bool },
}

/// Shared view of the calls a `ScriptedDetector` received.
#[derive(Clone, Debug, Default)]
pub struct DetectorCallLog {
    calls: Arc<Mutex<Vec<DetectorCall>>>,
}

impl DetectorCallLog {
    pub fn calls(&self) -> Vec<DetectorCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(&self, call: DetectorCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

/// Detector that replays a recorded detection sequence, one entry per call.
///
/// Once the script is exhausted every call returns no detections. Useful for
/// driving the pipeline deterministically from captured fixtures.
pub struct ScriptedDetector {
    class_names: Vec<String>,
    script: VecDeque<Vec<Detection>>,
    fail_at: Option<usize>,
    served: usize,
    log: DetectorCallLog,
    fail_load: bool,
}

impl ScriptedDetector {
    pub fn new(class_names: Vec<String>, script: Vec<Vec<Detection>>) -> Self {
        Self {
            class_names,
            script: script.into(),
            fail_at: None,
            served: 0,
            log: DetectorCallLog::default(),
            fail_load: false,
        }
    }

    /// Make the call with zero-based index `call` fail with an inference error.
    pub fn failing_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    /// Make `load` fail, as if the weights were missing.
    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn call_log(&self) -> DetectorCallLog {
        self.log.clone()
    }

    fn next(&mut self, call: DetectorCall) -> Result<Vec<Detection>> {
        self.log.push(call);
        let index = self.served;
        self.served += 1;
        if self.fail_at == Some(index) {
            return Err(anyhow!("scripted inference failure at call {}", index));
        }
        Ok(self.script.pop_front().unwrap_or_default())
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn load(&mut self, model_path: &str) -> Result<()> {
        if self.fail_load {
            return Err(anyhow!("model file does not exist: {}", model_path));
        }
        Ok(())
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn detect(&mut self, _frame: &Frame, _params: &InferenceParams) -> Result<Vec<Detection>> {
        self.next(DetectorCall::Detect)
    }

    fn track(
        &mut self,
        _frame: &Frame,
        _params: &InferenceParams,
        persist: bool,
    ) -> Result<Vec<Detection>> {
        self.next(DetectorCall::Track { persist })
    }
}
