use anyhow::{anyhow, Result};

use crate::detect::backend::{Detector, InferenceParams};
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

pub const STUB_SCHEME: &str = "stub://";

/// Horizontal distance the synthetic object moves per frame.
const STEP_PX: u32 = 8;

/// Synthetic detector for demos and tests.
///
/// Reports one object sweeping left to right across the middle third of the
/// frame. Output depends only on the call count, so runs are reproducible.
pub struct StubDetector {
    class_names: Vec<String>,
    calls: u64,
    loaded: bool,
    next_track_id: u64,
    active_track: Option<u64>,
    last_x: Option<u32>,
}

impl StubDetector {
    pub fn new() -> Self {
        Self {
            class_names: Vec::new(),
            calls: 0,
            loaded: false,
            next_track_id: 1,
            active_track: None,
            last_x: None,
        }
    }

    fn synthesize(&mut self, frame: &Frame, params: &InferenceParams) -> Result<Option<Detection>> {
        if !self.loaded {
            return Err(anyhow!("stub detector used before load"));
        }
        let index = self.calls;
        self.calls += 1;

        let width = frame.width();
        let height = frame.height();
        let box_w = (width / 4).max(1);
        let box_h = (height / 3).max(1);
        let travel = width.saturating_sub(box_w).max(1);
        let x = ((index as u32).wrapping_mul(STEP_PX)) % travel;
        let y = height / 3;

        let wrapped = self.last_x.is_some_and(|prev| x < prev);
        self.last_x = Some(x);
        if wrapped {
            self.active_track = None;
        }

        let confidence = 0.55 + (index % 10) as f32 * 0.04;
        if confidence < params.confidence {
            return Ok(None);
        }

        let bbox = BoundingBox::new(
            x as f32,
            y as f32,
            (x + box_w) as f32,
            (y + box_h).min(height) as f32,
        );
        Ok(Some(Detection::new(
            0,
            self.class_names[0].clone(),
            confidence,
            bbox,
        )))
    }

    fn assign_track(&mut self) -> u64 {
        match self.active_track {
            Some(id) => id,
            None => {
                let id = self.next_track_id;
                self.next_track_id += 1;
                self.active_track = Some(id);
                id
            }
        }
    }
}

impl Default for StubDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &str {
        "stub"
    }

    fn load(&mut self, model_path: &str) -> Result<()> {
        let class = model_path
            .strip_prefix(STUB_SCHEME)
            .ok_or_else(|| anyhow!("stub detector cannot load '{}'", model_path))?;
        let mut classes: Vec<String> = class
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if classes.is_empty() {
            classes.push("object".to_string());
        }
        self.class_names = classes;
        self.loaded = true;
        Ok(())
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn detect(&mut self, frame: &Frame, params: &InferenceParams) -> Result<Vec<Detection>> {
        Ok(self.synthesize(frame, params)?.into_iter().collect())
    }

    fn track(
        &mut self,
        frame: &Frame,
        params: &InferenceParams,
        persist: bool,
    ) -> Result<Vec<Detection>> {
        let Some(detection) = self.synthesize(frame, params)? else {
            return Ok(Vec::new());
        };
        if !persist {
            self.active_track = None;
        }
        let track_id = self.assign_track();
        Ok(vec![detection.with_track_id(track_id)])
    }
}
