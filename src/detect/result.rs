/// Axis-aligned box in pixel coordinates, (x1, y1) top-left and (x2, y2) bottom-right.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Corners rounded to whole pixels.
    pub fn to_pixels(&self) -> (i32, i32, i32, i32) {
        (
            self.x1.round() as i32,
            self.y1.round() as i32,
            self.x2.round() as i32,
            self.y2.round() as i32,
        )
    }
}

/// One detected object in one frame.
///
/// Produced by a `Detector` and dropped once the frame is annotated.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    /// Confidence in 0..=1.
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Identity kept across frames by the tracking mode.
    pub track_id: Option<u64>,
}

impl Detection {
    pub fn new(
        class_id: usize,
        class_name: impl Into<String>,
        confidence: f32,
        bbox: BoundingBox,
    ) -> Self {
        Self {
            class_id,
            class_name: class_name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
            track_id: None,
        }
    }

    pub fn with_track_id(mut self, track_id: u64) -> Self {
        self.track_id = Some(track_id);
        self
    }

    /// Overlay text: `person ID:4 0.87`. The id segment appears only for tracked
    /// detections.
    pub fn label(&self, with_confidence: bool) -> String {
        let mut label = self.class_name.clone();
        if let Some(track_id) = self.track_id {
            label.push_str(&format!(" ID:{}", track_id));
        }
        if with_confidence {
            label.push_str(&format!(" {:.2}", self.confidence));
        }
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        let det = Detection::new(0, "person", 1.7, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(det.confidence, 1.0);
    }

    #[test]
    fn label_includes_track_id_only_when_tracked() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let det = Detection::new(0, "person", 0.876, bbox);
        assert_eq!(det.label(true), "person 0.88");
        assert_eq!(det.label(false), "person");
        assert_eq!(det.with_track_id(4).label(true), "person ID:4 0.88");
    }

    #[test]
    fn inverted_box_has_zero_extent() {
        let bbox = BoundingBox::new(10.0, 10.0, 5.0, 2.0);
        assert_eq!(bbox.width(), 0.0);
        assert_eq!(bbox.height(), 0.0);
        assert_eq!(bbox.to_pixels(), (10, 10, 5, 2));
    }
}
