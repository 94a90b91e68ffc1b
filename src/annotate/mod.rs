//! Overlay drawing.
//!
//! - `Annotator::draw_detections`: boxes and labels for one frame's detections
//! - `Annotator::add_telemetry_overlay`: counters panel in the top-left corner
//!
//! Both take the frame by reference and return an annotated copy. Neither keeps
//! state between calls, so the same inputs always produce the same pixels.

mod font;

use std::fmt;

use crate::detect::Detection;
use crate::frame::Frame;

const BOX_COLOUR: [u8; 3] = [0, 255, 0];
const BOX_THICKNESS: i32 = 2;
const LABEL_TEXT: [u8; 3] = [0, 0, 0];
const LABEL_PAD: i32 = 3;
const PANEL_TEXT: [u8; 3] = [255, 255, 255];

/// Telemetry panel corners, inclusive.
const PANEL: (i32, i32, i32, i32) = (10, 10, 300, 100);
const PANEL_TEXT_X: i32 = 20;
const PANEL_FIRST_BASELINE: i32 = 30;
const PANEL_LINE_STEP: i32 = 20;

/// Where annotated frames are going, shown on the last telemetry line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportStatus {
    Streaming { host: String, port: u16 },
    PreviewOnly,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportStatus::Streaming { host, port } => {
                write!(f, "Streaming to: {}:{}", host, port)
            }
            TransportStatus::PreviewOnly => write!(f, "Preview only - no transport"),
        }
    }
}

/// Draws detection and telemetry overlays.
#[derive(Clone, Debug)]
pub struct Annotator {
    class_names: Vec<String>,
    show_labels: bool,
    show_confidence: bool,
}

impl Annotator {
    pub fn new(class_names: Vec<String>) -> Self {
        Self {
            class_names,
            show_labels: true,
            show_confidence: true,
        }
    }

    pub fn with_labels(mut self, show_labels: bool) -> Self {
        self.show_labels = show_labels;
        self
    }

    pub fn with_confidence(mut self, show_confidence: bool) -> Self {
        self.show_confidence = show_confidence;
        self
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// Copy of `frame` with a box, and optionally a label, per detection.
    pub fn draw_detections(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        let mut out = frame.clone();
        for det in detections {
            let (x1, y1, x2, y2) = det.bbox.to_pixels();
            draw_rectangle(&mut out, x1, y1, x2, y2, BOX_THICKNESS, BOX_COLOUR);
            if self.show_labels {
                let text = self.label_for(det);
                self.draw_label(&mut out, x1, y1, &text);
            }
        }
        out
    }

    /// Copy of `frame` with the counters panel blended into the top-left corner.
    pub fn add_telemetry_overlay(
        &self,
        frame: &Frame,
        frame_count: u64,
        detection_count: usize,
        fps: f64,
        transport: &TransportStatus,
    ) -> Frame {
        let mut out = frame.clone();
        let (left, top, right, bottom) = PANEL;
        darken_rect(&mut out, left, top, right, bottom);

        let lines = [
            format!("Frame: {}", frame_count),
            format!("Detections: {}", detection_count),
            format!("FPS: {:.1}", fps),
            transport.to_string(),
        ];
        for (i, line) in lines.iter().enumerate() {
            let baseline = PANEL_FIRST_BASELINE + i as i32 * PANEL_LINE_STEP;
            draw_text(
                &mut out,
                PANEL_TEXT_X,
                baseline - font::GLYPH_HEIGHT,
                line,
                PANEL_TEXT,
            );
        }
        out
    }

    fn label_for(&self, det: &Detection) -> String {
        // Prefer the table given at construction; the detector's own name otherwise.
        match self.class_names.get(det.class_id) {
            Some(name) if name != &det.class_name => Detection {
                class_name: name.clone(),
                ..det.clone()
            }
            .label(self.show_confidence),
            _ => det.label(self.show_confidence),
        }
    }

    fn draw_label(&self, frame: &mut Frame, x1: i32, y1: i32, text: &str) {
        let text_w = font::text_width(text);
        let label_h = font::GLYPH_HEIGHT + 2 * LABEL_PAD;
        // Above the box when there is room, inside its top edge otherwise.
        let top = match y1.checked_sub(label_h) {
            Some(above) if above >= 0 => above,
            _ => y1,
        };
        fill_rect(
            frame,
            x1,
            top,
            x1.saturating_add(text_w).saturating_add(LABEL_PAD),
            top.saturating_add(label_h - 1),
            BOX_COLOUR,
        );
        draw_text(
            frame,
            x1.saturating_add(LABEL_PAD),
            top.saturating_add(LABEL_PAD),
            text,
            LABEL_TEXT,
        );
    }
}

// ----------------------------------------------------------------------------
// Raster helpers
// ----------------------------------------------------------------------------

/// Outline with the stroke growing inward from the given corners.
fn draw_rectangle(
    frame: &mut Frame,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    thickness: i32,
    colour: [u8; 3],
) {
    if right < left || bottom < top {
        return;
    }
    for t in 0..thickness {
        let (l, r) = (left.saturating_add(t), right.saturating_sub(t));
        let (tp, b) = (top.saturating_add(t), bottom.saturating_sub(t));
        if r < l || b < tp {
            break;
        }
        fill_rect(frame, l, tp, r, tp, colour);
        fill_rect(frame, l, b, r, b, colour);
        fill_rect(frame, l, tp, l, b, colour);
        fill_rect(frame, r, tp, r, b, colour);
    }
}

/// Clip `start..=end` to `0..len`; `None` when nothing is left.
fn clip_span(start: i32, end: i32, len: u32) -> Option<(u32, u32)> {
    let max = i64::from(len) - 1;
    let (start, end) = (i64::from(start).max(0), i64::from(end).min(max));
    if end < start {
        return None;
    }
    Some((start as u32, end as u32))
}

fn fill_rect(frame: &mut Frame, left: i32, top: i32, right: i32, bottom: i32, colour: [u8; 3]) {
    let Some((left, right)) = clip_span(left, right, frame.width()) else {
        return;
    };
    let Some((top, bottom)) = clip_span(top, bottom, frame.height()) else {
        return;
    };
    for y in top..=bottom {
        for x in left..=right {
            frame.pixel_mut(x, y).copy_from_slice(&colour);
        }
    }
}

/// 50% blend with black over the clipped rectangle.
fn darken_rect(frame: &mut Frame, left: i32, top: i32, right: i32, bottom: i32) {
    let Some((left, right)) = clip_span(left, right, frame.width()) else {
        return;
    };
    let Some((top, bottom)) = clip_span(top, bottom, frame.height()) else {
        return;
    };
    for y in top..=bottom {
        for x in left..=right {
            for channel in frame.pixel_mut(x, y) {
                *channel /= 2;
            }
        }
    }
}

/// Render `text` with its top-left glyph corner at (x, y).
fn draw_text(frame: &mut Frame, mut x: i32, y: i32, text: &str, colour: [u8; 3]) {
    let (width, height) = (i64::from(frame.width()), i64::from(frame.height()));
    if i64::from(y) >= height || i64::from(y) + i64::from(font::GLYPH_HEIGHT) <= 0 {
        return;
    }
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if i64::from(x) >= width {
            break;
        }
        let rows = font::glyph(ch);
        for (row, pattern) in rows.iter().enumerate() {
            for col in 0..font::GLYPH_WIDTH {
                if (pattern >> (font::GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                    frame.put_pixel(x + col, y + row as i32, colour);
                }
            }
        }
        x = x.saturating_add(font::ADVANCE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use anyhow::Result;

    fn person(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new(0, "person", 0.9, BoundingBox::new(x1, y1, x2, y2))
    }

    #[test]
    fn empty_detections_leave_frame_unchanged() -> Result<()> {
        let frame = Frame::filled(64, 48, [7, 8, 9])?;
        let annotator = Annotator::new(vec!["person".to_string()]);
        assert_eq!(annotator.draw_detections(&frame, &[]), frame);
        Ok(())
    }

    #[test]
    fn draws_box_outline_without_touching_interior() -> Result<()> {
        let frame = Frame::blank(64, 48)?;
        let annotator = Annotator::new(vec![]).with_labels(false);
        let out = annotator.draw_detections(&frame, &[person(10.0, 10.0, 30.0, 30.0)]);
        assert_eq!(out.pixel(10, 20), Some(BOX_COLOUR));
        assert_eq!(out.pixel(11, 20), Some(BOX_COLOUR));
        assert_eq!(out.pixel(30, 10), Some(BOX_COLOUR));
        assert_eq!(out.pixel(20, 20), Some([0, 0, 0]));
        // Input is untouched.
        assert_eq!(frame.pixel(10, 20), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn label_background_sits_above_the_box() -> Result<()> {
        let frame = Frame::blank(200, 100)?;
        let annotator = Annotator::new(vec!["person".to_string()]);
        let out = annotator.draw_detections(&frame, &[person(20.0, 40.0, 80.0, 90.0)]);
        let label_top = 40 - (font::GLYPH_HEIGHT + 2 * LABEL_PAD);
        assert_eq!(out.pixel(20, label_top as u32), Some(BOX_COLOUR));
        assert_eq!(out.pixel(20, (label_top - 1) as u32), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn boxes_partly_outside_the_frame_are_clipped() -> Result<()> {
        let frame = Frame::blank(32, 32)?;
        let annotator = Annotator::new(vec!["person".to_string()]);
        let out = annotator.draw_detections(&frame, &[person(-10.0, -10.0, 50.0, 50.0)]);
        assert!(out.has_size(32, 32));
        Ok(())
    }

    #[test]
    fn far_out_of_range_boxes_are_cheap_and_harmless() -> Result<()> {
        let frame = Frame::blank(64, 48)?;
        let annotator = Annotator::new(vec!["person".to_string()]);
        let out = annotator.draw_detections(
            &frame,
            &[
                person(3.0e9, 10.0, 3.1e9, 20.0),
                person(10.0, 3.0e9, 20.0, 3.1e9),
                person(-3.0e9, -3.0e9, -2.9e9, -2.9e9),
            ],
        );
        assert_eq!(out, frame);

        // Edges far outside the frame draw nothing.
        let out = annotator.draw_detections(&frame, &[person(-1.0e9, -1.0e9, 1.0e9, 1.0e9)]);
        assert_eq!(out, frame);

        // A box wider than the frame keeps its visible top edge.
        let out = annotator.draw_detections(&frame, &[person(-1.0e9, 5.0, 1.0e9, 40.0)]);
        assert_eq!(out.pixel(32, 5), Some(BOX_COLOUR));
        assert_eq!(out.pixel(32, 6), Some(BOX_COLOUR));
        assert_eq!(out.pixel(32, 24), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn telemetry_overlay_is_deterministic() -> Result<()> {
        let frame = Frame::filled(320, 240, [200, 200, 200])?;
        let annotator = Annotator::new(vec![]);
        let status = TransportStatus::Streaming {
            host: "127.0.0.1".to_string(),
            port: 5004,
        };
        let a = annotator.add_telemetry_overlay(&frame, 12, 3, 29.97, &status);
        let b = annotator.add_telemetry_overlay(&frame, 12, 3, 29.97, &status);
        assert_eq!(a, b);
        // Panel corner is blended, outside it the frame is untouched.
        assert_eq!(a.pixel(10, 10), Some([100, 100, 100]));
        assert_eq!(a.pixel(305, 10), Some([200, 200, 200]));
        Ok(())
    }

    #[test]
    fn telemetry_text_reflects_counters() -> Result<()> {
        let frame = Frame::blank(320, 240)?;
        let annotator = Annotator::new(vec![]);
        let a = annotator.add_telemetry_overlay(&frame, 1, 0, 30.0, &TransportStatus::PreviewOnly);
        let b = annotator.add_telemetry_overlay(&frame, 2, 0, 30.0, &TransportStatus::PreviewOnly);
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn overlay_on_small_frames_is_clipped() -> Result<()> {
        let frame = Frame::blank(8, 8)?;
        let out = Annotator::new(vec![]).add_telemetry_overlay(
            &frame,
            1,
            1,
            1.0,
            &TransportStatus::PreviewOnly,
        );
        assert!(out.has_size(8, 8));
        Ok(())
    }

    #[test]
    fn transport_status_text() {
        let streaming = TransportStatus::Streaming {
            host: "10.0.0.2".to_string(),
            port: 6000,
        };
        assert_eq!(streaming.to_string(), "Streaming to: 10.0.0.2:6000");
        assert_eq!(
            TransportStatus::PreviewOnly.to_string(),
            "Preview only - no transport"
        );
    }
}
