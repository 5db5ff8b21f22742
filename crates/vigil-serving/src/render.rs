//! Drawing detections onto frames.

use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use vigil_abstraction::{DetectionSet, Frame};

/// Outline colour for detection boxes.
pub const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Box outline thickness in pixels.
const THICKNESS: u32 = 2;

/// Returns a copy of `frame` with every detection outlined.
#[must_use]
pub fn draw_detections(frame: &Frame, detections: &DetectionSet) -> Frame {
    let mut annotated = frame.clone();
    for detection in &detections.detections {
        let bbox = detection.bbox;
        for inset in 0..THICKNESS {
            let width = bbox.width().saturating_sub(2 * inset);
            let height = bbox.height().saturating_sub(2 * inset);
            if width == 0 || height == 0 {
                break;
            }
            let x = i32::try_from(bbox.x1 + inset).unwrap_or(i32::MAX);
            let y = i32::try_from(bbox.y1 + inset).unwrap_or(i32::MAX);
            let rect = Rect::at(x, y).of_size(width, height);
            draw_hollow_rect_mut(&mut annotated, rect, BOX_COLOR);
        }
    }
    annotated
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use vigil_abstraction::{BoundingBox, Detection};

    #[test]
    fn test_draws_box_outline_only() {
        let frame = RgbImage::new(20, 20);
        let detections = DetectionSet::new(vec![Detection {
            label: "weapon".to_string(),
            score: 0.9,
            bbox: BoundingBox { x1: 4, y1: 4, x2: 14, y2: 14 },
            track_id: None,
        }]);

        let annotated = draw_detections(&frame, &detections);

        assert_eq!(*annotated.get_pixel(4, 4), BOX_COLOR);
        assert_eq!(*annotated.get_pixel(13, 9), BOX_COLOR);
        assert_eq!(*annotated.get_pixel(9, 9), Rgb([0, 0, 0]));
        assert_eq!(*annotated.get_pixel(0, 0), Rgb([0, 0, 0]));
        // The source frame is untouched.
        assert_eq!(*frame.get_pixel(4, 4), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_empty_set_returns_identical_frame() {
        let frame = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
        assert_eq!(draw_detections(&frame, &DetectionSet::default()), frame);
    }
}
