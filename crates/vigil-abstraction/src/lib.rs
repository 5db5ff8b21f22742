//! Model abstraction layer for Vigil.
//!
//! This crate defines the boundary between the serving core and the opaque
//! detection models and media codecs it drives.

pub mod media;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use media::{
    FourCc, ImageCodec, MediaError, VideoCodec, VideoInfo, VideoReader, VideoWriter,
    VideoWriterSpec,
};

/// A decoded raster frame (8-bit RGB).
pub type Frame = image::RgbImage;

/// Represents an error that can occur when loading or running a detection model.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// A required on-disk artifact does not exist.
    #[error("Missing model artifact: {0}")]
    MissingArtifact(String),

    /// An on-disk artifact exists but could not be parsed.
    #[error("Corrupt model artifact: {0}")]
    CorruptArtifact(String),

    /// The model failed while running inference.
    #[error("Inference Error: {0}")]
    Inference(String),

    /// Other unexpected errors.
    #[error("Other Model Error: {0}")]
    Other(String),
}

impl ModelError {
    /// Whether this failure is caused by bad on-disk state that clearing the
    /// model's local cache may fix.
    #[must_use]
    pub const fn is_artifact_failure(&self) -> bool {
        matches!(self, Self::MissingArtifact(_) | Self::CorruptArtifact(_))
    }
}

/// Axis-aligned box in pixel coordinates, inclusive of `x1`/`y1` and exclusive
/// of `x2`/`y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }
}

/// A single detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label reported by the model.
    pub label: String,
    /// Confidence score in `[0, 1]`.
    pub score: f32,
    /// Location of the object in the frame.
    pub bbox: BoundingBox,
    /// Track identifier, set only by `track` calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u32>,
}

/// Detections produced for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSet {
    pub detections: Vec<Detection>,
}

impl DetectionSet {
    #[must_use]
    pub const fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    /// Keeps only detections at or above `min_score`.
    #[must_use]
    pub fn above(mut self, min_score: f32) -> Self {
        self.detections.retain(|d| d.score >= min_score);
        self
    }
}

/// A loaded detection model.
///
/// Models are shared across worker threads, so implementations must be
/// `Send + Sync`. Stateful tracking must be guarded internally.
pub trait DetectionModel: Send + Sync {
    /// Returns the ID of the model.
    fn model_id(&self) -> &str;

    /// Runs single-image detection at the given confidence threshold.
    ///
    /// # Errors
    /// Returns a `ModelError` if inference fails.
    fn predict(&self, frame: &Frame, confidence: f32) -> Result<DetectionSet, ModelError>;

    /// Runs detection on the next frame of a stream, carrying tracking state
    /// between calls. Defaults to `predict`.
    ///
    /// # Errors
    /// Returns a `ModelError` if inference fails.
    fn track(&self, frame: &Frame, confidence: f32) -> Result<DetectionSet, ModelError> {
        self.predict(frame, confidence)
    }

    /// Drops per-stream tracking state before a new stream starts.
    fn reset_tracking(&self) {}

    /// Returns a copy of `frame` annotated with `detections`.
    fn render(&self, frame: &Frame, detections: &DetectionSet) -> Frame;

    /// Releases resources held by the model. Called once, on eviction.
    fn unload(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(score: f32) -> Detection {
        Detection {
            label: "weapon".to_string(),
            score,
            bbox: BoundingBox { x1: 2, y1: 3, x2: 12, y2: 8 },
            track_id: None,
        }
    }

    #[test]
    fn test_artifact_failures_are_recognized() {
        assert!(ModelError::MissingArtifact("x".into()).is_artifact_failure());
        assert!(ModelError::CorruptArtifact("x".into()).is_artifact_failure());
        assert!(!ModelError::Inference("x".into()).is_artifact_failure());
        assert!(!ModelError::Other("x".into()).is_artifact_failure());
    }

    #[test]
    fn test_bounding_box_dimensions() {
        let bbox = detection(0.9).bbox;
        assert_eq!(bbox.width(), 10);
        assert_eq!(bbox.height(), 5);
        assert_eq!(bbox.area(), 50);

        let inverted = BoundingBox { x1: 5, y1: 5, x2: 1, y2: 1 };
        assert_eq!(inverted.area(), 0);
    }

    #[test]
    fn test_detection_set_threshold() {
        let set = DetectionSet::new(vec![detection(0.2), detection(0.5), detection(0.9)]);
        let kept = set.above(0.5);
        assert_eq!(kept.len(), 2);
        assert!(kept.detections.iter().all(|d| d.score >= 0.5));
        assert!(DetectionSet::default().is_empty());
    }

    #[test]
    fn test_model_error_display() {
        let err = ModelError::CorruptArtifact("model.json".to_string());
        assert_eq!(err.to_string(), "Corrupt model artifact: model.json");
    }

    #[test]
    fn test_detection_serialization_skips_missing_track() {
        let json = serde_json::to_value(detection(0.7)).unwrap();
        assert!(json.get("track_id").is_none());
        assert_eq!(json["label"], "weapon");
    }
}
