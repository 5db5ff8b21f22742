//! Detection pipelines: turn one request input into a result artifact.
//!
//! Both pipelines treat an existing artifact as the answer for its asset and
//! never leave partially written output behind.

pub mod image;
pub mod video;

use vigil_abstraction::DetectionModel;

use crate::error::Result;
use crate::request::DetectionResult;

pub use image::{ImageInput, ImagePipeline};
pub use video::{StagedInput, VideoInput, VideoPipeline};

/// Per-request pipeline settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineOptions {
    /// Confidence threshold; the pipeline default applies when `None`.
    pub min_score: Option<f32>,
}

/// Common surface of the image and video pipelines.
pub trait Pipeline {
    type Input;

    /// Apply request options.
    fn configure(&mut self, options: &PipelineOptions);

    /// Threshold currently in effect.
    fn min_score(&self) -> f32;

    /// Run `model` over `input` and produce the result artifact.
    ///
    /// # Errors
    /// Returns `ServingError` if decoding, inference or writing fails.
    fn predict(&self, model: &dyn DetectionModel, input: Self::Input) -> Result<DetectionResult>;
}
