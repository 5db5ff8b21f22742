//! Image pipeline: one JPEG artifact per asset id.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info};
use vigil_abstraction::{DetectionModel, ImageCodec};

use super::{Pipeline, PipelineOptions};
use crate::error::{Result, ServingError};
use crate::request::{DetectionResult, validate_asset_id};

/// Input to the image pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub asset_id: Option<String>,
}

/// Detects on a still image and stores an annotated copy as
/// `<results>/<asset_id>.jpg`.
pub struct ImagePipeline {
    codec: Arc<dyn ImageCodec>,
    results_dir: PathBuf,
    default_min_score: f32,
    min_score: f32,
}

impl ImagePipeline {
    #[must_use]
    pub fn new(codec: Arc<dyn ImageCodec>, results_dir: impl Into<PathBuf>, default_min_score: f32) -> Self {
        Self {
            codec,
            results_dir: results_dir.into(),
            default_min_score,
            min_score: default_min_score,
        }
    }

    /// Artifact path for `asset_id`.
    #[must_use]
    pub fn output_path(&self, asset_id: &str) -> PathBuf {
        self.results_dir.join(format!("{asset_id}.jpg"))
    }
}

impl Pipeline for ImagePipeline {
    type Input = ImageInput;

    fn configure(&mut self, options: &PipelineOptions) {
        self.min_score = options.min_score.unwrap_or(self.default_min_score);
    }

    fn min_score(&self) -> f32 {
        self.min_score
    }

    fn predict(&self, model: &dyn DetectionModel, input: ImageInput) -> Result<DetectionResult> {
        let output = match input.asset_id.as_deref() {
            Some(asset_id) => {
                validate_asset_id(asset_id)?;
                let output = self.output_path(asset_id);
                if output.is_file() {
                    debug!(asset_id, path = %output.display(), "Reusing existing detection result");
                    return Ok(DetectionResult::at(&output));
                }
                Some(output)
            }
            None => None,
        };

        let frame = self.codec.decode(&input.bytes)?;
        let detections = model.predict(&frame, self.min_score).map_err(ServingError::Inference)?;
        debug!(model_id = model.model_id(), detections = detections.len(), min_score = self.min_score, "Image prediction complete");

        let Some(output) = output else {
            return Ok(DetectionResult::empty());
        };
        if detections.is_empty() {
            return Ok(DetectionResult::empty());
        }

        let annotated = model.render(&frame, &detections);
        let jpeg = self.codec.encode_jpeg(&annotated)?;
        persist(&self.results_dir, &output, &jpeg)?;
        info!(path = %output.display(), detections = detections.len(), "Stored image detection result");
        Ok(DetectionResult::at(&output))
    }
}

/// Write `bytes` next to `target` and rename into place, so readers never
/// observe a partial file.
fn persist(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| ServingError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::MockDetector;
    use crate::media::{ImageCrateCodec, encode_png};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn png() -> Vec<u8> {
        encode_png(&RgbImage::from_pixel(32, 32, Rgb([40, 40, 40]))).unwrap()
    }

    fn pipeline(dir: &Path) -> ImagePipeline {
        ImagePipeline::new(Arc::new(ImageCrateCodec::new()), dir, 0.5)
    }

    #[test]
    fn test_detection_writes_jpeg() {
        let temp = TempDir::new().unwrap();
        let model = MockDetector::always("m");
        let input = ImageInput { bytes: png(), asset_id: Some("a1".into()) };

        let result = pipeline(temp.path()).predict(&model, input).unwrap();

        let expected = temp.path().join("a1.jpg");
        assert_eq!(result, DetectionResult::at(&expected));
        let bytes = std::fs::read(&expected).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
        // Only the artifact remains; the temp file was renamed.
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_no_asset_id_returns_empty() {
        let temp = TempDir::new().unwrap();
        let model = MockDetector::always("m");
        let input = ImageInput { bytes: png(), asset_id: None };

        let result = pipeline(temp.path()).predict(&model, input).unwrap();
        assert!(result.is_empty());
        assert_eq!(model.counters().predict_calls(), 1);
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_configure_threshold() {
        let temp = TempDir::new().unwrap();
        let model = MockDetector::always("m").with_score(0.4);
        let mut pipeline = pipeline(temp.path());

        let input = ImageInput { bytes: png(), asset_id: Some("low".into()) };
        assert!(pipeline.predict(&model, input.clone()).unwrap().is_empty());

        pipeline.configure(&PipelineOptions { min_score: Some(0.3) });
        assert!((pipeline.min_score() - 0.3).abs() < f32::EPSILON);
        assert!(!pipeline.predict(&model, input).unwrap().is_empty());

        pipeline.configure(&PipelineOptions::default());
        assert!((pipeline.min_score() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_undecodable_bytes_leave_nothing() {
        let temp = TempDir::new().unwrap();
        let model = MockDetector::always("m");
        let input = ImageInput { bytes: b"junk".to_vec(), asset_id: Some("bad".into()) };

        let err = pipeline(temp.path()).predict(&model, input).unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(model.counters().predict_calls(), 0);
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unsafe_asset_id_rejected() {
        let temp = TempDir::new().unwrap();
        let model = MockDetector::always("m");
        let input = ImageInput { bytes: png(), asset_id: Some("../escape".into()) };

        assert!(matches!(
            pipeline(temp.path()).predict(&model, input),
            Err(ServingError::InvalidInput(_))
        ));
    }
}
