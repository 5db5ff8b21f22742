//! Video pipeline: track every frame and keep the annotated video only when
//! something was detected.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;
use tracing::{debug, info, warn};
use vigil_abstraction::{DetectionModel, FourCc, VideoCodec, VideoWriterSpec};

use super::{Pipeline, PipelineOptions};
use crate::error::{Result, ServingError};
use crate::request::DetectionResult;

const OUTPUT_PREFIX: &str = "detected_";
const PARTIAL_PREFIX: &str = ".partial-";

/// Input to the video pipeline: a file staged for this request alone.
///
/// The staged file is deleted when the input is dropped, so it goes away
/// whether or not the pipeline ever runs.
#[derive(Debug)]
pub struct VideoInput {
    staged: StagedInput,
}

impl VideoInput {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { staged: StagedInput::new(path.into()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.staged.path()
    }
}

/// Owns a staged input file and deletes it when dropped.
#[derive(Debug)]
pub struct StagedInput {
    path: PathBuf,
}

impl StagedInput {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedInput {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed staged input"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove staged input"),
        }
    }
}

/// Annotates a video frame by frame into `<results>/detected_<name>`.
pub struct VideoPipeline {
    codec: Arc<dyn VideoCodec>,
    results_dir: PathBuf,
    fourcc: FourCc,
    default_min_score: f32,
    min_score: f32,
}

impl VideoPipeline {
    #[must_use]
    pub fn new(
        codec: Arc<dyn VideoCodec>,
        results_dir: impl Into<PathBuf>,
        fourcc: FourCc,
        default_min_score: f32,
    ) -> Self {
        Self {
            codec,
            results_dir: results_dir.into(),
            fourcc,
            default_min_score,
            min_score: default_min_score,
        }
    }

    /// Artifact path for a source named `name`.
    #[must_use]
    pub fn output_path(&self, name: &std::ffi::OsStr) -> PathBuf {
        self.results_dir.join(prefixed(OUTPUT_PREFIX, name))
    }

    /// A fresh partial file for one run over `name`. It keeps the source
    /// extension so the encoder picks the same container, and is deleted
    /// on drop unless persisted.
    fn partial_file(&self, name: &std::ffi::OsStr) -> Result<TempPath> {
        let extension = Path::new(name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let partial = tempfile::Builder::new()
            .prefix(&prefixed(PARTIAL_PREFIX, &prefixed(OUTPUT_PREFIX, name)))
            .suffix(&extension)
            .tempfile_in(&self.results_dir)?;
        Ok(partial.into_temp_path())
    }

    /// Decode, track and re-encode `source` into `partial`. Returns the
    /// number of frames and the number with detections.
    fn annotate(&self, model: &dyn DetectionModel, source: &Path, partial: &Path) -> Result<(u64, u64)> {
        let mut reader = self.codec.open_reader(source)?;
        let info = reader.info();
        let mut writer = self.codec.open_writer(partial, VideoWriterSpec::matching(info, self.fourcc))?;
        debug!(
            source = %source.display(),
            width = info.width,
            height = info.height,
            fps = info.frame_rate,
            codec = %self.fourcc,
            "Processing video"
        );

        model.reset_tracking();
        let mut frames = 0u64;
        let mut detected = 0u64;
        while let Some(frame) = reader.next_frame()? {
            let detections = model.track(&frame, self.min_score).map_err(ServingError::Inference)?;
            if detections.is_empty() {
                writer.write_frame(&frame)?;
            } else {
                detected += 1;
                writer.write_frame(&model.render(&frame, &detections))?;
            }
            frames += 1;
        }

        drop(reader);
        writer.finish()?;
        Ok((frames, detected))
    }
}

impl Pipeline for VideoPipeline {
    type Input = VideoInput;

    fn configure(&mut self, options: &PipelineOptions) {
        self.min_score = options.min_score.unwrap_or(self.default_min_score);
    }

    fn min_score(&self) -> f32 {
        self.min_score
    }

    fn predict(&self, model: &dyn DetectionModel, input: VideoInput) -> Result<DetectionResult> {
        let staged = input.staged;
        let Some(name) = staged.path().file_name().map(std::ffi::OsStr::to_os_string) else {
            return Err(ServingError::InvalidInput(format!(
                "video path has no file name: {}",
                staged.path().display()
            )));
        };

        let output = self.output_path(&name);
        if output.is_file() {
            debug!(path = %output.display(), "Reusing existing detection result");
            return Ok(DetectionResult::at(&output));
        }

        std::fs::create_dir_all(&self.results_dir)?;
        let partial = self.partial_file(&name)?;
        match self.annotate(model, staged.path(), &partial) {
            Ok((frames, detected)) if detected > 0 => {
                // Concurrent runs over the same name each rename a complete file; the last one wins.
                partial.persist(&output).map_err(|e| ServingError::Io(e.error))?;
                info!(path = %output.display(), frames, detected, "Stored video detection result");
                Ok(DetectionResult::at(&output))
            }
            Ok((frames, _)) => {
                info!(source = %staged.path().display(), frames, "No detections in video; output discarded");
                Ok(DetectionResult::empty())
            }
            Err(e) => {
                warn!(source = %staged.path().display(), error = %e, "Video detection failed");
                Err(e)
            }
        }
    }
}

fn prefixed(prefix: &str, name: &std::ffi::OsStr) -> OsString {
    let mut prefixed = OsString::from(prefix);
    prefixed.push(name);
    prefixed
}
