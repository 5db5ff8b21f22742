//! Request and response types for detection calls.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServingError};

/// The kind of media a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaMode {
    Image,
    Video,
}

impl MediaMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options sent alongside a request input.
///
/// Unknown keys are rejected rather than ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RequestOptions {
    pub mode: MediaMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
}

impl RequestOptions {
    /// Parse options from their JSON form.
    ///
    /// # Errors
    /// Returns `ServingError::InvalidInput` for malformed JSON, unknown keys
    /// or out-of-range values.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| ServingError::InvalidInput(format!("invalid options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// Returns `ServingError::InvalidInput` if the threshold is outside
    /// `[0, 1]` or the asset id is not a plain file name.
    pub fn validate(&self) -> Result<()> {
        if let Some(score) = self.min_score {
            validate_min_score(score)?;
        }
        if let Some(asset_id) = &self.asset_id {
            validate_asset_id(asset_id)?;
        }
        Ok(())
    }
}

/// Raw input accompanying a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestInput {
    /// Encoded image bytes.
    Bytes(Vec<u8>),
    /// A file already staged on disk by the caller.
    StagedFile(PathBuf),
}

/// A validated detection request.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionRequest {
    Image {
        bytes: Vec<u8>,
        asset_id: Option<String>,
        min_score: Option<f32>,
    },
    Video {
        path: PathBuf,
        min_score: Option<f32>,
    },
}

impl DetectionRequest {
    /// Combine parsed options with the request input.
    ///
    /// # Errors
    /// Returns `ServingError::InvalidInput` if the options are invalid, or the
    /// input does not match the requested mode.
    pub fn from_parts(options: RequestOptions, input: Option<RequestInput>) -> Result<Self> {
        options.validate()?;
        match (options.mode, input) {
            (MediaMode::Image, Some(RequestInput::Bytes(bytes))) => {
                if bytes.is_empty() {
                    return Err(ServingError::InvalidInput("image input is empty".to_string()));
                }
                Ok(Self::Image { bytes, asset_id: options.asset_id, min_score: options.min_score })
            }
            (MediaMode::Video, Some(RequestInput::StagedFile(path))) => {
                if path.file_name().is_none() {
                    return Err(ServingError::InvalidInput(format!(
                        "video path has no file name: {}",
                        path.display()
                    )));
                }
                Ok(Self::Video { path, min_score: options.min_score })
            }
            (mode, Some(_)) => Err(ServingError::InvalidInput(format!(
                "input does not match mode '{mode}'"
            ))),
            (mode, None) => Err(ServingError::InvalidInput(format!("no input provided for mode '{mode}'"))),
        }
    }

    /// Image request helper.
    #[must_use]
    pub fn image(bytes: Vec<u8>, asset_id: Option<&str>) -> Self {
        Self::Image { bytes, asset_id: asset_id.map(str::to_string), min_score: None }
    }

    /// Video request helper.
    #[must_use]
    pub fn video(path: impl Into<PathBuf>) -> Self {
        Self::Video { path: path.into(), min_score: None }
    }

    #[must_use]
    pub fn with_min_score(mut self, score: f32) -> Self {
        match &mut self {
            Self::Image { min_score, .. } | Self::Video { min_score, .. } => *min_score = Some(score),
        }
        self
    }

    #[must_use]
    pub const fn mode(&self) -> MediaMode {
        match self {
            Self::Image { .. } => MediaMode::Image,
            Self::Video { .. } => MediaMode::Video,
        }
    }

    #[must_use]
    pub const fn min_score(&self) -> Option<f32> {
        match self {
            Self::Image { min_score, .. } | Self::Video { min_score, .. } => *min_score,
        }
    }

    /// Re-run the checks `from_parts` applies, for requests built directly.
    ///
    /// # Errors
    /// Returns `ServingError::InvalidInput` on the first failed check.
    pub fn validate(&self) -> Result<()> {
        if let Some(score) = self.min_score() {
            validate_min_score(score)?;
        }
        if let Self::Image { asset_id: Some(asset_id), .. } = self {
            validate_asset_id(asset_id)?;
        }
        Ok(())
    }
}

/// Outcome of a detection request. An empty path means no artifact was
/// produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(rename = "filePath")]
    pub file_path: String,
}

impl DetectionResult {
    /// A result with no artifact.
    #[must_use]
    pub const fn empty() -> Self {
        Self { file_path: String::new() }
    }

    /// A result pointing at `path`.
    #[must_use]
    pub fn at(path: &Path) -> Self {
        Self { file_path: path.display().to_string() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_path.is_empty()
    }
}

fn validate_min_score(score: f32) -> Result<()> {
    if (0.0..=1.0).contains(&score) {
        Ok(())
    } else {
        Err(ServingError::InvalidInput(format!("minScore must be within [0, 1], got {score}")))
    }
}

/// Asset ids become file names in the results directory, so only plain
/// names are accepted.
///
/// # Errors
/// Returns `ServingError::InvalidInput` for empty names, `.`/`..`, or names
/// containing path separators or NUL.
pub fn validate_asset_id(asset_id: &str) -> Result<()> {
    let unsafe_char = asset_id.chars().any(|c| matches!(c, '/' | '\\' | '\0'));
    if asset_id.is_empty() || asset_id == "." || asset_id == ".." || unsafe_char {
        return Err(ServingError::InvalidInput(format!("invalid asset id '{asset_id}'")));
    }
    Ok(())
}
