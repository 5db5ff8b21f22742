//! Artifact-backed detector that flags regions within an RGB range.
//!
//! A model directory holds `model.json`, the source artifact. The first
//! successful load writes a validated copy to `.cache/compiled.json`, which
//! later loads prefer. A damaged compiled copy is reported as a corrupt
//! artifact so the cache clears it and retries from the source.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vigil_abstraction::{BoundingBox, Detection, DetectionModel, DetectionSet, Frame, ModelError};

use crate::render::draw_detections;

const MODEL_FILE: &str = "model.json";
const CACHE_DIR: &str = ".cache";
const COMPILED_FILE: &str = "compiled.json";

/// One colour rule from `model.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColorRule {
    pub label: String,
    /// Inclusive lower RGB bound.
    pub min: [u8; 3],
    /// Inclusive upper RGB bound.
    pub max: [u8; 3],
    /// Matching pixels required before the rule reports a detection.
    #[serde(default = "default_min_pixels")]
    pub min_pixels: u32,
}

fn default_min_pixels() -> u32 {
    16
}

impl ColorRule {
    fn matches(&self, pixel: [u8; 3]) -> bool {
        (0..3).all(|c| self.min[c] <= pixel[c] && pixel[c] <= self.max[c])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSet {
    rules: Vec<ColorRule>,
}

impl RuleSet {
    fn validate(&self) -> Result<(), String> {
        if self.rules.is_empty() {
            return Err("no rules defined".to_string());
        }
        for rule in &self.rules {
            if (0..3).any(|c| rule.min[c] > rule.max[c]) {
                return Err(format!("rule '{}' has min above max", rule.label));
            }
            if rule.min_pixels == 0 {
                return Err(format!("rule '{}' has min_pixels of 0", rule.label));
            }
        }
        Ok(())
    }
}

/// Detector driven by colour rules loaded from disk.
#[derive(Debug)]
pub struct ColorRuleDetector {
    id: String,
    rules: Vec<ColorRule>,
}

impl ColorRuleDetector {
    /// Load the model stored in `dir`.
    ///
    /// # Errors
    /// Returns `ModelError::MissingArtifact` if `model.json` is absent and
    /// `ModelError::CorruptArtifact` if it or its compiled copy is invalid.
    pub fn load(id: &str, dir: &Path) -> Result<Self, ModelError> {
        let compiled = Self::cache_dir(dir).join(COMPILED_FILE);
        if compiled.is_file() {
            let rules = read_rules(&compiled)?;
            debug!(model_id = %id, path = %compiled.display(), "Loaded compiled rules");
            return Ok(Self { id: id.to_string(), rules: rules.rules });
        }

        let source = dir.join(MODEL_FILE);
        if !source.is_file() {
            return Err(ModelError::MissingArtifact(source.display().to_string()));
        }
        let rules = read_rules(&source)?;
        if let Err(e) = write_compiled(&compiled, &rules) {
            warn!(model_id = %id, error = %e, "Could not write compiled rules");
        }
        debug!(model_id = %id, rules = rules.rules.len(), "Loaded model rules");
        Ok(Self { id: id.to_string(), rules: rules.rules })
    }

    /// Build a detector from in-memory rules.
    #[must_use]
    pub fn from_rules(id: impl Into<String>, rules: Vec<ColorRule>) -> Self {
        Self { id: id.into(), rules }
    }

    /// Directory of derived artifacts for the model stored in `dir`.
    #[must_use]
    pub fn cache_dir(dir: &Path) -> PathBuf {
        dir.join(CACHE_DIR)
    }

    fn detect(&self, frame: &Frame, confidence: f32, tracking: bool) -> DetectionSet {
        let mut detections = Vec::new();
        for (index, rule) in self.rules.iter().enumerate() {
            let mut count = 0u32;
            let mut bbox: Option<BoundingBox> = None;
            for (x, y, pixel) in frame.enumerate_pixels() {
                if !rule.matches(pixel.0) {
                    continue;
                }
                count += 1;
                bbox = Some(bbox.map_or(
                    BoundingBox { x1: x, y1: y, x2: x + 1, y2: y + 1 },
                    |b| BoundingBox {
                        x1: b.x1.min(x),
                        y1: b.y1.min(y),
                        x2: b.x2.max(x + 1),
                        y2: b.y2.max(y + 1),
                    },
                ));
            }

            let Some(bbox) = bbox else { continue };
            if count < rule.min_pixels {
                continue;
            }
            // Density of matching pixels inside their bounding box.
            let score = (f64::from(count) / bbox.area() as f64).min(1.0) as f32;
            detections.push(Detection {
                label: rule.label.clone(),
                score,
                bbox,
                track_id: tracking.then(|| u32::try_from(index + 1).unwrap_or(u32::MAX)),
            });
        }
        DetectionSet::new(detections).above(confidence)
    }
}

impl DetectionModel for ColorRuleDetector {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn predict(&self, frame: &Frame, confidence: f32) -> Result<DetectionSet, ModelError> {
        Ok(self.detect(frame, confidence, false))
    }

    fn track(&self, frame: &Frame, confidence: f32) -> Result<DetectionSet, ModelError> {
        Ok(self.detect(frame, confidence, true))
    }

    fn render(&self, frame: &Frame, detections: &DetectionSet) -> Frame {
        draw_detections(frame, detections)
    }
}

fn read_rules(path: &Path) -> Result<RuleSet, ModelError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ModelError::MissingArtifact(path.display().to_string()),
        _ => ModelError::CorruptArtifact(format!("{}: {e}", path.display())),
    })?;
    let rules: RuleSet = serde_json::from_str(&content)
        .map_err(|e| ModelError::CorruptArtifact(format!("{}: {e}", path.display())))?;
    rules
        .validate()
        .map_err(|e| ModelError::CorruptArtifact(format!("{}: {e}", path.display())))?;
    Ok(rules)
}

fn write_compiled(path: &Path, rules: &RuleSet) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string(rules).map_err(std::io::Error::other)?;
    std::fs::write(path, content)
}
