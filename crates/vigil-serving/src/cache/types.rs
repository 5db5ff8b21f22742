//! Core data types for model caching.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::Instant;
use vigil_abstraction::DetectionModel;

use crate::request::MediaMode;

/// Backend family used to load a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// Scripted detector for testing and dry runs.
    Mock,
    /// Artifact-backed colour-range detector.
    ColorRule,
}

impl ModelKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::ColorRule => "color-rule",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "color-rule" | "color_rule" | "color" => Ok(Self::ColorRule),
            other => Err(format!("unknown model kind '{other}'")),
        }
    }
}

/// Options that change what gets loaded. Per-call settings such as the
/// confidence threshold are not part of the key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LoadOptions {
    /// Restrict the load to one media mode; `None` loads every head.
    pub mode: Option<MediaMode>,
}

/// Cache key for identifying loaded models.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    /// The model name (directory name for artifact-backed models).
    pub name: String,
    /// The backend family.
    pub kind: ModelKind,
    /// Load-affecting options.
    pub options: LoadOptions,
}

impl ModelKey {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ModelKind, options: LoadOptions) -> Self {
        Self { name: name.into(), kind, options }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)?;
        if let Some(mode) = self.options.mode {
            write!(f, "[{mode}]")?;
        }
        Ok(())
    }
}

/// A cached model entry with metadata.
#[derive(Clone)]
pub struct CacheEntry {
    /// The loaded model instance.
    pub model: Arc<dyn DetectionModel>,
    /// Timestamp of last access.
    pub last_accessed: Instant,
    /// Number of times this model has been handed out.
    pub access_count: u64,
    /// Timestamp when the model was loaded.
    pub created_at: Instant,
}

impl CacheEntry {
    /// Create a new entry for a freshly loaded model.
    pub fn new(model: Arc<dyn DetectionModel>) -> Self {
        let now = Instant::now();
        Self {
            model,
            last_accessed: now,
            access_count: 1,
            created_at: now,
        }
    }

    /// Update the last accessed timestamp and increment access count.
    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }

    /// True while a caller still holds a handle to the model.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        Arc::strong_count(&self.model) > 1
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("model_id", &self.model.model_id())
            .field("last_accessed", &self.last_accessed)
            .field("access_count", &self.access_count)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from a loaded entry.
    pub total_hits: u64,
    /// Lookups that had to start or join a load.
    pub total_misses: u64,
    /// Load attempts made against the loader, retries included.
    pub total_load_attempts: u64,
    /// Loads that failed after the retry.
    pub total_load_failures: u64,
    /// Entries removed by sweep, invalidation or clear.
    pub total_evictions: u64,
    /// Current number of loaded models.
    pub cache_size: usize,
}
