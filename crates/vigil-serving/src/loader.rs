//! Model loading: the seam between the cache and concrete backends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use vigil_abstraction::{DetectionModel, ModelError};

use crate::cache::{ModelKey, ModelKind};
use crate::detectors::{ColorRuleDetector, MockDetector};

/// Loads models for the cache. Calls are blocking and run on the worker pool.
pub trait ModelLoader: Send + Sync {
    /// Load the model identified by `key`.
    ///
    /// # Errors
    /// Returns `ModelError::MissingArtifact` or `ModelError::CorruptArtifact`
    /// for bad on-disk state, other variants for anything else.
    fn load(&self, key: &ModelKey) -> Result<Arc<dyn DetectionModel>, ModelError>;

    /// Drop any locally cached derived artifacts for `key` so the next load
    /// starts from a clean state.
    ///
    /// # Errors
    /// Returns `ModelError` if the cache could not be removed.
    fn clear_cache(&self, key: &ModelKey) -> Result<(), ModelError>;
}

/// Factory for the built-in model backends.
#[derive(Debug, Clone)]
pub struct ModelFactory {
    model_dir: PathBuf,
}

impl ModelFactory {
    /// Creates a factory that resolves artifact-backed models under `model_dir`.
    #[must_use]
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self { model_dir: model_dir.into() }
    }

    #[must_use]
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Directory holding the artifacts for `key`.
    #[must_use]
    pub fn artifact_dir(&self, key: &ModelKey) -> PathBuf {
        self.model_dir.join(&key.name)
    }
}

impl ModelLoader for ModelFactory {
    fn load(&self, key: &ModelKey) -> Result<Arc<dyn DetectionModel>, ModelError> {
        debug!(model = %key, "Creating model instance");

        match key.kind {
            ModelKind::Mock => Ok(Arc::new(MockDetector::never(key.name.clone()))),
            ModelKind::ColorRule => {
                let model = ColorRuleDetector::load(&key.name, &self.artifact_dir(key))?;
                Ok(Arc::new(model))
            }
        }
    }

    fn clear_cache(&self, key: &ModelKey) -> Result<(), ModelError> {
        if key.kind == ModelKind::Mock {
            return Ok(());
        }

        let cache_dir = ColorRuleDetector::cache_dir(&self.artifact_dir(key));
        match std::fs::remove_dir_all(&cache_dir) {
            Ok(()) => {
                info!(model = %key, path = %cache_dir.display(), "Cleared model cache");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ModelError::Other(format!(
                "failed to clear cache {}: {e}",
                cache_dir.display()
            ))),
        }
    }
}
