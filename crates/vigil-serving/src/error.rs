//! Error type for detection requests.

use thiserror::Error;
use vigil_abstraction::{MediaError, ModelError};

use crate::dispatcher::DispatchError;

/// Errors surfaced to callers of the detection service.
#[derive(Debug, Error)]
pub enum ServingError {
    /// The request was rejected before any work was done.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The model could not be loaded, even after clearing its cache.
    #[error("Failed to load model {model}: {source}")]
    Load {
        model: String,
        #[source]
        source: ModelError,
    },

    /// The model failed while running on a frame.
    #[error("Inference failed: {0}")]
    Inference(#[source] ModelError),

    /// Decoding or encoding media failed.
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ServingError {
    /// True for failures caused by the request itself.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::Media(MediaError::Decode(_)))
    }

    /// HTTP-style status class for this error.
    #[must_use]
    pub const fn status(&self) -> u16 {
        if self.is_client_error() { 400 } else { 500 }
    }
}

pub type Result<T> = std::result::Result<T, ServingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_classes() {
        assert_eq!(ServingError::InvalidInput("x".into()).status(), 400);
        assert_eq!(ServingError::Media(MediaError::Decode("bad".into())).status(), 400);
        assert_eq!(ServingError::Media(MediaError::Encode("bad".into())).status(), 500);
        assert_eq!(
            ServingError::Load { model: "m".into(), source: ModelError::CorruptArtifact("x".into()) }.status(),
            500
        );
        assert_eq!(ServingError::Dispatch(DispatchError::Timeout(Duration::from_secs(1))).status(), 500);
        assert_eq!(ServingError::Inference(ModelError::Inference("nan".into())).status(), 500);
    }

    #[test]
    fn test_load_error_message_names_model() {
        let err = ServingError::Load {
            model: "color-rule:weapons".into(),
            source: ModelError::MissingArtifact("model.json".into()),
        };
        assert!(err.to_string().contains("color-rule:weapons"));
    }
}
