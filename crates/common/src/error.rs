//! Error types for the common crate
//!
//! This module defines the common error taxonomy used throughout the QC
//! Vision system.

use thiserror::Error;

use crate::types::{ModelType, Version};

/// Result type for QC Vision operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for QC Vision operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown model type key at the API boundary
    #[error("Unknown model type: {0}")]
    UnknownModelType(String),

    /// A version string that does not match the `v<N>` pattern
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// The corpus does not hold enough normal samples to train
    #[error("Need at least {required} OK images (found {found})")]
    InsufficientSamples {
        /// Configured minimum number of normal samples
        required: usize,
        /// Number of normal samples currently in the corpus
        found: usize,
    },

    /// Another training run holds the global training guard
    #[error("Training already in progress")]
    TrainingInProgress,

    /// The fit step failed; the staging workspace has been cleaned up
    #[error("Training failed: {0}")]
    TrainingFailed(String),

    /// Rollback target does not exist or has no checkpoint
    #[error("Version {version} not found for model {model_type}")]
    VersionNotFound {
        /// Model type namespace that was searched
        model_type: ModelType,
        /// Requested version
        version: Version,
    },

    /// No inference backend is loaded for the active model type
    #[error("Model not loaded. Please train first.")]
    ModelNotLoaded,

    /// The backend is loaded but the request could not be scored
    #[error("Inference error: {0}")]
    Inference(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if the error is a training-guard contention failure
    pub fn is_training_in_progress(&self) -> bool {
        matches!(self, Error::TrainingInProgress)
    }

    /// Returns true if the error is an unmet training precondition
    pub fn is_insufficient_samples(&self) -> bool {
        matches!(self, Error::InsufficientSamples { .. })
    }

    /// Returns true if the error is a missing rollback target
    pub fn is_version_not_found(&self) -> bool {
        matches!(self, Error::VersionNotFound { .. })
    }

    /// Returns true if no backend was available for predict
    pub fn is_model_not_loaded(&self) -> bool {
        matches!(self, Error::ModelNotLoaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::InsufficientSamples {
            required: 10,
            found: 3,
        };
        assert_eq!(err.to_string(), "Need at least 10 OK images (found 3)");
        assert!(err.is_insufficient_samples());

        let err = Error::VersionNotFound {
            model_type: ModelType::Patchcore,
            version: Version(4),
        };
        assert_eq!(err.to_string(), "Version v4 not found for model patchcore");
        assert!(err.is_version_not_found());

        assert!(Error::TrainingInProgress.is_training_in_progress());
        assert!(Error::ModelNotLoaded.is_model_not_loaded());
    }
}
