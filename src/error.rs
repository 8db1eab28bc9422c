//! Error types for the ensemble serving core

use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced to callers of the serving core.
#[derive(Error, Debug)]
pub enum EnsembleError {
    /// No generation has been published yet
    #[error("no models loaded")]
    NoModelsLoaded,

    /// Every model in the active generation failed for this call
    #[error("no valid predictions ({attempted} models attempted)")]
    NoValidPredictions { attempted: usize },

    /// Aggregating finite model outputs produced a value outside f64 range
    #[error("{stage} is not representable as a finite number ({models} outputs)")]
    NonFiniteEstimate { stage: &'static str, models: usize },

    /// Feature vector length does not match what the generation expects
    #[error("feature vector has {actual} values, expected {expected}")]
    FeatureShape { expected: usize, actual: usize },

    /// Artifact could not be read from disk
    #[error("failed to read artifact {path}: {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Artifact could not be decoded
    #[error("failed to decode artifact {path}: {source}")]
    ArtifactFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A scoring component failed validation
    #[error("invalid model {model}: {reason}")]
    InvalidModel { model: String, reason: String },

    /// Weight mapping rejected
    #[error("invalid weights: {0}")]
    InvalidWeights(String),

    /// Artifact decoded but yielded zero usable models
    #[error("artifact {path} contains no loadable models")]
    EmptyArtifact { path: PathBuf },

    /// Nothing loadable in the artifact directory
    #[error("no model artifacts found in {dir}")]
    NoArtifact { dir: PathBuf },

    /// Artifact directory exists but could not be listed
    #[error("failed to scan artifact directory {dir}: {source}")]
    Scan {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for serving-core operations
pub type Result<T> = std::result::Result<T, EnsembleError>;
