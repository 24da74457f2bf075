//! Error types for serving, training, artifact handling and retraining

use std::path::PathBuf;
use thiserror::Error;

use crate::types::ProcessorId;

/// Errors raised on the serving path.
///
/// Cold BINs, cold pairs and per-candidate scoring failures are not errors;
/// they are absorbed into the ranking as zero defaults.
#[derive(Debug, Error)]
pub enum ServingError {
    /// The scorer was trained on a different feature layout than the one
    /// the feature builder produces. Never degrade silently on this.
    #[error("feature schema mismatch: scorer expects {expected:?}, builder produces {actual:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no model is loaded")]
    NoModelLoaded,
}

/// Failure to score a single feature record.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScoringError {
    #[error("feature {feature} is not finite ({value})")]
    NonFiniteFeature { feature: &'static str, value: f64 },

    #[error("scorer produced a non-finite probability")]
    NonFiniteOutput,

    #[error("scorer returned no value for this record")]
    MissingOutput,

    #[error("{0}")]
    Scorer(String),
}

/// Errors returned while fitting a scorer.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("training set is empty")]
    EmptyDataset,

    #[error("all {count} labels are {label}; a binary classifier needs both classes")]
    SingleClass { label: u8, count: usize },

    #[error("{features} feature rows but {labels} labels")]
    LabelCount { features: usize, labels: usize },

    #[error("row {row} has {actual} features, expected {expected}")]
    RaggedFeatures {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("invalid training parameters: {0}")]
    InvalidParams(String),
}

/// Errors reading or publishing model artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no model has been published: {0} does not exist")]
    NoLatest(PathBuf),

    #[error("unknown model version {0}")]
    UnknownVersion(String),

    #[error("refusing to overwrite existing artifact {0}")]
    AlreadyExists(PathBuf),

    #[error("checksum mismatch for {file}: pointer records {expected}, file hashes to {actual}")]
    Checksum {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("processor id {id} is mapped to both {first:?} and {second:?}")]
    DuplicateProcessorId {
        id: ProcessorId,
        first: String,
        second: String,
    },

    #[error("processor {0} in the trained universe has no display name")]
    UnnamedProcessor(ProcessorId),

    #[error(transparent)]
    Serving(#[from] ServingError),
}

/// Errors aborting a retraining run. None of them leave a partially
/// published artifact behind.
#[derive(Debug, Error)]
pub enum RetrainError {
    #[error("failed to load records from {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to load processor names: {0}")]
    ProcessorNames(#[source] ArtifactError),

    #[error("no training records left after filtering")]
    EmptyTrainingSet,

    #[error("processor {0} has no display name in the processor mapping")]
    UnnamedProcessor(ProcessorId),

    #[error("training failed: {0}")]
    Train(#[from] TrainingError),

    #[error("failed to publish model: {0}")]
    Persist(#[source] ArtifactError),

    #[error("failed to archive records to {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}
