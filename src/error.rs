//! Error types for MediGuard Drift
//!
//! Only [`InputValidationError`] is fatal to a pipeline run. Everything a stage
//! can degrade on is carried as a [`crate::types::PipelineMarker`] inside the
//! result instead.

use thiserror::Error;

/// Malformed snapshot or configuration, rejected before any stage runs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputValidationError {
    #[error("Invalid JSON: {0}")]
    Json(String),

    #[error("Invalid schema version: expected {expected}, got {actual}")]
    SchemaVersion { expected: String, actual: String },

    #[error("Missing user id")]
    MissingUserId,

    #[error("Sample {index} belongs to user {actual}, expected {expected}")]
    ForeignSample {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("Samples are not in ascending timestamp order at index {index}")]
    UnorderedSamples { index: usize },

    #[error("Sample {index} at {timestamp} is later than the snapshot instant {as_of}")]
    SampleAfterAsOf {
        index: usize,
        timestamp: String,
        as_of: String,
    },

    #[error("Sample {index} has an empty metric name")]
    EmptyMetricName { index: usize },

    #[error("Metric {metric} in sample {index} is {value}, outside [0, 1]")]
    MetricOutOfRange {
        index: usize,
        metric: String,
        value: f64,
    },

    #[error("Sleep hours must be within [0, 24], got {0}")]
    SleepHoursOutOfRange(f64),

    #[error("Stored baseline for {metric} is invalid: {reason}")]
    InvalidStoredBaseline { metric: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for InputValidationError {
    fn from(e: serde_json::Error) -> Self {
        InputValidationError::Json(e.to_string())
    }
}

/// Failure reported by a snapshot source at the fetch boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Fetch timed out after {elapsed_ms} ms (limit {limit_ms} ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("No data for user {0}")]
    NotFound(String),

    #[error("Malformed payload from source: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout { .. } | FetchError::Unavailable(_))
    }
}

/// Failure of an explanation collaborator. Never affects the decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExplainError {
    #[error("Explainer unavailable: {0}")]
    Unavailable(String),

    #[error("Explainer returned unusable output: {0}")]
    InvalidOutput(String),
}
