use thiserror::Error;

use crate::types::TripId;

/// Prediction engine error types
///
/// These are infrastructure failures only. Data-quality and coverage
/// outcomes travel inside `PredictionResult` instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Malformed dataset: {0}")]
    Dataset(String),

    #[error("Unknown trip: {0}")]
    UnknownTrip(TripId),

    #[error("Repository unavailable: {0}")]
    Repository(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Worker pool failure: {0}")]
    Worker(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
