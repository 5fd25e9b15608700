//! Engine error types.
//!
//! Application code (the CLI) wraps these in `anyhow` with context; the
//! engine itself always returns a typed [`EngineError`].

use std::io;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error type for normalization, filtering, aggregation and caching.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A single raw record could not be coerced into the canonical schema.
    /// Recovered locally by the normalizer: the record is dropped and counted.
    #[error("record {index} is malformed: {reason}")]
    MalformedRecord { index: usize, reason: String },

    /// A reduction was requested over zero values.
    #[error("cannot reduce column '{column}' over an empty group '{group}'")]
    EmptyGroup { group: String, column: String },

    /// A request referenced a column that is not part of the dataset schema.
    #[error("unknown column '{column}'")]
    UnknownColumn { column: String },

    /// A column exists but has the wrong kind for the requested operation.
    #[error("column '{column}' is not {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A cached computation failed. Failures are never stored in the cache.
    #[error("computation for fingerprint {fingerprint} failed: {source}")]
    CacheComputation {
        fingerprint: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("ingest error: {0}")]
    Ingest(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Returns the innermost error, looking through cache wrappers.
    pub fn root_cause(&self) -> &EngineError {
        match self {
            EngineError::CacheComputation { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn unknown_column(column: impl Into<String>) -> Self {
        EngineError::UnknownColumn {
            column: column.into(),
        }
    }
}
