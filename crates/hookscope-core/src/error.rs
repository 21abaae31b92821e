//! Error types for the event model.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookscopeError {
    #[error("unknown time range: {0} (expected one of 1m, 3m, 5m, 10m)")]
    InvalidTimeRange(String),

    #[error("invalid agent filter {0:?}: expected \"app:session\"")]
    InvalidAgentFilter(String),

    #[error("failed to parse event line: {0}")]
    Parse(#[from] serde_json::Error),
}
