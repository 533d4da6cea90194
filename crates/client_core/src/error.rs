use std::sync::Arc;

use shared::error::RemoteError;
use thiserror::Error;

/// Failure of a request sent through the correlator.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("timed out waiting for response to '{method}'")]
    Timeout { method: String },
    #[error("transport lost: {0}")]
    TransportLost(String),
    #[error("controller rejected request: {0}")]
    Protocol(#[from] RemoteError),
}

/// Invalid matcher or coordinator setup, raised at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("a change matcher needs exactly one of: variable, prefix, suffix, regex (got {0})")]
    MatcherCriteria(usize),
    #[error("invalid variable pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("retry attempts must be at least 1")]
    ZeroAttempts,
    #[error("control type '{0}' is already registered")]
    DuplicateControlType(String),
    #[error("invalid controller url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Outcome delivered to a caller of a debounced or retried operation.
#[derive(Debug, Clone, Error)]
pub enum CoordinatorError {
    #[error("superseded by a newer call for the same key")]
    Cancelled,
    #[error("{0:#}")]
    Failed(Arc<anyhow::Error>),
    #[error("coordinator worker stopped before producing a result")]
    WorkerLost,
}

impl CoordinatorError {
    pub fn failed(err: anyhow::Error) -> Self {
        Self::Failed(Arc::new(err))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
