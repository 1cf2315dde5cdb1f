//! Crate-level error taxonomy.
//!
//! Module errors stay close to their owners; this type unifies them at the
//! listener boundary and classifies recovery behavior: transient errors get
//! bounded retries with fixed backoff, validation and policy errors never
//! retry.

use thiserror::Error;

use crate::health::HealthError;
use crate::parser::ParserError;
use crate::router::RouterError;
use crate::version::VersionError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Health(#[from] HealthError),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Whether a bounded retry may help. Parser, policy and version errors
    /// are deterministic and never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Router(RouterError::Transport(_)) | Self::Router(RouterError::Timeout) => true,
            Self::Health(HealthError::Transport(_)) => true,
            Self::Parser(_) | Self::Version(_) | Self::Config(_) => false,
            _ => false,
        }
    }

    /// Whether the failure was a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Router(RouterError::Cancelled) | Self::Health(HealthError::Cancelled)
        )
    }
}
