//! Error taxonomy shared across the crate.
//!
//! Only malformed input, caller-initiated validation failures and conflicts
//! are surfaced as errors. Unmatched requirements and reasoning-oracle
//! failures degrade the quality of results instead; see
//! [`UnresolvedRequirement`](crate::supply_tree::UnresolvedRequirement) and
//! [`OracleError`](crate::matching::OracleError).

use crate::rules::RuleError;

/// A malformed payload, reported with the field it concerns.
///
/// Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {message}")]
pub struct InputError {
    field: String,
    message: String,
}

impl InputError {
    /// Creates an error for `field`.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// The offending field.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// What is wrong with it.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors surfaced by the planning pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request payload is malformed.
    #[error(transparent)]
    Input(#[from] InputError),

    /// A rule store operation failed.
    #[error(transparent)]
    Rules(#[from] RuleError),

    /// The scoring worker pool could not be started.
    #[error("failed to start scoring worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// A scoring pass was cancelled before it finished.
    #[error("scoring pass was interrupted: {0}")]
    Interrupted(String),
}

impl Error {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Rules(error) if error.is_retryable())
    }
}
