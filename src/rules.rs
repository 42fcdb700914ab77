//! Versioned, per-domain capability rules.
//!
//! A [`CapabilityRule`] asserts that a capability term satisfies one or more
//! requirement terms with a given confidence. Rules are grouped into one
//! [`RuleSet`] per domain, owned by the [`RuleStore`], which only changes them
//! through validated operations.

use std::{fmt, path::PathBuf};

use serde::Serialize;

use crate::domain::Domain;

mod document;
pub use document::{ExportProvenance, RuleRecord, RuleSetDocument};

mod rule;
pub use rule::{CapabilityRule, Direction, Provenance, Reading};

mod rule_set;
pub use rule_set::RuleSet;

mod store;
pub use store::{ExportOptions, ImportMode, ImportSummary, RuleSetDiff, RuleStore};

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// The rule the failure concerns, if it concerns one rule.
    pub rule_id: Option<String>,
    /// The offending field, for example `confidence` or `satisfies[2]`.
    pub field: String,
    /// What is wrong with the field.
    pub message: String,
}

impl FieldError {
    /// A failure concerning one rule.
    #[must_use]
    pub fn rule(rule_id: impl Into<String>, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule_id: Some(rule_id.into()),
            field: field.into(),
            message: message.into(),
        }
    }

    /// A failure concerning the rule set as a whole.
    #[must_use]
    pub fn set(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule_id: None,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule_id {
            Some(id) => write!(f, "rule '{id}': {}: {}", self.field, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

/// A non-empty list of field-level validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub(crate) fn from_vec(errors: Vec<FieldError>) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self(errors))
        }
    }

    /// The individual failures.
    #[must_use]
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// Whether any failure names the given rule and field.
    #[must_use]
    pub fn mentions(&self, rule_id: &str, field: &str) -> bool {
        self.0
            .iter()
            .any(|error| error.rule_id.as_deref() == Some(rule_id) && error.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Errors returned by the [`RuleStore`].
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// The input could not be parsed.
    #[error("malformed rule input: {0}")]
    MalformedInput(String),

    /// A rule or rule set violates an invariant. Nothing was changed.
    #[error("rule validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    /// A rule-set file could not be loaded.
    #[error("{}: {source}", path.display())]
    InFile {
        /// The offending file.
        path: PathBuf,
        /// Why it could not be loaded.
        source: Box<RuleError>,
    },

    /// The requested rule does not exist.
    #[error("rule '{id}' not found in domain '{domain}'")]
    NotFound {
        /// The domain that was searched.
        domain: Domain,
        /// The missing rule's identifier.
        id: String,
    },

    /// The domain has no rule set.
    #[error("no rules are stored for domain '{0}'")]
    UnknownDomain(Domain),

    /// The operation conflicts with the stored state or with a concurrent
    /// mutation. Retryable.
    #[error("conflict in domain '{domain}': {reason}")]
    Conflict {
        /// The domain concerned.
        domain: Domain,
        /// What conflicted.
        reason: String,
    },
}

impl RuleError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// The field-level failures, if this is a validation failure.
    #[must_use]
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::ValidationFailed(errors) => Some(errors),
            Self::InFile { source, .. } => source.validation_errors(),
            _ => None,
        }
    }
}

impl From<ValidationErrors> for RuleError {
    fn from(errors: ValidationErrors) -> Self {
        Self::ValidationFailed(errors)
    }
}
