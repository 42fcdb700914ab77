use std::{collections::BTreeSet, fmt};

use non_empty_string::NonEmptyString;
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};

use super::{FieldError, RuleRecord, ValidationErrors};
use crate::domain::{Domain, Term};

/// Which way a rule may be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The capability term satisfies the listed requirement terms, and a
    /// capability listed among them satisfies a requirement named by the
    /// capability term.
    #[default]
    Bidirectional,
    /// The capability term satisfies the listed requirement terms.
    Forward,
    /// A requirement named by the capability term is satisfied by any of the
    /// listed terms offered as a capability.
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bidirectional => "bidirectional",
            Self::Forward => "forward",
            Self::Reverse => "reverse",
        })
    }
}

/// How a rule applied to a requirement/capability pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reading {
    /// The mirrored reading of a bidirectional rule.
    Mirrored,
    /// The reading the rule was declared with.
    Declared,
}

/// Where a rule came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// The origin of the rule: a standard, a person, a file.
    pub source: String,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A domain-scoped equivalence between a capability term and the
/// requirement terms it satisfies.
///
/// Instances can only be created through validation, so every rule in
/// memory has a non-empty identifier and capability term, at least one
/// satisfied term, and a confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityRule {
    id: NonEmptyString,
    capability: Term,
    satisfies: NonEmpty<Term>,
    confidence: f64,
    direction: Direction,
    domain: Domain,
    description: String,
    provenance: Provenance,
    tags: BTreeSet<String>,
}

impl CapabilityRule {
    /// Construct and validate a rule.
    ///
    /// # Errors
    ///
    /// Returns the field-level failures if any invariant is violated.
    pub fn new<I, S>(
        id: &str,
        capability: &str,
        satisfies: I,
        confidence: f64,
        direction: Direction,
        domain: &Domain,
    ) -> Result<Self, ValidationErrors>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let record = RuleRecord {
            id: id.to_string(),
            capability: capability.to_string(),
            satisfies: satisfies.into_iter().map(Into::into).collect(),
            confidence,
            direction,
            domain: Some(domain.to_string()),
            description: String::new(),
            provenance: None,
            tags: BTreeSet::new(),
        };
        Self::from_record(record, domain).map_err(ValidationErrors)
    }

    /// Validate a serialized rule against the domain of the set that will own
    /// it.
    ///
    /// All failures are collected rather than stopping at the first one.
    pub(crate) fn from_record(record: RuleRecord, domain: &Domain) -> Result<Self, Vec<FieldError>> {
        let mut errors = Vec::new();
        let label = if record.id.trim().is_empty() {
            "<unnamed>".to_string()
        } else {
            record.id.trim().to_string()
        };

        let id = NonEmptyString::new(record.id.trim().to_string()).map_err(|_| {
            errors.push(FieldError::rule(&label, "id", "must not be empty"));
        });

        let capability = Term::new(&record.capability);
        if capability.is_empty() {
            errors.push(FieldError::rule(&label, "capability", "must not be empty"));
        }

        let mut satisfied = BTreeSet::new();
        for (i, raw) in record.satisfies.iter().enumerate() {
            let term = Term::new(raw);
            if term.is_empty() {
                errors.push(FieldError::rule(
                    &label,
                    format!("satisfies[{i}]"),
                    "must not be empty",
                ));
            } else {
                satisfied.insert(term);
            }
        }
        let satisfies = NonEmpty::collect(satisfied);
        if record.satisfies.is_empty() {
            errors.push(FieldError::rule(
                &label,
                "satisfies",
                "must list at least one requirement term",
            ));
        }

        errors.extend(check_confidence(&label, record.confidence));

        if let Some(raw) = &record.domain {
            let declared = Domain::new(raw);
            if &declared != domain {
                errors.push(FieldError::rule(
                    &label,
                    "domain",
                    format!("'{declared}' does not match rule set domain '{domain}'"),
                ));
            }
        }

        match (id, satisfies) {
            (Ok(id), Some(satisfies)) if errors.is_empty() => Ok(Self {
                id,
                capability,
                satisfies,
                confidence: record.confidence,
                direction: record.direction,
                domain: domain.clone(),
                description: record.description,
                provenance: record.provenance.unwrap_or_default(),
                tags: record.tags,
            }),
            _ => Err(errors),
        }
    }

    /// Convert back to the serialized form.
    #[must_use]
    pub fn to_record(&self) -> RuleRecord {
        RuleRecord {
            id: self.id.to_string(),
            capability: self.capability.to_string(),
            satisfies: self.satisfies.iter().map(ToString::to_string).collect(),
            confidence: self.confidence,
            direction: self.direction,
            domain: Some(self.domain.to_string()),
            description: self.description.clone(),
            provenance: if self.provenance == Provenance::default() {
                None
            } else {
                Some(self.provenance.clone())
            },
            tags: self.tags.clone(),
        }
    }

    /// Re-check the invariants against an owning domain.
    ///
    /// Rules are validated on construction; this catches a rule that was
    /// moved into a set of another domain.
    pub(crate) fn check(&self, domain: &Domain) -> Vec<FieldError> {
        let mut errors = check_confidence(self.id(), self.confidence);
        if &self.domain != domain {
            errors.push(FieldError::rule(
                self.id(),
                "domain",
                format!("'{}' does not match rule set domain '{domain}'", self.domain),
            ));
        }
        errors
    }

    /// Replace the provenance.
    #[must_use]
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Replace the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The rule's identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// The capability term.
    #[must_use]
    pub const fn capability(&self) -> &Term {
        &self.capability
    }

    /// The requirement terms satisfied by the capability term, sorted.
    pub fn satisfies(&self) -> impl Iterator<Item = &Term> {
        self.satisfies.iter()
    }

    /// The stored confidence.
    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    /// The rule's direction.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// The domain the rule belongs to.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// A human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Where the rule came from.
    #[must_use]
    pub const fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Tags attached to the rule.
    #[must_use]
    pub const fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    fn lists(&self, term: &Term) -> bool {
        self.satisfies.iter().any(|satisfied| satisfied == term)
    }

    /// How, if at all, this rule lets `capability` satisfy `requirement`.
    #[must_use]
    pub fn reading(&self, capability: &Term, requirement: &Term) -> Option<Reading> {
        let forward = &self.capability == capability && self.lists(requirement);
        let reverse = &self.capability == requirement && self.lists(capability);

        match self.direction {
            Direction::Forward if forward => Some(Reading::Declared),
            Direction::Reverse if reverse => Some(Reading::Declared),
            Direction::Bidirectional if forward => Some(Reading::Declared),
            Direction::Bidirectional if reverse => Some(Reading::Mirrored),
            _ => None,
        }
    }
}

fn check_confidence(rule_id: &str, confidence: f64) -> Vec<FieldError> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Vec::new()
    } else {
        vec![FieldError::rule(
            rule_id,
            "confidence",
            format!("must lie in [0, 1], got {confidence}"),
        )]
    }
}
