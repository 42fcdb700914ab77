use std::fmt;

use serde::Serialize;

use crate::domain::{Capability, CapabilityId, FacilityId, Requirement, RequirementId};

/// The cascade layer that produced a [`MatchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLayer {
    /// Normalized term or ontology equality.
    Exact,
    /// A capability rule from the domain's rule set.
    Heuristic,
    /// Embedding similarity.
    Semantic,
    /// The external reasoning oracle.
    Reasoning,
}

impl fmt::Display for MatchLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exact => "exact",
            Self::Heuristic => "heuristic",
            Self::Semantic => "semantic",
            Self::Reasoning => "reasoning",
        })
    }
}

/// The outcome of matching one requirement against one capability.
///
/// Results are immutable. An unmatched result carries a confidence of zero
/// and names the deepest layer that was consulted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    requirement: RequirementId,
    capability: CapabilityId,
    facility: FacilityId,
    matched: bool,
    layer: MatchLayer,
    confidence: f64,
    explanation: String,
}

impl MatchResult {
    /// A successful match.
    #[must_use]
    pub fn hit(
        requirement: &Requirement,
        capability: &Capability,
        layer: MatchLayer,
        confidence: f64,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            requirement: requirement.id().clone(),
            capability: capability.id().clone(),
            facility: capability.facility().clone(),
            matched: true,
            layer,
            confidence: confidence.clamp(0.0, 1.0),
            explanation: explanation.into(),
        }
    }

    /// A failed match.
    #[must_use]
    pub fn miss(
        requirement: &Requirement,
        capability: &Capability,
        layer: MatchLayer,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            requirement: requirement.id().clone(),
            capability: capability.id().clone(),
            facility: capability.facility().clone(),
            matched: false,
            layer,
            confidence: 0.0,
            explanation: explanation.into(),
        }
    }

    /// The same pair, turned into a failure with the given reason.
    #[must_use]
    pub fn rejected(self, reason: impl Into<String>) -> Self {
        Self {
            matched: false,
            confidence: 0.0,
            explanation: reason.into(),
            ..self
        }
    }

    /// The requirement that was matched.
    #[must_use]
    pub const fn requirement(&self) -> &RequirementId {
        &self.requirement
    }

    /// The capability it was matched against.
    #[must_use]
    pub const fn capability(&self) -> &CapabilityId {
        &self.capability
    }

    /// The facility offering the capability.
    #[must_use]
    pub const fn facility(&self) -> &FacilityId {
        &self.facility
    }

    /// Whether the capability satisfies the requirement.
    #[must_use]
    pub const fn matched(&self) -> bool {
        self.matched
    }

    /// The layer that decided the result.
    #[must_use]
    pub const fn layer(&self) -> MatchLayer {
        self.layer
    }

    /// Confidence in `[0, 1]`.
    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Why the layer decided as it did.
    #[must_use]
    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    /// Whether this is a match at or above `threshold`.
    #[must_use]
    pub fn accepted(&self, threshold: f64) -> bool {
        self.matched && self.confidence >= threshold
    }

    /// Whether `self` should replace `other` as the better result for the
    /// same pair: a match beats a miss, then higher confidence wins, then
    /// the earlier layer.
    #[must_use]
    pub fn is_better_than(&self, other: &Self) -> bool {
        match (self.matched, other.matched) {
            (true, false) => true,
            (false, true) => false,
            (true, true) => match self.confidence.total_cmp(&other.confidence) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => self.layer < other.layer,
            },
            (false, false) => self.layer > other.layer,
        }
    }
}
