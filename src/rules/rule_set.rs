use std::collections::{BTreeMap, BTreeSet, HashMap};

use borsh::BorshSerialize;
use chrono::{DateTime, Utc};
use semver::Version;

use super::{CapabilityRule, Direction, FieldError, Reading, ValidationErrors};
use crate::domain::{fingerprint::fingerprint, Domain, Term};

/// A versioned collection of capability rules for one domain.
///
/// Rules are keyed by identifier. An index from capability term to rule
/// identifiers makes heuristic lookups independent of the number of rules.
///
/// Equality ignores the `updated_at` timestamp.
#[derive(Debug, Clone)]
pub struct RuleSet {
    domain: Domain,
    version: Version,
    description: String,
    rules: BTreeMap<String, CapabilityRule>,
    updated_at: DateTime<Utc>,
    by_capability: HashMap<Term, Vec<String>>,
}

impl PartialEq for RuleSet {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain
            && self.version == other.version
            && self.description == other.description
            && self.rules == other.rules
    }
}

impl RuleSet {
    /// An empty rule set at version `0.0.0`.
    #[must_use]
    pub fn empty(domain: Domain) -> Self {
        Self::build(domain, Version::new(0, 0, 0), String::new(), BTreeMap::new())
    }

    /// Assemble a rule set from validated rules.
    ///
    /// # Errors
    ///
    /// Fails if two rules share an identifier or a rule belongs to another
    /// domain.
    pub fn new(
        domain: Domain,
        version: Version,
        description: impl Into<String>,
        rules: impl IntoIterator<Item = CapabilityRule>,
    ) -> Result<Self, ValidationErrors> {
        let mut errors = Vec::new();
        let mut by_id = BTreeMap::new();
        for rule in rules {
            errors.extend(rule.check(&domain));
            let id = rule.id().to_string();
            if by_id.insert(id.clone(), rule).is_some() {
                errors.push(FieldError::rule(id, "id", "duplicate rule identifier"));
            }
        }
        ValidationErrors::from_vec(errors)?;
        Ok(Self::build(domain, version, description.into(), by_id))
    }

    fn build(
        domain: Domain,
        version: Version,
        description: String,
        rules: BTreeMap<String, CapabilityRule>,
    ) -> Self {
        let mut by_capability: HashMap<Term, Vec<String>> = HashMap::new();
        for (id, rule) in &rules {
            by_capability
                .entry(rule.capability().clone())
                .or_default()
                .push(id.clone());
        }
        Self {
            domain,
            version,
            description,
            rules,
            updated_at: Utc::now(),
            by_capability,
        }
    }

    /// Re-validate the whole set.
    ///
    /// # Errors
    ///
    /// Returns every field-level failure found.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = Vec::new();
        for (id, rule) in &self.rules {
            if id != rule.id() {
                errors.push(FieldError::rule(
                    id,
                    "id",
                    format!("stored under '{id}' but named '{}'", rule.id()),
                ));
            }
            errors.extend(rule.check(&self.domain));
        }
        ValidationErrors::from_vec(errors)
    }

    /// The domain the set belongs to.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The semantic version of the set.
    #[must_use]
    pub const fn version(&self) -> &Version {
        &self.version
    }

    /// A human-readable description of the set.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// When the set was last changed. Not part of equality.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Look up a rule by identifier.
    #[must_use]
    pub fn rule(&self, id: &str) -> Option<&CapabilityRule> {
        self.rules.get(id)
    }

    /// Iterate over the rules in identifier order.
    pub fn rules(&self) -> impl Iterator<Item = &CapabilityRule> {
        self.rules.values()
    }

    /// Identifiers of all rules, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every rule that lets `capability` satisfy `requirement`, with the
    /// reading that applied, in rule identifier order.
    #[must_use]
    pub fn lookup(&self, capability: &Term, requirement: &Term) -> Vec<(&CapabilityRule, Reading)> {
        // Both readings need the rule's capability term to equal one of the
        // two terms.
        let candidates: BTreeSet<&str> = [capability, requirement]
            .into_iter()
            .filter_map(|term| self.by_capability.get(term))
            .flatten()
            .map(String::as_str)
            .collect();

        candidates
            .into_iter()
            .filter_map(|id| self.rules.get(id))
            .filter_map(|rule| {
                rule.reading(capability, requirement)
                    .map(|reading| (rule, reading))
            })
            .collect()
    }

    /// Fingerprint of the set's content.
    ///
    /// Two sets with equal fingerprints are equivalent for matching; the
    /// `updated_at` timestamp does not contribute.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        #[derive(BorshSerialize)]
        struct RuleData<'a> {
            id: &'a str,
            capability: &'a str,
            satisfies: Vec<&'a str>,
            confidence: u64,
            direction: u8,
            description: &'a str,
            source: &'a str,
            notes: Option<&'a str>,
            tags: Vec<&'a str>,
        }

        #[derive(BorshSerialize)]
        struct FingerprintData<'a> {
            domain: &'a str,
            version: String,
            description: &'a str,
            rules: Vec<RuleData<'a>>,
        }

        fingerprint(&FingerprintData {
            domain: self.domain.as_str(),
            version: self.version.to_string(),
            description: &self.description,
            rules: self
                .rules
                .values()
                .map(|rule| RuleData {
                    id: rule.id(),
                    capability: rule.capability().as_str(),
                    satisfies: rule.satisfies().map(Term::as_str).collect(),
                    confidence: rule.confidence().to_bits(),
                    direction: match rule.direction() {
                        Direction::Bidirectional => 0,
                        Direction::Forward => 1,
                        Direction::Reverse => 2,
                    },
                    description: rule.description(),
                    source: &rule.provenance().source,
                    notes: rule.provenance().notes.as_deref(),
                    tags: rule.tags().iter().map(String::as_str).collect(),
                })
                .collect(),
        })
    }

    /// A copy with `rule` inserted, replacing any rule with the same id.
    pub(crate) fn with_rule(&self, rule: CapabilityRule) -> Self {
        let mut rules = self.rules.clone();
        rules.insert(rule.id().to_string(), rule);
        Self::build(
            self.domain.clone(),
            self.version.clone(),
            self.description.clone(),
            rules,
        )
    }

    /// A copy without the rule `id`.
    pub(crate) fn without_rule(&self, id: &str) -> Self {
        let mut rules = self.rules.clone();
        rules.remove(id);
        Self::build(
            self.domain.clone(),
            self.version.clone(),
            self.description.clone(),
            rules,
        )
    }

    /// A copy with `rules` merged in; incoming rules win on identifier
    /// clashes.
    pub(crate) fn merged_with(&self, incoming: &Self) -> Self {
        let mut rules = self.rules.clone();
        rules.extend(
            incoming
                .rules
                .iter()
                .map(|(id, rule)| (id.clone(), rule.clone())),
        );
        let description = if incoming.description.is_empty() {
            self.description.clone()
        } else {
            incoming.description.clone()
        };
        Self::build(self.domain.clone(), self.version.clone(), description, rules)
    }

    /// Replace the version.
    #[must_use]
    pub(crate) fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// The version with its patch component incremented.
    pub(crate) fn next_patch(&self) -> Version {
        Version::new(self.version.major, self.version.minor, self.version.patch + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> Domain {
        Domain::new("manufacturing")
    }

    fn rule(id: &str, capability: &str, satisfies: &[&str], confidence: f64) -> CapabilityRule {
        CapabilityRule::new(
            id,
            capability,
            satisfies.iter().copied(),
            confidence,
            Direction::Bidirectional,
            &domain(),
        )
        .unwrap()
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let errors = RuleSet::new(
            domain(),
            Version::new(1, 0, 0),
            "",
            [
                rule("cnc", "cnc machining", &["milling"], 0.9),
                rule("cnc", "cnc machining", &["turning"], 0.8),
            ],
        )
        .unwrap_err();
        assert!(errors.mentions("cnc", "id"));
    }

    #[test]
    fn rules_of_another_domain_are_rejected() {
        let foreign = CapabilityRule::new(
            "knead",
            "kneading",
            ["dough preparation"],
            0.9,
            Direction::Forward,
            &Domain::new("cooking"),
        )
        .unwrap();
        let errors = RuleSet::new(domain(), Version::new(1, 0, 0), "", [foreign]).unwrap_err();
        assert!(errors.mentions("knead", "domain"));
    }

    #[test]
    fn lookup_finds_rules_through_either_term() {
        let set = RuleSet::new(
            domain(),
            Version::new(1, 0, 0),
            "",
            [
                rule("cnc", "cnc machining", &["milling", "turning"], 0.9),
                rule("print", "3d printing", &["additive manufacturing"], 0.95),
            ],
        )
        .unwrap();

        let hits = set.lookup(&Term::new("CNC machining"), &Term::new("milling"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id(), "cnc");
        assert_eq!(hits[0].1, Reading::Declared);

        let mirrored = set.lookup(&Term::new("milling"), &Term::new("cnc machining"));
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].1, Reading::Mirrored);

        assert!(set
            .lookup(&Term::new("milling"), &Term::new("3d printing"))
            .is_empty());
    }

    #[test]
    fn equality_and_fingerprint_ignore_timestamps() {
        let build = || {
            RuleSet::new(
                domain(),
                Version::new(1, 2, 0),
                "core rules",
                [rule("cnc", "cnc machining", &["milling"], 0.9)],
            )
            .unwrap()
        };
        let a = build();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = build();

        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_tracks_confidence() {
        let a = RuleSet::new(
            domain(),
            Version::new(1, 0, 0),
            "",
            [rule("cnc", "cnc machining", &["milling"], 0.9)],
        )
        .unwrap();
        let b = a.with_rule(rule("cnc", "cnc machining", &["milling"], 0.8));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn merge_prefers_incoming_rules() {
        let current = RuleSet::new(
            domain(),
            Version::new(1, 0, 0),
            "current",
            [
                rule("cnc", "cnc machining", &["milling"], 0.9),
                rule("weld", "tig welding", &["welding"], 0.8),
            ],
        )
        .unwrap();
        let incoming = RuleSet::new(
            domain(),
            Version::new(1, 1, 0),
            "",
            [rule("cnc", "cnc machining", &["milling"], 0.95)],
        )
        .unwrap();

        let merged = current.merged_with(&incoming);
        assert_eq!(merged.len(), 2);
        assert!((merged.rule("cnc").unwrap().confidence() - 0.95).abs() < f64::EPSILON);
        assert_eq!(merged.description(), "current");
    }
}
