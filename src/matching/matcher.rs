use std::{sync::Arc, time::Duration};

use tracing::{debug, instrument, warn};

use super::{
    exact::exact,
    heuristic::heuristic,
    reasoning::{consult, ReasoningOracle, ReasoningRequest},
    Embedder, MatchLayer, MatchResult, SemanticLayer,
};
use crate::{
    domain::{Capability, Config, Domain, MatchSettings, Requirement},
    plugin::DomainRegistry,
    rules::{RuleSet, RuleStore},
};

/// Per-request matching options, resolved for one domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    /// Thresholds and rule precedence.
    pub settings: MatchSettings,
    /// Whether the reasoning oracle may be consulted.
    pub reasoning: bool,
    /// Hard timeout for one reasoning call.
    pub reasoning_timeout: Duration,
    /// Maximum reasoning calls in flight during a scoring pass.
    pub reasoning_concurrency: usize,
}

impl MatchOptions {
    /// Options for `domain` as configured by `config`.
    #[must_use]
    pub fn for_domain(config: &Config, domain: &Domain) -> Self {
        Self {
            settings: config.settings(domain),
            reasoning: config.reasoning_enabled,
            reasoning_timeout: config.reasoning_timeout,
            reasoning_concurrency: config.reasoning_concurrency.max(1),
        }
    }

    /// Enable or disable the reasoning layer.
    #[must_use]
    pub const fn with_reasoning(mut self, enabled: bool) -> Self {
        self.reasoning = enabled;
        self
    }

    /// Override the reasoning timeout.
    #[must_use]
    pub const fn with_reasoning_timeout(mut self, timeout: Duration) -> Self {
        self.reasoning_timeout = timeout;
        self
    }
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self::for_domain(&Config::default(), &Domain::new(""))
    }
}

/// Runs the matching cascade for requirement/capability pairs.
///
/// The matcher holds no per-request state and is shared across scoring
/// workers.
pub struct LayeredMatcher {
    rules: Arc<RuleStore>,
    registry: Arc<DomainRegistry>,
    semantic: SemanticLayer,
    oracle: Option<Arc<dyn ReasoningOracle>>,
}

impl std::fmt::Debug for LayeredMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredMatcher")
            .field("domains", &self.registry.domains())
            .field("semantic", &self.semantic)
            .field("oracle", &self.oracle.is_some())
            .finish_non_exhaustive()
    }
}

impl LayeredMatcher {
    /// A matcher reading rules from `rules`, with the built-in domain
    /// plug-ins, the hashing embedder and no reasoning oracle.
    #[must_use]
    pub fn new(rules: Arc<RuleStore>) -> Self {
        Self {
            rules,
            registry: Arc::new(DomainRegistry::default()),
            semantic: SemanticLayer::default(),
            oracle: None,
        }
    }

    /// Use the plug-ins in `registry`.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<DomainRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Use `embedder` for the semantic layer.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.semantic = SemanticLayer::new(embedder);
        self
    }

    /// Install a reasoning oracle.
    #[must_use]
    pub fn with_oracle(mut self, oracle: Arc<dyn ReasoningOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// The rule store consulted by the heuristic layer.
    #[must_use]
    pub const fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    /// The domain plug-ins.
    #[must_use]
    pub const fn registry(&self) -> &Arc<DomainRegistry> {
        &self.registry
    }

    /// Whether a reasoning oracle is installed.
    #[must_use]
    pub const fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    /// Run the local layers (exact, heuristic, semantic) for one pair.
    #[must_use]
    pub fn match_local(
        &self,
        requirement: &Requirement,
        capability: &Capability,
        domain: &Domain,
        options: &MatchOptions,
    ) -> MatchResult {
        let rules = self.rules.active(domain);
        self.evaluate(&rules, requirement, capability, options)
    }

    /// Run the full cascade for one pair, including the reasoning layer when
    /// it is enabled and the local layers are inconclusive.
    #[instrument(skip_all, fields(requirement = %requirement.id(), capability = %capability.id()))]
    pub async fn match_pair(
        &self,
        requirement: &Requirement,
        capability: &Capability,
        domain: &Domain,
        options: &MatchOptions,
    ) -> MatchResult {
        let local = self.match_local(requirement, capability, domain, options);
        if self.escalates(&local, options) {
            self.reason(requirement, capability, domain, local, options)
                .await
        } else {
            local
        }
    }

    /// The local cascade against a rule snapshot, refined by the domain's
    /// plug-in.
    pub(crate) fn evaluate(
        &self,
        rules: &RuleSet,
        requirement: &Requirement,
        capability: &Capability,
        options: &MatchOptions,
    ) -> MatchResult {
        let result = self.cascade(rules, requirement, capability, &options.settings);
        self.refine(rules.domain(), requirement, capability, result)
    }

    /// Whether `result` should be put to the reasoning oracle.
    pub(crate) fn escalates(&self, result: &MatchResult, options: &MatchOptions) -> bool {
        options.reasoning
            && self.oracle.is_some()
            && !result.accepted(options.settings.accept_threshold)
    }

    /// Ask the oracle about a pair whose local result is `prior`.
    ///
    /// Any oracle failure is logged and `prior` is returned unchanged.
    pub(crate) async fn reason(
        &self,
        requirement: &Requirement,
        capability: &Capability,
        domain: &Domain,
        prior: MatchResult,
        options: &MatchOptions,
    ) -> MatchResult {
        let Some(oracle) = &self.oracle else {
            return prior;
        };

        let request = ReasoningRequest {
            requirement: requirement.semantic_text(),
            capability: capability.semantic_text(),
            domain: domain.clone(),
            context: prior.explanation().to_string(),
        };

        match consult(oracle.as_ref(), request, options.reasoning_timeout).await {
            Ok(reply) if reply.matched => {
                let result = MatchResult::hit(
                    requirement,
                    capability,
                    MatchLayer::Reasoning,
                    reply.confidence,
                    reply.explanation,
                );
                let result = self.refine(domain, requirement, capability, result);
                debug!(
                    confidence = result.confidence(),
                    matched = result.matched(),
                    "Reasoning oracle replied"
                );
                if result.is_better_than(&prior) {
                    result
                } else {
                    prior
                }
            }
            Ok(reply) => {
                debug!("Reasoning oracle rejected the pair");
                if prior.matched() {
                    prior
                } else {
                    MatchResult::miss(
                        requirement,
                        capability,
                        MatchLayer::Reasoning,
                        reply.explanation,
                    )
                }
            }
            Err(error) => {
                warn!(
                    %error,
                    requirement = %requirement.id(),
                    capability = %capability.id(),
                    "Reasoning oracle failed, keeping local result"
                );
                prior
            }
        }
    }

    fn cascade(
        &self,
        rules: &RuleSet,
        requirement: &Requirement,
        capability: &Capability,
        settings: &MatchSettings,
    ) -> MatchResult {
        if let Some(hit) = exact(requirement, capability) {
            debug!(layer = %MatchLayer::Exact, "Matched");
            return hit;
        }

        let mut best = match heuristic(rules, requirement, capability, settings.rule_precedence) {
            Some(hit) if hit.accepted(settings.accept_threshold) => {
                debug!(layer = %MatchLayer::Heuristic, confidence = hit.confidence(), "Matched");
                return hit;
            }
            Some(hit) => hit,
            None => MatchResult::miss(
                requirement,
                capability,
                MatchLayer::Heuristic,
                "no rule applies",
            ),
        };

        let semantic = self
            .semantic
            .evaluate(requirement, capability, settings.semantic_threshold);
        if semantic.is_better_than(&best) {
            best = semantic;
        }
        debug!(
            layer = %best.layer(),
            matched = best.matched(),
            confidence = best.confidence(),
            "Local cascade finished"
        );
        best
    }

    fn refine(
        &self,
        domain: &Domain,
        requirement: &Requirement,
        capability: &Capability,
        result: MatchResult,
    ) -> MatchResult {
        match self.registry.get(domain) {
            Some(plugin) => plugin.refine(requirement, capability, result),
            None => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        matching::{OracleError, ReasoningReply},
        rules::{ImportMode, RuleSetDocument},
    };

    const RULES: &str = r#"
_version: "1"
domain: manufacturing
version: 1.0.0
rules:
  - id: cnc-synonym
    capability: CNC machining
    satisfies: [Computer Numerical Control machining]
    confidence: 0.95
  - id: anodize
    capability: surface finishing
    satisfies: [anodizing]
    confidence: 0.4
    direction: forward
"#;

    fn domain() -> Domain {
        Domain::new("manufacturing")
    }

    fn store(with_rules: bool) -> Arc<RuleStore> {
        let store = RuleStore::new();
        if with_rules {
            store
                .import(
                    RuleSetDocument::from_yaml_str(RULES).unwrap(),
                    ImportMode::Replace,
                )
                .unwrap();
        }
        Arc::new(store)
    }

    fn pair(wanted: &str, offered: &str) -> (Requirement, Capability) {
        (
            Requirement::new("r1", wanted, domain(), "housing"),
            Capability::new("c1", "fab-01", offered, domain()),
        )
    }

    struct Stalled;

    #[async_trait]
    impl ReasoningOracle for Stalled {
        async fn consult(&self, _request: ReasoningRequest) -> Result<ReasoningReply, OracleError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        matched: bool,
    }

    #[async_trait]
    impl ReasoningOracle for Counting {
        async fn consult(&self, _request: ReasoningRequest) -> Result<ReasoningReply, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ReasoningReply {
                matched: self.matched,
                confidence: 0.85,
                explanation: "anodizing is a surface finish".to_string(),
            })
        }
    }

    fn reasoning_options() -> MatchOptions {
        MatchOptions::default()
            .with_reasoning(true)
            .with_reasoning_timeout(Duration::from_millis(20))
    }

    #[test]
    fn equal_terms_match_exactly() {
        let matcher = LayeredMatcher::new(store(true));
        let (requirement, capability) = pair("Laser cutting", "  laser  CUTTING");
        let result = matcher.match_local(&requirement, &capability, &domain(), &MatchOptions::default());
        assert!(result.matched());
        assert_eq!(result.layer(), MatchLayer::Exact);
        assert!((result.confidence() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn synonym_rule_decides_at_the_heuristic_layer() {
        let matcher = LayeredMatcher::new(store(true));
        let (requirement, capability) = pair("CNC machining", "Computer Numerical Control machining");
        let result = matcher.match_local(&requirement, &capability, &domain(), &MatchOptions::default());
        assert!(result.matched());
        assert_eq!(result.layer(), MatchLayer::Heuristic);
        assert!((result.confidence() - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn without_the_rule_the_pair_is_unmatched() {
        let matcher = LayeredMatcher::new(store(false));
        let (requirement, capability) = pair("CNC machining", "Computer Numerical Control machining");
        let result = matcher.match_local(&requirement, &capability, &domain(), &MatchOptions::default());
        assert!(!result.matched());
        assert_eq!(result.layer(), MatchLayer::Semantic);
    }

    #[test]
    fn low_confidence_rules_are_kept_when_nothing_better_exists() {
        let matcher = LayeredMatcher::new(store(true));
        let (requirement, capability) = pair("anodizing", "surface finishing");
        let result = matcher.match_local(&requirement, &capability, &domain(), &MatchOptions::default());
        assert!(result.matched());
        assert_eq!(result.layer(), MatchLayer::Heuristic);
        assert!((result.confidence() - 0.4).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn stalled_oracle_degrades_to_the_local_result() {
        let matcher = LayeredMatcher::new(store(true)).with_oracle(Arc::new(Stalled));
        for (wanted, offered) in [
            ("anodizing", "surface finishing"),
            ("CNC machining", "powder coating"),
        ] {
            let (requirement, capability) = pair(wanted, offered);
            let local =
                matcher.match_local(&requirement, &capability, &domain(), &reasoning_options());
            let full = matcher
                .match_pair(&requirement, &capability, &domain(), &reasoning_options())
                .await;
            assert_eq!(full, local);
        }
    }

    #[tokio::test]
    async fn oracle_can_upgrade_a_weak_match() {
        let oracle = Arc::new(Counting {
            matched: true,
            ..Counting::default()
        });
        let matcher = LayeredMatcher::new(store(true)).with_oracle(oracle.clone());
        let (requirement, capability) = pair("anodizing", "surface finishing");

        let result = matcher
            .match_pair(&requirement, &capability, &domain(), &reasoning_options())
            .await;
        assert_eq!(result.layer(), MatchLayer::Reasoning);
        assert!((result.confidence() - 0.85).abs() < f64::EPSILON);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oracle_rejection_of_a_miss_is_recorded() {
        let matcher =
            LayeredMatcher::new(store(true)).with_oracle(Arc::new(Counting::default()));
        let (requirement, capability) = pair("CNC machining", "powder coating");

        let result = matcher
            .match_pair(&requirement, &capability, &domain(), &reasoning_options())
            .await;
        assert!(!result.matched());
        assert_eq!(result.layer(), MatchLayer::Reasoning);
    }

    #[tokio::test]
    async fn oracle_is_skipped_when_disabled_or_unneeded() {
        let oracle = Arc::new(Counting {
            matched: true,
            ..Counting::default()
        });
        let matcher = LayeredMatcher::new(store(true)).with_oracle(oracle.clone());

        let (weak, weak_capability) = pair("anodizing", "surface finishing");
        matcher
            .match_pair(&weak, &weak_capability, &domain(), &MatchOptions::default())
            .await;

        let (strong, strong_capability) = pair("CNC machining", "Computer Numerical Control machining");
        matcher
            .match_pair(&strong, &strong_capability, &domain(), &reasoning_options())
            .await;

        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }
}
