//! Per-facility scoring.
//!
//! A facility is scored against a design's full requirement list: for each
//! requirement the best successful match over the facility's capabilities is
//! kept. Scoring passes over many facilities run the local layers on a
//! bounded worker pool, then put inconclusive pairs to the reasoning oracle
//! with bounded concurrency. Results are merged by facility identifier, so
//! the outcome does not depend on completion order.

use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};

use futures::{stream, StreamExt};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::{
    domain::{Domain, Facility, FacilityId, Requirement, RequirementId},
    error::Error,
    matching::{LayeredMatcher, MatchOptions, MatchResult},
    rules::RuleSet,
};

/// How well one facility covers a design's requirements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacilityScore {
    facility: FacilityId,
    matches: BTreeMap<RequirementId, MatchResult>,
    unmet: Vec<RequirementId>,
    coverage: f64,
    aggregate_confidence: f64,
}

impl FacilityScore {
    #[allow(clippy::cast_precision_loss)]
    fn new(
        facility: FacilityId,
        requirements: &[Requirement],
        best: Vec<Option<(usize, MatchResult)>>,
    ) -> Self {
        let mut matches = BTreeMap::new();
        let mut unmet = Vec::new();
        let mut total = 0.0;
        for (requirement, best) in requirements.iter().zip(best) {
            match best {
                Some((_, result)) => {
                    total += result.confidence();
                    matches.insert(requirement.id().clone(), result);
                }
                None => unmet.push(requirement.id().clone()),
            }
        }

        let (coverage, aggregate_confidence) = if requirements.is_empty() {
            (0.0, 0.0)
        } else {
            let count = requirements.len() as f64;
            (matches.len() as f64 / count, total / count)
        };

        Self {
            facility,
            matches,
            unmet,
            coverage,
            aggregate_confidence,
        }
    }

    /// The facility that was scored.
    #[must_use]
    pub const fn facility(&self) -> &FacilityId {
        &self.facility
    }

    /// Fraction of requirements matched, in `[0, 1]`.
    #[must_use]
    pub const fn coverage(&self) -> f64 {
        self.coverage
    }

    /// Mean match confidence over all requirements; unmet ones count as zero.
    #[must_use]
    pub const fn aggregate_confidence(&self) -> f64 {
        self.aggregate_confidence
    }

    /// The best match for a requirement, if the facility satisfies it.
    #[must_use]
    pub fn best_match(&self, requirement: &RequirementId) -> Option<&MatchResult> {
        self.matches.get(requirement)
    }

    /// Whether the facility satisfies the requirement.
    #[must_use]
    pub fn covers(&self, requirement: &RequirementId) -> bool {
        self.matches.contains_key(requirement)
    }

    /// Best matches, keyed by requirement.
    pub fn matches(&self) -> impl Iterator<Item = (&RequirementId, &MatchResult)> {
        self.matches.iter()
    }

    /// Requirements the facility cannot satisfy, in design order.
    #[must_use]
    pub fn unmet(&self) -> &[RequirementId] {
        &self.unmet
    }

    /// Whether the facility may take part in an assembly.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.coverage > 0.0
    }
}

/// Scores of every facility in a pass, keyed by facility identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScoreBoard(BTreeMap<FacilityId, FacilityScore>);

impl ScoreBoard {
    /// The score of one facility.
    #[must_use]
    pub fn get(&self, facility: &FacilityId) -> Option<&FacilityScore> {
        self.0.get(facility)
    }

    /// All scores in facility order.
    pub fn iter(&self) -> impl Iterator<Item = &FacilityScore> {
        self.0.values()
    }

    /// Scores of facilities with non-zero coverage, in facility order.
    pub fn eligible(&self) -> impl Iterator<Item = &FacilityScore> {
        self.0.values().filter(|score| score.is_eligible())
    }

    /// Number of facilities scored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no facility was scored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, score: FacilityScore) {
        let facility = score.facility.clone();
        if self.0.insert(facility.clone(), score).is_some() {
            warn!(%facility, "Facility scored twice, keeping the later score");
        }
    }
}

impl FromIterator<FacilityScore> for ScoreBoard {
    fn from_iter<T: IntoIterator<Item = FacilityScore>>(iter: T) -> Self {
        let mut board = Self::default();
        for score in iter {
            board.insert(score);
        }
        board
    }
}

/// The local half of a facility's scoring pass.
#[derive(Debug, Default)]
struct Pass {
    /// Best match per requirement, with the index of the capability.
    best: Vec<Option<(usize, MatchResult)>>,
    /// Pairs to put to the reasoning oracle: requirement index, capability
    /// index and local result.
    escalations: Vec<(usize, usize, MatchResult)>,
}

/// Keep `result` if it beats the current best; ties go to the earlier
/// capability.
fn keep_best(best: &mut Option<(usize, MatchResult)>, capability: usize, result: MatchResult) {
    if !result.matched() {
        return;
    }
    let replace = match best {
        None => true,
        Some((current, existing)) => match result.confidence().total_cmp(&existing.confidence()) {
            Ordering::Greater => true,
            Ordering::Equal => capability < *current,
            Ordering::Less => false,
        },
    };
    if replace {
        *best = Some((capability, result));
    }
}

fn local_pass(
    matcher: &LayeredMatcher,
    rules: &RuleSet,
    requirements: &[Requirement],
    facility: &Facility,
    options: &MatchOptions,
) -> Pass {
    let mut pass = Pass::default();
    for (r, requirement) in requirements.iter().enumerate() {
        let mut best = None;
        let mut pending = Vec::new();
        for (c, capability) in facility.capabilities().iter().enumerate() {
            let result = matcher.evaluate(rules, requirement, capability, options);
            if matcher.escalates(&result, options) {
                pending.push((r, c, result.clone()));
            }
            keep_best(&mut best, c, result);
        }

        let accepted = best
            .as_ref()
            .is_some_and(|(_, result)| result.accepted(options.settings.accept_threshold));
        if !accepted {
            pass.escalations.extend(pending);
        }
        pass.best.push(best);
    }
    pass
}

/// Scores facilities against a design's requirements.
#[derive(Debug)]
pub struct FacilityScorer {
    matcher: Arc<LayeredMatcher>,
    pool: Arc<rayon::ThreadPool>,
}

impl FacilityScorer {
    /// A scorer with a worker pool of `worker_threads` threads (`0` lets
    /// rayon decide).
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot be started.
    pub fn new(matcher: Arc<LayeredMatcher>, worker_threads: usize) -> Result<Self, Error> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|index| format!("stree-score-{index}"))
            .build()?;
        Ok(Self {
            matcher,
            pool: Arc::new(pool),
        })
    }

    /// The matcher used for every pair.
    #[must_use]
    pub const fn matcher(&self) -> &Arc<LayeredMatcher> {
        &self.matcher
    }

    /// Score one facility with the local layers only, on the calling thread.
    #[must_use]
    pub fn score_local(
        &self,
        requirements: &[Requirement],
        facility: &Facility,
        domain: &Domain,
        options: &MatchOptions,
    ) -> FacilityScore {
        let rules = self.matcher.rules().active(domain);
        let options = options.with_reasoning(false);
        let pass = local_pass(&self.matcher, &rules, requirements, facility, &options);
        FacilityScore::new(facility.id().clone(), requirements, pass.best)
    }

    /// Score one facility, consulting the reasoning oracle when enabled.
    pub async fn score(
        &self,
        requirements: &[Requirement],
        facility: &Facility,
        domain: &Domain,
        options: &MatchOptions,
    ) -> FacilityScore {
        let rules = self.matcher.rules().active(domain);
        let mut passes = vec![local_pass(&self.matcher, &rules, requirements, facility, options)];
        self.escalate(requirements, std::slice::from_ref(facility), &mut passes, domain, options)
            .await;
        let pass = passes.pop().unwrap_or_default();
        FacilityScore::new(facility.id().clone(), requirements, pass.best)
    }

    /// Score every facility.
    ///
    /// The local layers run on the worker pool against one rule snapshot.
    /// Pairs without an accepted local match are then put to the reasoning
    /// oracle, at most `options.reasoning_concurrency` at a time. If two
    /// facilities share an identifier, the later one wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] if the worker task was cancelled.
    #[instrument(skip_all, fields(%domain, requirements = requirements.len(), facilities = facilities.len()))]
    pub async fn score_all(
        &self,
        requirements: &[Requirement],
        facilities: &[Facility],
        domain: &Domain,
        options: &MatchOptions,
    ) -> Result<ScoreBoard, Error> {
        let rules = self.matcher.rules().active(domain);
        let shared_requirements: Arc<[Requirement]> = requirements.into();
        let shared_facilities: Arc<[Facility]> = facilities.into();

        let handle = {
            let matcher = Arc::clone(&self.matcher);
            let pool = Arc::clone(&self.pool);
            let requirements = Arc::clone(&shared_requirements);
            let facilities = Arc::clone(&shared_facilities);
            let options = *options;
            tokio::task::spawn_blocking(move || {
                pool.install(|| {
                    facilities
                        .par_iter()
                        .map(|facility| {
                            local_pass(&matcher, &rules, &requirements, facility, &options)
                        })
                        .collect::<Vec<_>>()
                })
            })
        };
        let mut passes = match handle.await {
            Ok(passes) => passes,
            Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
            Err(error) => return Err(Error::Interrupted(error.to_string())),
        };

        self.escalate(
            &shared_requirements,
            &shared_facilities,
            &mut passes,
            domain,
            options,
        )
        .await;

        let board: ScoreBoard = shared_facilities
            .iter()
            .zip(passes)
            .map(|(facility, pass)| {
                FacilityScore::new(facility.id().clone(), requirements, pass.best)
            })
            .collect();
        debug!(
            eligible = board.eligible().count(),
            "Scored facilities"
        );
        Ok(board)
    }

    async fn escalate(
        &self,
        requirements: &[Requirement],
        facilities: &[Facility],
        passes: &mut [Pass],
        domain: &Domain,
        options: &MatchOptions,
    ) {
        let jobs: Vec<_> = passes
            .iter_mut()
            .enumerate()
            .flat_map(|(f, pass)| {
                std::mem::take(&mut pass.escalations)
                    .into_iter()
                    .map(move |(r, c, prior)| (f, r, c, prior))
            })
            .collect();
        if jobs.is_empty() {
            return;
        }
        debug!(pairs = jobs.len(), "Consulting reasoning oracle");

        let matcher = &self.matcher;
        let mut outcomes: Vec<_> = stream::iter(jobs)
            .map(|(f, r, c, prior)| {
                let requirement = &requirements[r];
                let capability = &facilities[f].capabilities()[c];
                async move {
                    let result = matcher
                        .reason(requirement, capability, domain, prior, options)
                        .await;
                    (f, r, c, result)
                }
            })
            .buffer_unordered(options.reasoning_concurrency.max(1))
            .collect()
            .await;

        outcomes.sort_by_key(|(f, r, c, _)| (*f, *r, *c));
        for (f, r, c, result) in outcomes {
            keep_best(&mut passes[f].best[r], c, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering as AtomicOrdering},
        time::Duration,
    };

    use async_trait::async_trait;
    use test_case::test_case;

    use super::*;
    use crate::{
        matching::{MatchLayer, OracleError, ReasoningOracle, ReasoningReply, ReasoningRequest},
        rules::RuleStore,
    };

    fn domain() -> Domain {
        Domain::new("manufacturing")
    }

    fn requirements() -> Vec<Requirement> {
        ["laser cutting", "tig welding", "powder coating"]
            .iter()
            .enumerate()
            .map(|(i, label)| Requirement::new(format!("r{}", i + 1), *label, domain(), "frame"))
            .collect()
    }

    fn facility(id: &str, labels: &[&str]) -> Facility {
        labels
            .iter()
            .fold(Facility::new(id, id, domain()), |facility, label| {
                facility.with_capability(label)
            })
    }

    fn scorer(workers: usize) -> FacilityScorer {
        FacilityScorer::new(Arc::new(LayeredMatcher::new(Arc::new(RuleStore::new()))), workers)
            .unwrap()
    }

    #[test]
    fn facility_without_matching_capability_has_zero_coverage() {
        let score = scorer(1).score_local(
            &requirements(),
            &facility("fab-01", &["injection moulding"]),
            &domain(),
            &MatchOptions::default(),
        );
        assert!(score.coverage().abs() < f64::EPSILON);
        assert!(score.aggregate_confidence().abs() < f64::EPSILON);
        assert!(!score.is_eligible());
        assert_eq!(score.unmet().len(), 3);
    }

    #[test]
    fn partial_facilities_are_penalized_on_both_axes() {
        let score = scorer(1).score_local(
            &requirements(),
            &facility("fab-01", &["laser cutting", "TIG welding"]),
            &domain(),
            &MatchOptions::default(),
        );
        assert!((score.coverage() - 2.0 / 3.0).abs() < 1e-9);
        assert!((score.aggregate_confidence() - 2.0 / 3.0).abs() < 1e-9);
        assert!(score.covers(&RequirementId::from("r1")));
        assert_eq!(score.unmet(), &[RequirementId::from("r3")]);
    }

    #[test]
    fn empty_requirement_lists_score_zero() {
        let score = scorer(1).score_local(
            &[],
            &facility("fab-01", &["laser cutting"]),
            &domain(),
            &MatchOptions::default(),
        );
        assert!(score.coverage().abs() < f64::EPSILON);
        assert!(!score.is_eligible());
    }

    #[test]
    fn ties_go_to_the_earlier_capability() {
        let score = scorer(1).score_local(
            &requirements(),
            &facility("fab-01", &["laser cutting", "Laser Cutting"]),
            &domain(),
            &MatchOptions::default(),
        );
        let best = score.best_match(&RequirementId::from("r1")).unwrap();
        assert_eq!(best.capability().as_str(), "cap-1");
    }

    #[test_case(1; "one worker")]
    #[test_case(4; "four workers")]
    #[tokio::test]
    async fn boards_do_not_depend_on_worker_count(workers: usize) {
        let facilities: Vec<_> = (0..12)
            .rev()
            .map(|i| {
                let labels: &[&str] = match i % 3 {
                    0 => &["laser cutting"],
                    1 => &["tig welding", "powder coating"],
                    _ => &["anodizing"],
                };
                facility(&format!("fab-{i:02}"), labels)
            })
            .collect();

        let board = scorer(workers)
            .score_all(&requirements(), &facilities, &domain(), &MatchOptions::default())
            .await
            .unwrap();
        let reference = scorer(1)
            .score_all(&requirements(), &facilities, &domain(), &MatchOptions::default())
            .await
            .unwrap();

        assert_eq!(board, reference);
        assert_eq!(board.len(), 12);
        assert_eq!(board.eligible().count(), 8);
        let ids: Vec<_> = board.iter().map(|score| score.facility().as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn duplicate_facility_ids_keep_the_later_facility() {
        let facilities = vec![
            facility("fab-01", &["laser cutting"]),
            facility("fab-01", &["tig welding", "powder coating"]),
        ];
        let board = scorer(2)
            .score_all(&requirements(), &facilities, &domain(), &MatchOptions::default())
            .await
            .unwrap();
        assert_eq!(board.len(), 1);
        let score = board.get(&FacilityId::from("fab-01")).unwrap();
        assert!(!score.covers(&RequirementId::from("r1")));
        assert!(score.covers(&RequirementId::from("r2")));
    }

    struct SlowYes {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReasoningOracle for SlowYes {
        async fn consult(&self, request: ReasoningRequest) -> Result<ReasoningReply, OracleError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(ReasoningReply {
                matched: request.requirement == "anodizing",
                confidence: 0.8,
                explanation: "judged".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn inconclusive_pairs_are_escalated() {
        let oracle = Arc::new(SlowYes {
            calls: AtomicUsize::new(0),
        });
        let matcher = LayeredMatcher::new(Arc::new(RuleStore::new())).with_oracle(oracle.clone());
        let scorer = FacilityScorer::new(Arc::new(matcher), 2).unwrap();

        let requirements = vec![
            Requirement::new("r1", "laser cutting", domain(), "frame"),
            Requirement::new("r2", "anodizing", domain(), "frame"),
        ];
        let facilities = vec![facility("fab-01", &["laser cutting", "surface treatment"])];
        let options = MatchOptions::default().with_reasoning(true);

        let board = scorer
            .score_all(&requirements, &facilities, &domain(), &options)
            .await
            .unwrap();
        let score = board.get(&FacilityId::from("fab-01")).unwrap();

        // r1 is settled locally; r2 is put to the oracle once per capability
        assert_eq!(oracle.calls.load(AtomicOrdering::SeqCst), 2);
        let best = score.best_match(&RequirementId::from("r2")).unwrap();
        assert_eq!(best.layer(), MatchLayer::Reasoning);
        assert_eq!(best.capability().as_str(), "cap-1");
        assert!((score.coverage() - 1.0).abs() < f64::EPSILON);
    }
}
