//! End-to-end planning: score, assemble, validate, rank.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::{
    domain::{Config, Design, Domain, Facility, ValidationMode},
    error::{Error, InputError},
    matching::{LayeredMatcher, MatchOptions},
    scoring::{FacilityScorer, ScoreBoard},
    supply_tree::{rank, SolutionAssembler, SupplyTree, SupplyTreeValidator, UnresolvedRequirement},
};

/// Options for one planning request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanOptions {
    /// Matching thresholds and reasoning settings.
    pub matching: MatchOptions,
    /// Maximum number of candidate trees.
    pub max_alternatives: usize,
    /// Validation depth.
    pub validation_mode: ValidationMode,
}

impl PlanOptions {
    /// Options for `domain` as configured by `config`.
    #[must_use]
    pub fn for_domain(config: &Config, domain: &Domain) -> Self {
        Self {
            matching: MatchOptions::for_domain(config, domain),
            max_alternatives: config.max_alternatives,
            validation_mode: config.validation_mode,
        }
    }

    /// Override the validation depth.
    #[must_use]
    pub const fn with_validation_mode(mut self, mode: ValidationMode) -> Self {
        self.validation_mode = mode;
        self
    }
}

/// The result of planning one design.
#[derive(Debug, Clone, Serialize)]
pub struct PlanOutcome {
    /// Valid trees, best first.
    pub ranked: Vec<SupplyTree>,
    /// Invalid trees, each carrying its reasons.
    pub rejected: Vec<SupplyTree>,
    /// Requirements that no facility satisfies.
    pub unresolved: Vec<UnresolvedRequirement>,
    /// Per-facility coverage.
    pub facility_scores: ScoreBoard,
}

impl PlanOutcome {
    /// The best valid tree, if any.
    #[must_use]
    pub fn best(&self) -> Option<&SupplyTree> {
        self.ranked.first()
    }
}

/// Plans supply trees for designs.
#[derive(Debug)]
pub struct Planner {
    scorer: FacilityScorer,
}

impl Planner {
    /// A planner matching with `matcher` on a worker pool of
    /// `worker_threads` threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot be started.
    pub fn new(matcher: Arc<LayeredMatcher>, worker_threads: usize) -> Result<Self, Error> {
        Ok(Self {
            scorer: FacilityScorer::new(matcher, worker_threads)?,
        })
    }

    /// The matcher used for scoring.
    #[must_use]
    pub const fn matcher(&self) -> &Arc<LayeredMatcher> {
        self.scorer.matcher()
    }

    /// Plan `design` over `facilities`.
    ///
    /// Facilities of another domain are skipped.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] if no plug-in serves the design's domain or
    /// the design has no requirements, and [`Error::Interrupted`] if the
    /// scoring pass is cancelled.
    #[instrument(skip_all, fields(design = %design.id(), domain = %design.domain()))]
    pub async fn plan(
        &self,
        design: &Design,
        facilities: &[Facility],
        options: &PlanOptions,
    ) -> Result<PlanOutcome, Error> {
        let domain = design.domain();
        let plugin = self.matcher().registry().get(domain).ok_or_else(|| {
            InputError::new("domain", format!("no plug-in is registered for {domain}"))
        })?;
        if design.requirements().is_empty() {
            return Err(InputError::new("requirements", "design has no requirements").into());
        }

        let facilities: Vec<Facility> = facilities
            .iter()
            .filter(|facility| {
                let same = facility.domain() == domain;
                if !same {
                    warn!(
                        facility = %facility.id(),
                        facility_domain = %facility.domain(),
                        "Skipping facility from another domain"
                    );
                }
                same
            })
            .cloned()
            .collect();

        let board = self
            .scorer
            .score_all(design.requirements(), &facilities, domain, &options.matching)
            .await?;

        let trees = SolutionAssembler::new(options.max_alternatives).assemble(
            design,
            &facilities,
            &board,
        );
        let validator = SupplyTreeValidator::new(options.validation_mode).with_plugin(plugin);
        let validated = trees
            .into_iter()
            .map(|tree| validator.validate(tree, design))
            .collect();
        let (ranked, rejected) = rank(validated);

        let unresolved: Vec<_> = design
            .requirements()
            .iter()
            .filter(|requirement| !board.eligible().any(|score| score.covers(requirement.id())))
            .map(|requirement| UnresolvedRequirement {
                requirement: requirement.id().clone(),
                component: requirement.component().clone(),
                label: requirement.label().to_string(),
                reason: "no facility satisfies the requirement".to_string(),
            })
            .collect();

        info!(
            facilities = facilities.len(),
            ranked = ranked.len(),
            rejected = rejected.len(),
            unresolved = unresolved.len(),
            "Planned design"
        );

        Ok(PlanOutcome {
            ranked,
            rejected,
            unresolved,
            facility_scores: board,
        })
    }
}
