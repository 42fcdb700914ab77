//! Capability matching and supply tree assembly
//!
//! A design's requirements are matched against the capabilities of
//! candidate facilities, the facilities are scored, and the best coverage is
//! assembled into a validated multi-facility production plan, the supply
//! tree.

pub mod domain;
pub use domain::{Capability, Config, Design, Domain, Facility, Requirement};

mod error;
pub use error::{Error, InputError};

pub mod matching;
pub use matching::{LayeredMatcher, MatchOptions, MatchResult, ReasoningOracle};

/// Domain plug-ins and manifests.
pub mod plugin;
pub use plugin::{DomainPlugin, DomainRegistry};

mod planner;
pub use planner::{PlanOptions, PlanOutcome, Planner};

pub mod rules;
pub use rules::{RuleError, RuleStore};

/// Per-facility coverage scoring.
pub mod scoring;
pub use scoring::{FacilityScore, FacilityScorer, ScoreBoard};

pub mod supply_tree;
pub use supply_tree::{SolutionAssembler, SupplyTree, SupplyTreeValidator};
