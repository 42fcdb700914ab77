//! Domain models for capability matching.
//!
//! This module contains the types that flow through the matching pipeline:
//! designs and the requirements they place on manufacturing, facilities and
//! the capabilities they offer, and the configuration that tunes matching.

mod config;
pub use config::{Config, DomainOverrides, MatchSettings, RulePrecedence, ValidationMode};

mod design;
pub use design::{Component, Dependency, Design};

mod facility;
pub use facility::Facility;

pub(crate) mod fingerprint;

mod ids;
pub use ids::{CapabilityId, ComponentId, DesignId, Domain, FacilityId, NodeId, RequirementId};

/// Requirement and capability types.
pub mod requirement;
pub use requirement::{Capability, Requirement};

mod term;
pub use term::Term;
