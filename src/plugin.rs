//! Domain plug-ins.
//!
//! Each problem domain supplies a [`DomainPlugin`] that turns manifests into
//! designs and facilities, may adjust match results, and may add domain
//! checks to supply tree validation. The [`DomainRegistry`] maps domain
//! names to plug-ins.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    domain::{Capability, Design, Domain, Facility, Requirement},
    error::InputError,
    matching::MatchResult,
    supply_tree::SupplyTree,
};

mod cooking;
pub use cooking::Cooking;

mod manifest;
pub use manifest::{
    read_manifest, CapabilityManifest, ComponentManifest, DesignManifest, FacilityManifest,
    RequirementManifest,
};

mod manufacturing;
pub use manufacturing::Manufacturing;

/// The behaviour a problem domain contributes to planning.
pub trait DomainPlugin: fmt::Debug + Send + Sync {
    /// The domain this plug-in serves.
    fn domain(&self) -> Domain;

    /// Build a design from its manifest.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] naming the offending field if the manifest
    /// is malformed.
    fn extract_design(&self, manifest: &DesignManifest) -> Result<Design, InputError>;

    /// Build a facility from its manifest.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] naming the offending field if the manifest
    /// is malformed.
    fn extract_facility(&self, manifest: &FacilityManifest) -> Result<Facility, InputError>;

    /// Adjust the result of the matching layers for one pair.
    fn refine(
        &self,
        _requirement: &Requirement,
        _capability: &Capability,
        result: MatchResult,
    ) -> MatchResult {
        result
    }

    /// Domain-specific reasons why `tree` is invalid.
    fn validate(&self, _tree: &SupplyTree, _design: &Design) -> Vec<String> {
        Vec::new()
    }
}

/// Lookup table from domain to plug-in.
#[derive(Debug, Clone)]
pub struct DomainRegistry {
    plugins: BTreeMap<Domain, Arc<dyn DomainPlugin>>,
}

impl Default for DomainRegistry {
    /// A registry with the `manufacturing` and `cooking` plug-ins.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(Manufacturing));
        registry.register(Arc::new(Cooking));
        registry
    }
}

impl DomainRegistry {
    /// A registry with no plug-ins.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            plugins: BTreeMap::new(),
        }
    }

    /// Register `plugin` for its domain, returning the plug-in it replaces.
    pub fn register(&mut self, plugin: Arc<dyn DomainPlugin>) -> Option<Arc<dyn DomainPlugin>> {
        self.plugins.insert(plugin.domain(), plugin)
    }

    /// The plug-in for `domain`.
    #[must_use]
    pub fn get(&self, domain: &Domain) -> Option<Arc<dyn DomainPlugin>> {
        self.plugins.get(domain).cloned()
    }

    /// Whether a plug-in is registered for `domain`.
    #[must_use]
    pub fn contains(&self, domain: &Domain) -> bool {
        self.plugins.contains_key(domain)
    }

    /// Registered domains, in name order.
    #[must_use]
    pub fn domains(&self) -> Vec<Domain> {
        self.plugins.keys().cloned().collect()
    }
}
