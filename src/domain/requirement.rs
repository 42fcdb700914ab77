use serde::Serialize;

use crate::domain::{CapabilityId, ComponentId, Domain, FacilityId, RequirementId, Term};

/// A capability needed by a design.
///
/// Requirements are extracted once per matching request from a design
/// manifest and are not modified afterwards. The `with_*` methods are only
/// used while the requirement is being built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Requirement {
    id: RequirementId,
    label: String,
    #[serde(skip)]
    term: Term,
    #[serde(skip_serializing_if = "Option::is_none")]
    ontology: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    domain: Domain,
    component: ComponentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    quantity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tolerance: Option<f64>,
}

impl Requirement {
    /// Construct a new requirement for the given design component.
    #[must_use]
    pub fn new(
        id: impl Into<RequirementId>,
        label: impl Into<String>,
        domain: Domain,
        component: impl Into<ComponentId>,
    ) -> Self {
        let label = label.into();
        Self {
            id: id.into(),
            term: Term::new(&label),
            label,
            ontology: None,
            description: String::new(),
            domain,
            component: component.into(),
            quantity: None,
            tolerance: None,
        }
    }

    /// Attach an ontology reference (typically a URI).
    #[must_use]
    pub fn with_ontology(mut self, ontology: impl Into<String>) -> Self {
        self.ontology = Some(ontology.into().trim().to_string());
        self
    }

    /// Attach a free-text description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the quantity this requirement calls for.
    #[must_use]
    pub const fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }

    /// Set the tolerance the requirement must be produced to.
    ///
    /// Non-finite or negative tolerances are ignored.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        if tolerance.is_finite() && tolerance >= 0.0 {
            self.tolerance = Some(tolerance);
        }
        self
    }

    /// The requirement's identifier.
    #[must_use]
    pub const fn id(&self) -> &RequirementId {
        &self.id
    }

    /// The human-readable label, as written in the manifest.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The normalized matching term derived from the label.
    #[must_use]
    pub const fn term(&self) -> &Term {
        &self.term
    }

    /// The ontology reference, if any.
    #[must_use]
    pub fn ontology(&self) -> Option<&str> {
        self.ontology.as_deref()
    }

    /// The free-text description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The domain this requirement belongs to.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The design component the requirement belongs to.
    #[must_use]
    pub const fn component(&self) -> &ComponentId {
        &self.component
    }

    /// The requested quantity, if specified.
    #[must_use]
    pub const fn quantity(&self) -> Option<u32> {
        self.quantity
    }

    /// The required tolerance, if specified.
    #[must_use]
    pub const fn tolerance(&self) -> Option<f64> {
        self.tolerance
    }

    /// Text used for semantic comparison: the label followed by the
    /// description.
    #[must_use]
    pub fn semantic_text(&self) -> String {
        join_text(&self.label, &self.description)
    }
}

/// A capability offered by a facility.
///
/// The facility-side mirror of [`Requirement`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capability {
    id: CapabilityId,
    facility: FacilityId,
    label: String,
    #[serde(skip)]
    term: Term,
    #[serde(skip_serializing_if = "Option::is_none")]
    ontology: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    domain: Domain,
    #[serde(skip_serializing_if = "Option::is_none")]
    tolerance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lead_time_days: Option<u32>,
}

impl Capability {
    /// Construct a new capability offered by `facility`.
    #[must_use]
    pub fn new(
        id: impl Into<CapabilityId>,
        facility: impl Into<FacilityId>,
        label: impl Into<String>,
        domain: Domain,
    ) -> Self {
        let label = label.into();
        Self {
            id: id.into(),
            facility: facility.into(),
            term: Term::new(&label),
            label,
            ontology: None,
            description: String::new(),
            domain,
            tolerance: None,
            lead_time_days: None,
        }
    }

    /// Attach an ontology reference (typically a URI).
    #[must_use]
    pub fn with_ontology(mut self, ontology: impl Into<String>) -> Self {
        self.ontology = Some(ontology.into().trim().to_string());
        self
    }

    /// Attach a free-text description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the finest tolerance this capability can achieve.
    ///
    /// Non-finite or negative tolerances are ignored.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        if tolerance.is_finite() && tolerance >= 0.0 {
            self.tolerance = Some(tolerance);
        }
        self
    }

    /// Set the lead time, in days, for one production step.
    #[must_use]
    pub const fn with_lead_time(mut self, days: u32) -> Self {
        self.lead_time_days = Some(days);
        self
    }

    /// The capability's identifier.
    #[must_use]
    pub const fn id(&self) -> &CapabilityId {
        &self.id
    }

    /// The facility offering this capability.
    #[must_use]
    pub const fn facility(&self) -> &FacilityId {
        &self.facility
    }

    /// The human-readable label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The normalized matching term derived from the label.
    #[must_use]
    pub const fn term(&self) -> &Term {
        &self.term
    }

    /// The ontology reference, if any.
    #[must_use]
    pub fn ontology(&self) -> Option<&str> {
        self.ontology.as_deref()
    }

    /// The free-text description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The domain this capability belongs to.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The finest achievable tolerance, if known.
    #[must_use]
    pub const fn tolerance(&self) -> Option<f64> {
        self.tolerance
    }

    /// Lead time in days, if known.
    #[must_use]
    pub const fn lead_time_days(&self) -> Option<u32> {
        self.lead_time_days
    }

    /// Text used for semantic comparison: the label followed by the
    /// description.
    #[must_use]
    pub fn semantic_text(&self) -> String {
        join_text(&self.label, &self.description)
    }
}

fn join_text(label: &str, description: &str) -> String {
    let description = description.trim();
    if description.is_empty() {
        label.to_string()
    } else {
        format!("{label} {description}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_normalized_into_term() {
        let requirement = Requirement::new(
            "r1",
            "  CNC  Machining",
            Domain::new("manufacturing"),
            "housing",
        );
        assert_eq!(requirement.term().as_str(), "cnc machining");
        assert_eq!(requirement.label(), "  CNC  Machining");
    }

    #[test]
    fn invalid_tolerances_are_ignored() {
        let domain = Domain::new("manufacturing");
        let requirement = Requirement::new("r1", "milling", domain.clone(), "c")
            .with_tolerance(f64::NAN)
            .with_tolerance(-1.0);
        assert_eq!(requirement.tolerance(), None);

        let capability = Capability::new("c1", "fab", "milling", domain).with_tolerance(0.05);
        assert_eq!(capability.tolerance(), Some(0.05));
    }

    #[test]
    fn semantic_text_falls_back_to_label() {
        let domain = Domain::new("manufacturing");
        let bare = Capability::new("c1", "fab", "Anodizing", domain.clone());
        assert_eq!(bare.semantic_text(), "Anodizing");

        let described = Capability::new("c2", "fab", "Anodizing", domain)
            .with_description(" Type II sulfuric acid anodizing ");
        assert_eq!(
            described.semantic_text(),
            "Anodizing Type II sulfuric acid anodizing"
        );
    }
}
