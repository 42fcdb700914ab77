use std::collections::HashSet;

use borsh::BorshSerialize;
use serde::Serialize;

use crate::{
    domain::{fingerprint::fingerprint, ComponentId, DesignId, Domain, Requirement, RequirementId},
    error::InputError,
};

/// A cohesive part of a design, such as a housing or a circuit board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    /// Identifier of the component, unique within the design.
    pub id: ComponentId,
    /// Display name.
    pub name: String,
}

/// A declared dependency: `dependent` can only be produced once `dependency`
/// is available.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Dependency {
    /// The component that consumes the other.
    pub dependent: ComponentId,
    /// The component that must be produced first.
    pub dependency: ComponentId,
}

/// A hardware design, broken into components and the requirements each
/// component places on manufacturing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Design {
    id: DesignId,
    name: String,
    domain: Domain,
    components: Vec<Component>,
    requirements: Vec<Requirement>,
    dependencies: Vec<Dependency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_within_days: Option<u32>,
}

impl Design {
    /// Creates an empty design.
    #[must_use]
    pub fn new(id: impl Into<DesignId>, name: impl Into<String>, domain: Domain) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            domain,
            components: Vec::new(),
            requirements: Vec::new(),
            dependencies: Vec::new(),
            due_within_days: None,
        }
    }

    /// Set the number of days within which the design must be produced.
    #[must_use]
    pub const fn with_deadline(mut self, days: u32) -> Self {
        self.due_within_days = Some(days);
        self
    }

    /// Add a component.
    ///
    /// # Errors
    ///
    /// Returns an error if a component with the same identifier exists.
    pub fn add_component(
        &mut self,
        id: impl Into<ComponentId>,
        name: impl Into<String>,
    ) -> Result<(), InputError> {
        let id = id.into();
        if self.component(&id).is_some() {
            return Err(InputError::new(
                format!("component {id}"),
                "duplicate component identifier",
            ));
        }
        self.components.push(Component {
            id,
            name: name.into(),
        });
        Ok(())
    }

    /// Add a requirement to one of the design's components.
    ///
    /// # Errors
    ///
    /// Returns an error if the requirement identifier is already used, the
    /// requirement's component is unknown, its label is empty, or it belongs
    /// to another domain.
    pub fn add_requirement(&mut self, requirement: Requirement) -> Result<(), InputError> {
        let field = format!("requirement {}", requirement.id());
        if requirement.term().is_empty() {
            return Err(InputError::new(field, "label must not be empty"));
        }
        if self.requirement(requirement.id()).is_some() {
            return Err(InputError::new(field, "duplicate requirement identifier"));
        }
        if self.component(requirement.component()).is_none() {
            return Err(InputError::new(
                field,
                format!("unknown component {}", requirement.component()),
            ));
        }
        if requirement.domain() != &self.domain {
            return Err(InputError::new(
                field,
                format!(
                    "domain {} does not match design domain {}",
                    requirement.domain(),
                    self.domain
                ),
            ));
        }
        self.requirements.push(requirement);
        Ok(())
    }

    /// Declare that `dependent` consumes the output of `dependency`.
    ///
    /// Duplicate declarations are ignored. Cycles are not rejected here;
    /// they surface when the assembled supply tree is validated.
    ///
    /// # Errors
    ///
    /// Returns an error if either component is unknown or a component is
    /// declared to depend on itself.
    pub fn add_dependency(
        &mut self,
        dependent: impl Into<ComponentId>,
        dependency: impl Into<ComponentId>,
    ) -> Result<(), InputError> {
        let dependent = dependent.into();
        let dependency = dependency.into();
        for id in [&dependent, &dependency] {
            if self.component(id).is_none() {
                return Err(InputError::new(
                    format!("dependency {dependent} -> {dependency}"),
                    format!("unknown component {id}"),
                ));
            }
        }
        if dependent == dependency {
            return Err(InputError::new(
                format!("dependency {dependent} -> {dependency}"),
                "a component cannot depend on itself",
            ));
        }
        let edge = Dependency {
            dependent,
            dependency,
        };
        if !self.dependencies.contains(&edge) {
            self.dependencies.push(edge);
        }
        Ok(())
    }

    /// The design's identifier.
    #[must_use]
    pub const fn id(&self) -> &DesignId {
        &self.id
    }

    /// The design's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The design's domain.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Components in declaration order.
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Look up a component by identifier.
    #[must_use]
    pub fn component(&self, id: &ComponentId) -> Option<&Component> {
        self.components.iter().find(|component| &component.id == id)
    }

    /// Requirements in declaration order.
    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Look up a requirement by identifier.
    #[must_use]
    pub fn requirement(&self, id: &RequirementId) -> Option<&Requirement> {
        self.requirements
            .iter()
            .find(|requirement| requirement.id() == id)
    }

    /// Declared component dependencies.
    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// The deadline in days, if any.
    #[must_use]
    pub const fn due_within_days(&self) -> Option<u32> {
        self.due_within_days
    }

    /// Components that carry no requirements.
    ///
    /// These are legal (for example, purchased parts) but contribute no
    /// workflow to a supply tree.
    pub fn idle_components(&self) -> impl Iterator<Item = &Component> {
        let used: HashSet<_> = self
            .requirements
            .iter()
            .map(Requirement::component)
            .collect();
        self.components
            .iter()
            .filter(move |component| !used.contains(&component.id))
    }

    /// Fingerprint of the design's content.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        #[derive(BorshSerialize)]
        struct FingerprintData<'a> {
            id: &'a str,
            domain: &'a str,
            components: Vec<&'a str>,
            requirements: Vec<(&'a str, &'a str, &'a str, Option<u32>, Option<u64>)>,
            dependencies: Vec<(&'a str, &'a str)>,
            due_within_days: Option<u32>,
        }

        fingerprint(&FingerprintData {
            id: self.id.as_str(),
            domain: self.domain.as_str(),
            components: self
                .components
                .iter()
                .map(|component| component.id.as_str())
                .collect(),
            requirements: self
                .requirements
                .iter()
                .map(|requirement| {
                    (
                        requirement.id().as_str(),
                        requirement.term().as_str(),
                        requirement.component().as_str(),
                        requirement.quantity(),
                        requirement.tolerance().map(f64::to_bits),
                    )
                })
                .collect(),
            dependencies: self
                .dependencies
                .iter()
                .map(|edge| (edge.dependent.as_str(), edge.dependency.as_str()))
                .collect(),
            due_within_days: self.due_within_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> Domain {
        Domain::new("manufacturing")
    }

    fn design() -> Design {
        let mut design = Design::new("lamp", "Desk lamp", domain());
        design.add_component("base", "Base").unwrap();
        design.add_component("shade", "Shade").unwrap();
        design
    }

    #[test]
    fn requirement_must_reference_known_component() {
        let mut design = design();
        let error = design
            .add_requirement(Requirement::new("r1", "milling", domain(), "arm"))
            .unwrap_err();
        assert!(error.to_string().contains("unknown component arm"));
    }

    #[test]
    fn duplicate_requirement_ids_are_rejected() {
        let mut design = design();
        design
            .add_requirement(Requirement::new("r1", "milling", domain(), "base"))
            .unwrap();
        let error = design
            .add_requirement(Requirement::new("r1", "turning", domain(), "base"))
            .unwrap_err();
        assert!(error.to_string().contains("duplicate requirement identifier"));
    }

    #[test]
    fn requirement_domain_must_match() {
        let mut design = design();
        let error = design
            .add_requirement(Requirement::new(
                "r1",
                "kneading",
                Domain::new("cooking"),
                "base",
            ))
            .unwrap_err();
        assert!(error.to_string().contains("does not match design domain"));
    }

    #[test]
    fn dependencies_are_deduplicated_and_checked() {
        let mut design = design();
        design.add_dependency("shade", "base").unwrap();
        design.add_dependency("shade", "base").unwrap();
        assert_eq!(design.dependencies().len(), 1);

        assert!(design.add_dependency("shade", "shade").is_err());
        assert!(design.add_dependency("shade", "arm").is_err());
    }

    #[test]
    fn idle_components_have_no_requirements() {
        let mut design = design();
        design
            .add_requirement(Requirement::new("r1", "milling", domain(), "base"))
            .unwrap();
        let idle: Vec<_> = design
            .idle_components()
            .map(|component| component.id.as_str())
            .collect();
        assert_eq!(idle, vec!["shade"]);
    }
}
