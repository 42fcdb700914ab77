use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    domain::{Capability, Design, Domain, Facility, Requirement},
    error::InputError,
};

/// A requirement as written in a design manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequirementManifest {
    /// Defaults to `<component>-<n>`, counting from 1 within the component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The capability needed, in free text.
    pub label: String,
    /// A classification shared with capabilities, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ontology: Option<String>,
    /// Free-text detail used by the semantic layer.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Units of work needed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    /// The coarsest acceptable tolerance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
}

/// A design component and the requirements it places.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentManifest {
    /// Unique identifier.
    pub id: String,
    /// Defaults to the identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Requirements in design order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<RequirementManifest>,
    /// Components whose output this one consumes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// A design as written on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesignManifest {
    /// Unique identifier.
    pub id: String,
    /// Defaults to the identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Must match the plug-in's domain when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    /// Deadline checked by strict validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_within_days: Option<u32>,
    /// Components in design order.
    pub components: Vec<ComponentManifest>,
}

impl DesignManifest {
    /// The domain named by the manifest, if any.
    #[must_use]
    pub const fn domain(&self) -> Option<&Domain> {
        self.domain.as_ref()
    }

    /// Build a design in `domain`.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] if the manifest names another domain, an
    /// identifier is empty or reused, a label is empty, or a dependency
    /// refers to an unknown component.
    pub fn to_design(&self, domain: &Domain) -> Result<Design, InputError> {
        check_domain(self.domain.as_ref(), domain)?;
        non_empty("design.id", &self.id)?;

        let name = if self.name.is_empty() { &self.id } else { &self.name };
        let mut design = Design::new(self.id.as_str(), name.as_str(), domain.clone());
        if let Some(days) = self.due_within_days {
            design = design.with_deadline(days);
        }

        for component in &self.components {
            non_empty("component.id", &component.id)?;
            let name = if component.name.is_empty() {
                &component.id
            } else {
                &component.name
            };
            design.add_component(component.id.as_str(), name.as_str())?;
        }

        for component in &self.components {
            for (index, manifest) in component.requirements.iter().enumerate() {
                let id = manifest
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("{}-{}", component.id, index + 1));
                let mut requirement = Requirement::new(
                    id,
                    manifest.label.as_str(),
                    domain.clone(),
                    component.id.as_str(),
                );
                if let Some(ontology) = &manifest.ontology {
                    requirement = requirement.with_ontology(ontology.as_str());
                }
                if !manifest.description.is_empty() {
                    requirement = requirement.with_description(manifest.description.as_str());
                }
                if let Some(quantity) = manifest.quantity {
                    requirement = requirement.with_quantity(quantity);
                }
                if let Some(tolerance) = manifest.tolerance {
                    requirement = requirement.with_tolerance(tolerance);
                }
                design.add_requirement(requirement)?;
            }
        }

        for component in &self.components {
            for dependency in &component.depends_on {
                design.add_dependency(component.id.as_str(), dependency.as_str())?;
            }
        }

        Ok(design)
    }
}

/// A capability as written in a facility manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CapabilityManifest {
    /// Defaults to `cap-<n>`, counting from 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// What the facility can do, in free text.
    pub label: String,
    /// A classification shared with requirements, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ontology: Option<String>,
    /// Free-text detail used by the semantic layer.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// The finest tolerance the facility holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    /// Days one step with this capability takes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_time_days: Option<u32>,
}

/// A facility as written on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FacilityManifest {
    /// Unique identifier.
    pub id: String,
    /// Defaults to the identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Must match the plug-in's domain when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    /// Units the facility can take on in one plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    /// Capabilities on offer.
    pub capabilities: Vec<CapabilityManifest>,
}

impl FacilityManifest {
    /// The domain named by the manifest, if any.
    #[must_use]
    pub const fn domain(&self) -> Option<&Domain> {
        self.domain.as_ref()
    }

    /// Build a facility in `domain`.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] if the manifest names another domain, the
    /// identifier or a capability label is empty, or a capability
    /// identifier is reused.
    pub fn to_facility(&self, domain: &Domain) -> Result<Facility, InputError> {
        check_domain(self.domain.as_ref(), domain)?;
        non_empty("facility.id", &self.id)?;

        let name = if self.name.is_empty() { &self.id } else { &self.name };
        let mut facility = Facility::new(self.id.as_str(), name.as_str(), domain.clone());
        if let Some(capacity) = self.capacity {
            facility = facility.with_capacity(capacity);
        }

        for (index, manifest) in self.capabilities.iter().enumerate() {
            non_empty(&format!("facility {}: capability label", self.id), &manifest.label)?;
            let id = manifest
                .id
                .clone()
                .unwrap_or_else(|| format!("cap-{}", index + 1));
            let mut capability =
                Capability::new(id, self.id.as_str(), manifest.label.as_str(), domain.clone());
            if let Some(ontology) = &manifest.ontology {
                capability = capability.with_ontology(ontology.as_str());
            }
            if !manifest.description.is_empty() {
                capability = capability.with_description(manifest.description.as_str());
            }
            if let Some(tolerance) = manifest.tolerance {
                capability = capability.with_tolerance(tolerance);
            }
            if let Some(days) = manifest.lead_time_days {
                capability = capability.with_lead_time(days);
            }
            facility = facility.with(capability)?;
        }

        Ok(facility)
    }
}

/// Read a manifest, or a list of manifests, from a YAML or JSON file.
///
/// The format is chosen by extension; anything other than `.json` is read
/// as YAML.
///
/// # Errors
///
/// Returns an [`InputError`] for the path if the file cannot be read or
/// parsed.
pub fn read_manifest<T: DeserializeOwned>(path: &Path) -> Result<T, InputError> {
    let field = path.display().to_string();
    let text = std::fs::read_to_string(path)
        .map_err(|e| InputError::new(field.as_str(), format!("failed to read: {e}")))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&text).map_err(|e| InputError::new(field, e.to_string()))
    } else {
        serde_yaml::from_str(&text).map_err(|e| InputError::new(field, e.to_string()))
    }
}

fn check_domain(declared: Option<&Domain>, expected: &Domain) -> Result<(), InputError> {
    match declared {
        Some(declared) if declared != expected => Err(InputError::new(
            "domain",
            format!("manifest is for {declared}, expected {expected}"),
        )),
        _ => Ok(()),
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), InputError> {
    if value.trim().is_empty() {
        Err(InputError::new(field, "must not be empty"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::domain::{ComponentId, RequirementId};

    const DESIGN: &str = r"
id: bracket
domain: Manufacturing
due_within_days: 10
components:
  - id: frame
    requirements:
      - label: laser cutting
        quantity: 2
      - id: weld
        label: tig welding
        tolerance: 0.1
    depends_on: [panel]
  - id: panel
    name: Side panel
    requirements:
      - label: powder coating
";

    fn manufacturing() -> Domain {
        Domain::new("manufacturing")
    }

    #[test]
    fn design_manifest_builds_a_design() {
        let manifest: DesignManifest = serde_yaml::from_str(DESIGN).unwrap();
        let design = manifest.to_design(&manufacturing()).unwrap();

        assert_eq!(design.name(), "bracket");
        assert_eq!(design.due_within_days(), Some(10));
        let ids: Vec<_> = design.requirements().iter().map(|r| r.id().as_str()).collect();
        assert_eq!(ids, vec!["frame-1", "weld", "panel-1"]);
        assert_eq!(
            design.requirement(&RequirementId::from("frame-1")).unwrap().quantity(),
            Some(2)
        );
        assert_eq!(
            design.component(&ComponentId::from("panel")).unwrap().name,
            "Side panel"
        );
        assert_eq!(design.dependencies().len(), 1);
    }

    #[test]
    fn foreign_domain_is_rejected() {
        let manifest: DesignManifest = serde_yaml::from_str(DESIGN).unwrap();
        let error = manifest.to_design(&Domain::new("cooking")).unwrap_err();
        assert_eq!(error.field(), "domain");
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut manifest: DesignManifest = serde_yaml::from_str(DESIGN).unwrap();
        manifest.components[0].depends_on.push("lid".to_string());
        assert!(manifest.to_design(&manufacturing()).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<FacilityManifest, _> =
            serde_yaml::from_str("id: x\ncapabilities: []\ncolour: red\n");
        assert!(result.is_err());
    }

    #[test]
    fn facility_manifest_assigns_capability_ids() {
        let manifest: FacilityManifest = serde_json::from_str(
            r#"{
                "id": "x",
                "capacity": 5,
                "capabilities": [
                    {"label": "laser cutting", "lead_time_days": 2},
                    {"id": "weld", "label": "tig welding", "tolerance": 0.05}
                ]
            }"#,
        )
        .unwrap();
        let facility = manifest.to_facility(&manufacturing()).unwrap();

        assert_eq!(facility.name(), "x");
        assert_eq!(facility.capacity(), Some(5));
        let ids: Vec<_> = facility
            .capabilities()
            .iter()
            .map(|c| c.id().as_str())
            .collect();
        assert_eq!(ids, vec!["cap-1", "weld"]);
        assert_eq!(facility.capabilities()[0].lead_time_days(), Some(2));
    }

    #[test]
    fn empty_capability_label_is_rejected() {
        let manifest: FacilityManifest =
            serde_yaml::from_str("id: x\ncapabilities:\n  - label: ' '\n").unwrap();
        assert!(manifest.to_facility(&manufacturing()).is_err());
    }

    #[test]
    fn read_manifest_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml = dir.path().join("facilities.yaml");
        std::fs::write(&yaml, "- id: x\n  capabilities: []\n- id: y\n  capabilities: []\n")
            .unwrap();
        let list: Vec<FacilityManifest> = read_manifest(&yaml).unwrap();
        assert_eq!(list.len(), 2);

        let json = dir.path().join("design.json");
        let mut file = std::fs::File::create(&json).unwrap();
        write!(file, r#"{{"id": "d", "components": []}}"#).unwrap();
        let design: DesignManifest = read_manifest(&json).unwrap();
        assert_eq!(design.id, "d");

        let error = read_manifest::<DesignManifest>(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(error.field().ends_with("missing.yaml"));
    }
}
