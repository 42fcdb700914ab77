use std::{collections::BTreeSet, path::Path};

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use super::{CapabilityRule, Direction, FieldError, Provenance, RuleError, RuleSet, ValidationErrors};
use crate::domain::Domain;

/// The serialized form of a single rule.
///
/// Records are unvalidated; they become [`CapabilityRule`]s when imported
/// into a rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    /// Unique identifier within the rule set.
    pub id: String,
    /// The capability term.
    pub capability: String,
    /// The requirement terms the capability satisfies.
    pub satisfies: Vec<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Which way the rule may be read.
    #[serde(default)]
    pub direction: Direction,
    /// The domain the rule claims to belong to. Defaults to the set's domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Where the rule came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Arbitrary tags.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

/// Metadata attached to an exported document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportProvenance {
    /// When the document was exported.
    pub exported_at: DateTime<Utc>,
    /// Who or what exported it.
    pub exporter: String,
    /// Fingerprint of the rule set at export time.
    pub fingerprint: String,
}

/// The interchange form of a [`RuleSet`].
///
/// Documents carry a `_version` tag so the format can evolve. They are read
/// from YAML, JSON or TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Versions", into = "Versions")]
pub struct RuleSetDocument {
    /// The domain the rules belong to.
    pub domain: String,
    /// Semantic version string.
    pub version: String,
    /// Human-readable description.
    pub description: String,
    /// The rules.
    pub rules: Vec<RuleRecord>,
    /// Export metadata, if requested.
    pub provenance: Option<ExportProvenance>,
}

impl RuleSetDocument {
    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::MalformedInput`] if the text cannot be parsed.
    pub fn from_yaml_str(text: &str) -> Result<Self, RuleError> {
        serde_yaml::from_str(text).map_err(|e| RuleError::MalformedInput(e.to_string()))
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::MalformedInput`] if the text cannot be parsed.
    pub fn from_json_str(text: &str) -> Result<Self, RuleError> {
        serde_json::from_str(text).map_err(|e| RuleError::MalformedInput(e.to_string()))
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::MalformedInput`] if the text cannot be parsed.
    pub fn from_toml_str(text: &str) -> Result<Self, RuleError> {
        toml::from_str(text).map_err(|e| RuleError::MalformedInput(e.to_string()))
    }

    /// Read a document from disk, choosing the format by extension.
    ///
    /// Files without a recognised extension are parsed as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::MalformedInput`] naming the path if the file
    /// cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, RuleError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RuleError::MalformedInput(format!("failed to read {}: {e}", path.display()))
        })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let parsed = match extension.as_deref() {
            Some("json") => Self::from_json_str(&text),
            Some("toml") => Self::from_toml_str(&text),
            _ => Self::from_yaml_str(&text),
        };
        parsed.map_err(|e| match e {
            RuleError::MalformedInput(message) => {
                RuleError::MalformedInput(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// Serialize as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::MalformedInput`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String, RuleError> {
        serde_yaml::to_string(self).map_err(|e| RuleError::MalformedInput(e.to_string()))
    }

    /// Serialize as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::MalformedInput`] if serialization fails.
    pub fn to_json(&self) -> Result<String, RuleError> {
        serde_json::to_string_pretty(self).map_err(|e| RuleError::MalformedInput(e.to_string()))
    }

    /// Serialize as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::MalformedInput`] if serialization fails.
    pub fn to_toml(&self) -> Result<String, RuleError> {
        toml::to_string_pretty(self).map_err(|e| RuleError::MalformedInput(e.to_string()))
    }

    /// The domain named by the document.
    #[must_use]
    pub fn domain(&self) -> Domain {
        Domain::new(&self.domain)
    }

    /// Validate the document and build the rule set it describes.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::MalformedInput`] for an unparseable version or an
    /// empty domain, and [`RuleError::ValidationFailed`] listing every
    /// rule-level failure.
    pub fn into_rule_set(self) -> Result<RuleSet, RuleError> {
        let domain = self.domain();
        if domain.as_str().is_empty() {
            return Err(RuleError::MalformedInput(
                "rule set domain must not be empty".to_string(),
            ));
        }
        let version = Version::parse(self.version.trim()).map_err(|e| {
            RuleError::MalformedInput(format!("invalid version '{}': {e}", self.version))
        })?;

        let mut errors = Vec::new();
        let mut rules = Vec::with_capacity(self.rules.len());
        let mut seen = BTreeSet::new();
        for record in self.rules {
            let id = record.id.trim().to_string();
            if !id.is_empty() && !seen.insert(id.clone()) {
                errors.push(FieldError::rule(id, "id", "duplicate rule identifier"));
                continue;
            }
            match CapabilityRule::from_record(record, &domain) {
                Ok(rule) => rules.push(rule),
                Err(failures) => errors.extend(failures),
            }
        }
        ValidationErrors::from_vec(errors)?;

        Ok(RuleSet::new(domain, version, self.description, rules)?)
    }
}

impl From<&RuleSet> for RuleSetDocument {
    fn from(set: &RuleSet) -> Self {
        Self {
            domain: set.domain().to_string(),
            version: set.version().to_string(),
            description: set.description().to_string(),
            rules: set.rules().map(CapabilityRule::to_record).collect(),
            provenance: None,
        }
    }
}

/// The serialized versions of a rule-set document.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum Versions {
    #[serde(rename = "1")]
    V1 {
        domain: String,

        version: String,

        #[serde(default, skip_serializing_if = "String::is_empty")]
        description: String,

        #[serde(default)]
        rules: Vec<RuleRecord>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        provenance: Option<ExportProvenance>,
    },
}

impl From<Versions> for RuleSetDocument {
    fn from(versions: Versions) -> Self {
        match versions {
            Versions::V1 {
                domain,
                version,
                description,
                rules,
                provenance,
            } => Self {
                domain,
                version,
                description,
                rules,
                provenance,
            },
        }
    }
}

impl From<RuleSetDocument> for Versions {
    fn from(document: RuleSetDocument) -> Self {
        Self::V1 {
            domain: document.domain,
            version: document.version,
            description: document.description,
            rules: document.rules,
            provenance: document.provenance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
_version: "1"
domain: manufacturing
version: 1.2.0
description: machining synonyms
rules:
  - id: cnc-synonym
    capability: CNC machining
    satisfies: [Computer Numerical Control machining]
    confidence: 0.95
  - id: print
    capability: 3d printing
    satisfies: [additive manufacturing]
    confidence: 0.9
    direction: forward
    tags: [additive]
"#;

    #[test]
    fn parses_yaml() {
        let document = RuleSetDocument::from_yaml_str(YAML).unwrap();
        assert_eq!(document.domain, "manufacturing");
        assert_eq!(document.rules.len(), 2);
        assert_eq!(document.rules[0].direction, Direction::Bidirectional);
        assert_eq!(document.rules[1].direction, Direction::Forward);

        let set = document.into_rule_set().unwrap();
        assert_eq!(set.version(), &Version::new(1, 2, 0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn unknown_direction_is_malformed() {
        let text = YAML.replace("direction: forward", "direction: sideways");
        let error = RuleSetDocument::from_yaml_str(&text).unwrap_err();
        assert!(matches!(error, RuleError::MalformedInput(_)));
    }

    #[test]
    fn missing_version_tag_is_malformed() {
        let text = YAML.replace("_version: \"1\"\n", "");
        assert!(matches!(
            RuleSetDocument::from_yaml_str(&text),
            Err(RuleError::MalformedInput(_))
        ));
    }

    #[test]
    fn bad_semver_is_malformed() {
        let mut document = RuleSetDocument::from_yaml_str(YAML).unwrap();
        document.version = "one".to_string();
        assert!(matches!(
            document.into_rule_set(),
            Err(RuleError::MalformedInput(_))
        ));
    }

    #[test]
    fn negative_confidence_names_rule_and_field() {
        let text = YAML.replace("confidence: 0.9\n", "confidence: -0.2\n");
        let error = RuleSetDocument::from_yaml_str(&text)
            .unwrap()
            .into_rule_set()
            .unwrap_err();
        let errors = error.validation_errors().unwrap();
        assert!(errors.mentions("print", "confidence"));
    }

    #[test]
    fn duplicate_ids_are_reported() {
        let text = YAML.replace("id: print", "id: cnc-synonym");
        let error = RuleSetDocument::from_yaml_str(&text)
            .unwrap()
            .into_rule_set()
            .unwrap_err();
        assert!(error.validation_errors().unwrap().mentions("cnc-synonym", "id"));
    }

    #[test]
    fn formats_agree() {
        let document = RuleSetDocument::from_yaml_str(YAML).unwrap();
        let from_json = RuleSetDocument::from_json_str(&document.to_json().unwrap()).unwrap();
        let from_toml = RuleSetDocument::from_toml_str(&document.to_toml().unwrap()).unwrap();
        assert_eq!(from_json, document);
        assert_eq!(from_toml, document);
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let document = RuleSetDocument::from_yaml_str(YAML).unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, document.to_json().unwrap()).unwrap();

        assert_eq!(RuleSetDocument::load(&path).unwrap(), document);
    }
}
