use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::domain::Domain;

/// How the heuristic layer chooses between several matching rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePrecedence {
    /// The rule with the highest stored confidence wins.
    #[default]
    HighestConfidence,
    /// Rules read in their declared direction win over mirrored readings of
    /// bidirectional rules; confidence breaks ties.
    DeclaredDirectionFirst,
}

/// How thoroughly supply trees are validated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Coverage, acyclicity and resource-snapshot consistency.
    #[default]
    Minimal,
    /// Everything in minimal mode plus capacity and timeline feasibility.
    Strict,
}

/// Matching thresholds resolved for one domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSettings {
    /// Confidence at or above which the cascade stops.
    pub accept_threshold: f64,
    /// Minimum cosine similarity for a semantic match.
    pub semantic_threshold: f64,
    /// Rule precedence for the heuristic layer.
    pub rule_precedence: RulePrecedence,
}

/// Per-domain overrides of the matching settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainOverrides {
    /// Overrides [`MatchSettings::accept_threshold`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_threshold: Option<f64>,
    /// Overrides [`MatchSettings::semantic_threshold`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_threshold: Option<f64>,
    /// Overrides [`MatchSettings::rule_precedence`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_precedence: Option<RulePrecedence>,
}

/// Configuration for matching and assembly.
///
/// Serialized as a versioned TOML document so the format can evolve without
/// breaking existing files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Versions", into = "Versions")]
pub struct Config {
    defaults: MatchSettings,

    domains: BTreeMap<Domain, DomainOverrides>,

    /// The maximum number of alternative supply trees to assemble.
    pub max_alternatives: usize,

    /// Size of the scoring worker pool. `0` lets rayon decide.
    pub worker_threads: usize,

    /// Whether the reasoning layer is consulted when an oracle is installed.
    pub reasoning_enabled: bool,

    /// Default hard timeout for one reasoning call.
    pub reasoning_timeout: Duration,

    /// Maximum number of reasoning calls in flight during a scoring pass.
    pub reasoning_concurrency: usize,

    /// Validation depth for assembled supply trees.
    pub validation_mode: ValidationMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            defaults: MatchSettings {
                accept_threshold: default_accept_threshold(),
                semantic_threshold: default_semantic_threshold(),
                rule_precedence: RulePrecedence::default(),
            },
            domains: BTreeMap::new(),
            max_alternatives: default_max_alternatives(),
            worker_threads: 0,
            reasoning_enabled: false,
            reasoning_timeout: Duration::from_millis(default_reasoning_timeout_ms()),
            reasoning_concurrency: default_reasoning_concurrency(),
            validation_mode: ValidationMode::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, if the TOML content is
    /// invalid, or if a threshold lies outside `[0, 1]`.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {e}"))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {e}"))?;
        config
            .validate()
            .map_err(|e| format!("Invalid config file: {e}"))?;
        Ok(config)
    }

    /// Saves the configuration to a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized to TOML or if
    /// the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content =
            toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, content).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Checks that every threshold lies in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending setting.
    pub fn validate(&self) -> Result<(), String> {
        check_threshold("accept_threshold", self.defaults.accept_threshold)?;
        check_threshold("semantic_threshold", self.defaults.semantic_threshold)?;
        for (domain, overrides) in &self.domains {
            if let Some(value) = overrides.accept_threshold {
                check_threshold(&format!("domains.{domain}.accept_threshold"), value)?;
            }
            if let Some(value) = overrides.semantic_threshold {
                check_threshold(&format!("domains.{domain}.semantic_threshold"), value)?;
            }
        }
        Ok(())
    }

    /// The matching settings that apply to `domain`.
    #[must_use]
    pub fn settings(&self, domain: &Domain) -> MatchSettings {
        let mut settings = self.defaults;
        if let Some(overrides) = self.domains.get(domain) {
            if let Some(value) = overrides.accept_threshold {
                settings.accept_threshold = value;
            }
            if let Some(value) = overrides.semantic_threshold {
                settings.semantic_threshold = value;
            }
            if let Some(value) = overrides.rule_precedence {
                settings.rule_precedence = value;
            }
        }
        settings
    }

    /// Sets the default acceptance threshold.
    pub const fn set_accept_threshold(&mut self, value: f64) {
        self.defaults.accept_threshold = value;
    }

    /// Sets the default semantic similarity threshold.
    pub const fn set_semantic_threshold(&mut self, value: f64) {
        self.defaults.semantic_threshold = value;
    }

    /// Sets the default rule precedence.
    pub const fn set_rule_precedence(&mut self, value: RulePrecedence) {
        self.defaults.rule_precedence = value;
    }

    /// Replaces the overrides for one domain.
    ///
    /// Returns the previous overrides, if any.
    pub fn set_domain_overrides(
        &mut self,
        domain: Domain,
        overrides: DomainOverrides,
    ) -> Option<DomainOverrides> {
        self.domains.insert(domain, overrides)
    }
}

fn check_threshold(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{name} must lie in [0, 1], got {value}"))
    }
}

const fn default_accept_threshold() -> f64 {
    0.7
}

const fn default_semantic_threshold() -> f64 {
    0.75
}

const fn default_max_alternatives() -> usize {
    3
}

const fn default_reasoning_timeout_ms() -> u64 {
    5_000
}

const fn default_reasoning_concurrency() -> usize {
    4
}

/// The serialized versions of the configuration.
/// This allows for future changes to the configuration format and to the domain
/// type without breaking compatibility.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum Versions {
    #[serde(rename = "1")]
    V1 {
        #[serde(default = "default_accept_threshold")]
        accept_threshold: f64,

        #[serde(default = "default_semantic_threshold")]
        semantic_threshold: f64,

        #[serde(default)]
        rule_precedence: RulePrecedence,

        #[serde(default = "default_max_alternatives")]
        max_alternatives: usize,

        #[serde(default)]
        worker_threads: usize,

        #[serde(default)]
        reasoning_enabled: bool,

        /// Timeout for one reasoning call, in milliseconds.
        #[serde(default = "default_reasoning_timeout_ms")]
        reasoning_timeout_ms: u64,

        #[serde(default = "default_reasoning_concurrency")]
        reasoning_concurrency: usize,

        #[serde(default)]
        validation_mode: ValidationMode,

        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        domains: BTreeMap<Domain, DomainOverrides>,
    },
}

impl From<Versions> for Config {
    fn from(versions: Versions) -> Self {
        match versions {
            Versions::V1 {
                accept_threshold,
                semantic_threshold,
                rule_precedence,
                max_alternatives,
                worker_threads,
                reasoning_enabled,
                reasoning_timeout_ms,
                reasoning_concurrency,
                validation_mode,
                domains,
            } => Self {
                defaults: MatchSettings {
                    accept_threshold,
                    semantic_threshold,
                    rule_precedence,
                },
                domains,
                max_alternatives,
                worker_threads,
                reasoning_enabled,
                reasoning_timeout: Duration::from_millis(reasoning_timeout_ms),
                reasoning_concurrency,
                validation_mode,
            },
        }
    }
}

impl From<Config> for Versions {
    fn from(config: Config) -> Self {
        Self::V1 {
            accept_threshold: config.defaults.accept_threshold,
            semantic_threshold: config.defaults.semantic_threshold,
            rule_precedence: config.defaults.rule_precedence,
            max_alternatives: config.max_alternatives,
            worker_threads: config.worker_threads,
            reasoning_enabled: config.reasoning_enabled,
            reasoning_timeout_ms: u64::try_from(config.reasoning_timeout.as_millis())
                .unwrap_or(u64::MAX),
            reasoning_concurrency: config.reasoning_concurrency,
            validation_mode: config.validation_mode,
            domains: config.domains,
        }
    }
}
