use std::{
    collections::BTreeMap,
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use semver::Version;
use serde::Serialize;
use tracing::instrument;
use walkdir::WalkDir;

use super::{CapabilityRule, ExportProvenance, RuleError, RuleRecord, RuleSet, RuleSetDocument};
use crate::domain::Domain;

/// How an imported document combines with the stored rule set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// The document becomes the domain's rule set.
    #[default]
    Replace,
    /// Incoming rules are added or overwrite rules with the same id; other
    /// stored rules are kept.
    Merge,
}

/// Options for [`RuleStore::export`].
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Attach export metadata to the document.
    pub provenance: bool,
    /// Recorded as the exporter when `provenance` is set.
    pub exporter: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            provenance: false,
            exporter: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// Rule-level differences between two rule sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSetDiff {
    /// Present only in the incoming set.
    pub added: Vec<String>,
    /// Present in both with different content.
    pub updated: Vec<String>,
    /// Present only in the stored set.
    pub deleted: Vec<String>,
    /// Present in both with identical content.
    pub unchanged: Vec<String>,
}

impl RuleSetDiff {
    fn between(current: &RuleSet, next: &RuleSet) -> Self {
        let mut diff = Self::default();
        for rule in next.rules() {
            match current.rule(rule.id()) {
                None => diff.added.push(rule.id().to_string()),
                Some(existing) if existing == rule => diff.unchanged.push(rule.id().to_string()),
                Some(_) => diff.updated.push(rule.id().to_string()),
            }
        }
        diff.deleted = current
            .ids()
            .filter(|id| next.rule(id).is_none())
            .map(str::to_string)
            .collect();
        diff
    }

    /// Whether the two sets hold identical rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// The outcome of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// The domain that was written.
    pub domain: Domain,
    /// How the document was combined with the stored rules.
    pub mode: ImportMode,
    /// The version of the resulting rule set.
    pub version: Version,
    /// What changed.
    pub changes: RuleSetDiff,
}

#[derive(Debug)]
struct DomainSlot {
    writer: Mutex<()>,
    current: RwLock<Arc<RuleSet>>,
}

impl DomainSlot {
    fn new(set: RuleSet) -> Self {
        Self {
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(set)),
        }
    }

    fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.read())
    }
}

/// Owns one [`RuleSet`] per domain.
///
/// Readers take an immutable snapshot with [`RuleStore::active`] and keep it
/// for as long as they need; mutations never disturb a snapshot that is in
/// use. Every mutation is applied to a copy, the whole copy is re-validated,
/// and only then is it published. A failed mutation leaves the stored state
/// untouched.
///
/// Each domain admits one writer at a time. A second writer gets
/// [`RuleError::Conflict`] rather than waiting.
#[derive(Debug, Default)]
pub struct RuleStore {
    slots: RwLock<BTreeMap<Domain, Arc<DomainSlot>>>,
    defaults: BTreeMap<Domain, Arc<RuleSet>>,
}

impl RuleStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with `sets`, which [`RuleStore::reset`] restores.
    #[must_use]
    pub fn with_defaults(sets: impl IntoIterator<Item = RuleSet>) -> Self {
        let defaults: BTreeMap<_, _> = sets
            .into_iter()
            .map(|set| (set.domain().clone(), Arc::new(set)))
            .collect();
        let slots = defaults
            .iter()
            .map(|(domain, set)| (domain.clone(), Arc::new(DomainSlot::new(RuleSet::clone(set)))))
            .collect();
        Self {
            slots: RwLock::new(slots),
            defaults,
        }
    }

    /// Domains that hold rules or a non-initial version.
    #[must_use]
    pub fn domains(&self) -> Vec<Domain> {
        let initial = Version::new(0, 0, 0);
        self.slots
            .read()
            .iter()
            .filter(|(_, slot)| {
                let set = slot.snapshot();
                !set.is_empty() || set.version() != &initial
            })
            .map(|(domain, _)| domain.clone())
            .collect()
    }

    /// The rule set readers should use for `domain`.
    ///
    /// A domain without rules yields an empty set.
    #[must_use]
    pub fn active(&self, domain: &Domain) -> Arc<RuleSet> {
        self.slot(domain)
            .map_or_else(|| Arc::new(RuleSet::empty(domain.clone())), |slot| slot.snapshot())
    }

    /// Fetch one rule.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::NotFound`] if the domain has no such rule.
    pub fn get_rule(&self, domain: &Domain, id: &str) -> Result<CapabilityRule, RuleError> {
        self.active(domain)
            .rule(id)
            .cloned()
            .ok_or_else(|| RuleError::NotFound {
                domain: domain.clone(),
                id: id.to_string(),
            })
    }

    /// Add a new rule.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Conflict`] if a rule with the same id exists, the
    /// rule belongs to another domain, or another writer holds the domain.
    #[instrument(skip(self, rule), fields(rule = rule.id()))]
    pub fn create_rule(&self, domain: &Domain, rule: CapabilityRule) -> Result<Version, RuleError> {
        check_rule_domain(domain, &rule)?;
        let next = self.mutate(domain, true, |current| {
            if current.rule(rule.id()).is_some() {
                return Err(RuleError::Conflict {
                    domain: domain.clone(),
                    reason: format!("rule '{}' already exists", rule.id()),
                });
            }
            let version = current.next_patch();
            Ok(current.with_rule(rule).with_version(version))
        })?;
        Ok(next.version().clone())
    }

    /// Replace the rule `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::NotFound`] if the rule does not exist and
    /// [`RuleError::Conflict`] if the replacement carries a different id or
    /// domain, or another writer holds the domain.
    #[instrument(skip(self, rule))]
    pub fn update_rule(
        &self,
        domain: &Domain,
        id: &str,
        rule: CapabilityRule,
    ) -> Result<Version, RuleError> {
        check_rule_domain(domain, &rule)?;
        if rule.id() != id {
            return Err(RuleError::Conflict {
                domain: domain.clone(),
                reason: format!("cannot update rule '{id}' with a rule named '{}'", rule.id()),
            });
        }
        let next = self.mutate(domain, false, |current| {
            if current.rule(id).is_none() {
                return Err(not_found(domain, id));
            }
            let version = current.next_patch();
            Ok(current.with_rule(rule).with_version(version))
        })?;
        Ok(next.version().clone())
    }

    /// Remove the rule `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::NotFound`] if the rule does not exist.
    #[instrument(skip(self))]
    pub fn delete_rule(&self, domain: &Domain, id: &str) -> Result<Version, RuleError> {
        let next = self.mutate(domain, false, |current| {
            if current.rule(id).is_none() {
                return Err(not_found(domain, id));
            }
            let version = current.next_patch();
            Ok(current.without_rule(id).with_version(version))
        })?;
        Ok(next.version().clone())
    }

    /// Import a document.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::MalformedInput`] or [`RuleError::ValidationFailed`]
    /// if the document is invalid, and [`RuleError::Conflict`] if another
    /// writer holds the domain. Nothing is changed on failure.
    #[instrument(skip(self, document), fields(domain = %document.domain))]
    pub fn import(
        &self,
        document: RuleSetDocument,
        mode: ImportMode,
    ) -> Result<ImportSummary, RuleError> {
        let incoming = document.into_rule_set()?;
        let domain = incoming.domain().clone();

        let mut changes = RuleSetDiff::default();
        let next = self.mutate(&domain, true, |current| {
            let next = match mode {
                ImportMode::Replace => incoming,
                ImportMode::Merge => {
                    let version = incoming.version().max(&current.next_patch()).clone();
                    current.merged_with(&incoming).with_version(version)
                }
            };
            changes = RuleSetDiff::between(current, &next);
            Ok(next)
        })?;

        let summary = ImportSummary {
            domain,
            mode,
            version: next.version().clone(),
            changes,
        };
        tracing::info!(
            version = %summary.version,
            added = summary.changes.added.len(),
            updated = summary.changes.updated.len(),
            deleted = summary.changes.deleted.len(),
            "Imported rules"
        );
        Ok(summary)
    }

    /// Serialize the domain's rule set.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::UnknownDomain`] if the domain was never written.
    pub fn export(
        &self,
        domain: &Domain,
        options: &ExportOptions,
    ) -> Result<RuleSetDocument, RuleError> {
        let set = self
            .slot(domain)
            .map(|slot| slot.snapshot())
            .ok_or_else(|| RuleError::UnknownDomain(domain.clone()))?;
        let mut document = RuleSetDocument::from(set.as_ref());
        if options.provenance {
            document.provenance = Some(ExportProvenance {
                exported_at: Utc::now(),
                exporter: options.exporter.clone(),
                fingerprint: set.fingerprint(),
            });
        }
        Ok(document)
    }

    /// Check a document without storing it.
    ///
    /// # Errors
    ///
    /// Returns the same errors an import would, apart from conflicts.
    pub fn validate_document(&self, document: &RuleSetDocument) -> Result<RuleSet, RuleError> {
        document.clone().into_rule_set()
    }

    /// Check a single rule record against a domain without storing it.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ValidationFailed`] listing every failure.
    pub fn validate_rule(
        &self,
        record: &RuleRecord,
        domain: &Domain,
    ) -> Result<CapabilityRule, RuleError> {
        CapabilityRule::from_record(record.clone(), domain)
            .map_err(|errors| RuleError::ValidationFailed(super::ValidationErrors(errors)))
    }

    /// What a replace import of `document` would change.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is invalid.
    pub fn compare(&self, document: &RuleSetDocument) -> Result<RuleSetDiff, RuleError> {
        let incoming = self.validate_document(document)?;
        let current = self.active(incoming.domain());
        Ok(RuleSetDiff::between(&current, &incoming))
    }

    /// Restore the domain's seeded rules, or empty it if it was not seeded.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::UnknownDomain`] if the domain was never written
    /// and has no seeded rules.
    #[instrument(skip(self))]
    pub fn reset(&self, domain: &Domain) -> Result<Version, RuleError> {
        let seeded = self.defaults.get(domain).cloned();
        let next = self.mutate(domain, seeded.is_some(), |_| {
            Ok(seeded.map_or_else(|| RuleSet::empty(domain.clone()), |set| RuleSet::clone(&set)))
        })?;
        Ok(next.version().clone())
    }

    /// Import every rule-set document under `root`.
    ///
    /// Files are visited in path order. The first document for a domain
    /// replaces its rules; later ones are merged in. All files are parsed
    /// and validated before anything is stored.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::MalformedInput`] if `root` cannot be walked, and
    /// otherwise the first parse or validation failure wrapped in
    /// [`RuleError::InFile`].
    #[instrument(skip(self))]
    pub fn load_dir(&self, root: &Path) -> Result<Vec<ImportSummary>, RuleError> {
        let mut documents = Vec::new();
        for path in collect_rule_paths(root)? {
            let in_file = |source| RuleError::InFile {
                path: path.clone(),
                source: Box::new(source),
            };
            let document = RuleSetDocument::load(&path).map_err(in_file)?;
            document.clone().into_rule_set().map_err(in_file)?;
            tracing::debug!("Loaded rule set from {}", path.display());
            documents.push(document);
        }

        let mut seen = std::collections::BTreeSet::new();
        documents
            .into_iter()
            .map(|document| {
                let mode = if seen.insert(document.domain()) {
                    ImportMode::Replace
                } else {
                    ImportMode::Merge
                };
                self.import(document, mode)
            })
            .collect()
    }

    fn slot(&self, domain: &Domain) -> Option<Arc<DomainSlot>> {
        self.slots.read().get(domain).cloned()
    }

    fn slot_or_insert(&self, domain: &Domain) -> Arc<DomainSlot> {
        if let Some(slot) = self.slot(domain) {
            return slot;
        }
        Arc::clone(
            self.slots
                .write()
                .entry(domain.clone())
                .or_insert_with(|| Arc::new(DomainSlot::new(RuleSet::empty(domain.clone())))),
        )
    }

    fn mutate<F>(&self, domain: &Domain, create: bool, change: F) -> Result<Arc<RuleSet>, RuleError>
    where
        F: FnOnce(&RuleSet) -> Result<RuleSet, RuleError>,
    {
        let slot = if create {
            self.slot_or_insert(domain)
        } else {
            self.slot(domain)
                .ok_or_else(|| RuleError::UnknownDomain(domain.clone()))?
        };

        let _writer = slot.writer.try_lock().ok_or_else(|| RuleError::Conflict {
            domain: domain.clone(),
            reason: "another writer is modifying this domain".to_string(),
        })?;

        let current = slot.snapshot();
        let next = change(&current)?;
        next.validate()?;
        if next.domain() != domain {
            return Err(RuleError::Conflict {
                domain: domain.clone(),
                reason: format!("rule set belongs to domain '{}'", next.domain()),
            });
        }

        let next = Arc::new(next);
        *slot.current.write() = Arc::clone(&next);
        tracing::debug!(version = %next.version(), rules = next.len(), "Published rule set");
        Ok(next)
    }
}

fn check_rule_domain(domain: &Domain, rule: &CapabilityRule) -> Result<(), RuleError> {
    if rule.domain() == domain {
        Ok(())
    } else {
        Err(RuleError::Conflict {
            domain: domain.clone(),
            reason: format!("rule '{}' belongs to domain '{}'", rule.id(), rule.domain()),
        })
    }
}

fn not_found(domain: &Domain, id: &str) -> RuleError {
    RuleError::NotFound {
        domain: domain.clone(),
        id: id.to_string(),
    }
}

fn collect_rule_paths(root: &Path) -> Result<Vec<PathBuf>, RuleError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            RuleError::MalformedInput(format!("failed to read {}: {e}", root.display()))
        })?;
        let is_rule_file = entry
            .path()
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| matches!(ext, "yaml" | "yml" | "json" | "toml"));
        if entry.file_type().is_file() && is_rule_file {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}
