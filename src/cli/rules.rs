use std::path::PathBuf;

use anyhow::Context;
use supply_tree::{
    rules::{ExportOptions, RuleError, RuleSetDiff, RuleSetDocument},
    Domain,
};
use tracing::instrument;

use super::{terminal::Colorize, Workspace};

#[derive(Debug, clap::Subcommand)]
pub enum Rules {
    /// Validate rule set documents without storing them
    Check(Check),

    /// Show what importing a rule set document would change
    Diff(Diff),

    /// Print a domain's rules as a document
    Export(Export),
}

impl Rules {
    pub fn run(self, workspace: &Workspace) -> anyhow::Result<()> {
        match self {
            Self::Check(command) => command.run(workspace),
            Self::Diff(command) => command.run(workspace),
            Self::Export(command) => command.run(workspace),
        }
    }
}

#[derive(Debug, clap::Parser)]
pub struct Check {
    /// Rule set documents (YAML, JSON or TOML)
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

impl Check {
    #[instrument(skip(workspace))]
    fn run(self, workspace: &Workspace) -> anyhow::Result<()> {
        let store = workspace.rules()?;
        let mut failed = 0;

        for path in &self.files {
            let checked =
                RuleSetDocument::load(path).and_then(|document| store.validate_document(&document));
            match checked {
                Ok(set) => println!(
                    "{} {} ({} {}, {} rules)",
                    "ok".success(),
                    path.display(),
                    set.domain(),
                    set.version(),
                    set.len()
                ),
                Err(error) => {
                    failed += 1;
                    println!("{} {}", "failed".failure(), path.display());
                    for line in failure_lines(&error) {
                        println!("  - {line}");
                    }
                }
            }
        }

        if failed > 0 {
            anyhow::bail!("{failed} of {} documents failed validation", self.files.len());
        }
        Ok(())
    }
}

/// One line per field-level failure, or the error itself.
fn failure_lines(error: &RuleError) -> Vec<String> {
    error.validation_errors().map_or_else(
        || vec![error.to_string()],
        |errors| errors.errors().iter().map(ToString::to_string).collect(),
    )
}

#[derive(Debug, clap::Parser)]
pub struct Diff {
    /// The incoming rule set document
    file: PathBuf,
}

impl Diff {
    #[instrument(skip(workspace))]
    fn run(self, workspace: &Workspace) -> anyhow::Result<()> {
        let diff = self.changes(workspace)?;

        if diff.is_empty() {
            println!("{}", "No changes".dim());
            return Ok(());
        }
        for id in &diff.added {
            println!("{}", format!("+ {id}").success());
        }
        for id in &diff.updated {
            println!("{}", format!("~ {id}").warning());
        }
        for id in &diff.deleted {
            println!("{}", format!("- {id}").failure());
        }
        println!("{}", format!("{} unchanged", diff.unchanged.len()).dim());
        Ok(())
    }

    fn changes(&self, workspace: &Workspace) -> anyhow::Result<RuleSetDiff> {
        let store = workspace.rules()?;
        let document = RuleSetDocument::load(&self.file)?;
        store
            .compare(&document)
            .with_context(|| format!("failed to compare {}", self.file.display()))
    }
}

#[derive(Debug, clap::Parser)]
pub struct Export {
    /// The domain to export
    domain: String,

    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "yaml")]
    format: DocumentFormat,

    /// Attach export time, exporter and fingerprint
    #[arg(long)]
    provenance: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum DocumentFormat {
    #[default]
    Yaml,
    Json,
    Toml,
}

impl Export {
    #[instrument(skip(workspace))]
    fn run(self, workspace: &Workspace) -> anyhow::Result<()> {
        let text = self.render(workspace)?;
        println!("{}", text.trim_end());
        Ok(())
    }

    fn render(&self, workspace: &Workspace) -> anyhow::Result<String> {
        let store = workspace.rules()?;
        let options = ExportOptions {
            provenance: self.provenance,
            ..ExportOptions::default()
        };
        let document = store.export(&Domain::new(&self.domain), &options)?;
        let text = match self.format {
            DocumentFormat::Yaml => document.to_yaml(),
            DocumentFormat::Json => document.to_json(),
            DocumentFormat::Toml => document.to_toml(),
        }
        .map_err(|e: RuleError| anyhow::anyhow!(e))?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;

    const RULES: &str = r#"
_version: "1"
domain: manufacturing
version: 1.0.0
rules:
  - id: cnc-synonym
    capability: CNC machining
    satisfies: [Computer Numerical Control machining]
    confidence: 0.95
  - id: weld
    capability: tig welding
    satisfies: [welding]
    confidence: 0.8
"#;

    /// A workspace whose `rules/` directory holds [`RULES`].
    fn workspace(root: &Path) -> Workspace {
        let rules = root.join("rules");
        std::fs::create_dir_all(&rules).unwrap();
        std::fs::write(rules.join("manufacturing.yaml"), RULES).unwrap();
        Workspace::new(root.join("stree.toml"), vec![rules])
    }

    #[test]
    fn check_run_accepts_a_valid_document() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("good.yaml");
        std::fs::write(&file, RULES).unwrap();

        let check = Check { files: vec![file] };
        check
            .run(&Workspace::new(tmp.path().join("stree.toml"), Vec::new()))
            .expect("check command should succeed");
    }

    #[test]
    fn check_run_fails_and_lists_field_errors() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("bad.yaml");
        std::fs::write(&file, RULES.replace("0.8", "-0.2")).unwrap();

        let check = Check {
            files: vec![file.clone()],
        };
        let error = check
            .run(&Workspace::new(tmp.path().join("stree.toml"), Vec::new()))
            .unwrap_err();
        assert_eq!(error.to_string(), "1 of 1 documents failed validation");

        let failure = RuleSetDocument::load(&file)
            .and_then(RuleSetDocument::into_rule_set)
            .unwrap_err();
        let lines = failure_lines(&failure);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("rule 'weld': confidence:"));
    }

    #[test]
    fn diff_reports_added_updated_and_deleted_rules() {
        let tmp = tempdir().unwrap();
        let workspace = workspace(tmp.path());
        let incoming = tmp.path().join("incoming.yaml");
        std::fs::write(
            &incoming,
            r#"
_version: "1"
domain: manufacturing
version: 1.1.0
rules:
  - id: cnc-synonym
    capability: CNC machining
    satisfies: [Computer Numerical Control machining]
    confidence: 0.9
  - id: laser
    capability: laser cutting
    satisfies: [sheet cutting]
    confidence: 0.85
"#,
        )
        .unwrap();

        let diff = Diff { file: incoming };
        let changes = diff.changes(&workspace).unwrap();
        assert_eq!(changes.added, vec!["laser".to_string()]);
        assert_eq!(changes.updated, vec!["cnc-synonym".to_string()]);
        assert_eq!(changes.deleted, vec!["weld".to_string()]);
        diff.run(&workspace).expect("diff command should succeed");
    }

    #[test]
    fn export_renders_loaded_rules() {
        let tmp = tempdir().unwrap();
        let workspace = workspace(tmp.path());

        let export = Export {
            domain: "Manufacturing".to_string(),
            format: DocumentFormat::Json,
            provenance: true,
        };
        let text = export.render(&workspace).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["domain"], "manufacturing");
        assert_eq!(value["rules"].as_array().unwrap().len(), 2);
        assert!(value["provenance"]["fingerprint"].is_string());

        let yaml = Export {
            domain: "manufacturing".to_string(),
            format: DocumentFormat::Yaml,
            provenance: false,
        };
        let reloaded = RuleSetDocument::from_yaml_str(&yaml.render(&workspace).unwrap()).unwrap();
        assert_eq!(reloaded.rules.len(), 2);
    }

    #[test]
    fn export_of_an_unknown_domain_fails() {
        let tmp = tempdir().unwrap();
        let export = Export {
            domain: "cooking".to_string(),
            format: DocumentFormat::Yaml,
            provenance: false,
        };
        assert!(export.render(&workspace(tmp.path())).is_err());
    }

    #[test]
    fn a_missing_rules_directory_is_an_error() {
        let tmp = tempdir().unwrap();
        let workspace = Workspace::new(tmp.path().join("stree.toml"), vec![tmp.path().join("rulez")]);

        let error = workspace.rules().unwrap_err();
        assert!(format!("{error:#}").contains("rulez"));
    }
}
