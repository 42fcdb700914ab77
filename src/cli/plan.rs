use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use supply_tree::{
    domain::{Domain, ValidationMode},
    plugin::{read_manifest, DesignManifest, FacilityManifest},
    supply_tree::ValidationState,
    Facility, LayeredMatcher, PlanOptions, PlanOutcome, Planner, SupplyTree,
};
use tracing::instrument;

use super::{
    table::{percent, render},
    terminal::Colorize,
    Workspace,
};

#[derive(Debug, Parser)]
#[command(about = "Match a design against facilities and assemble supply trees")]
pub struct Plan {
    /// The design manifest (YAML or JSON)
    design: PathBuf,

    /// Files holding a list of facility manifests (can be specified multiple
    /// times)
    #[arg(short, long, required = true)]
    facilities: Vec<PathBuf>,

    /// The design's domain, if the manifest does not name one
    #[arg(long)]
    domain: Option<String>,

    /// Also check facility capacity and the design's deadline
    #[arg(long)]
    strict: bool,

    /// Maximum number of candidate trees
    #[arg(long, value_name = "N")]
    alternatives: Option<usize>,

    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl Plan {
    #[instrument(skip(workspace))]
    pub async fn run(self, workspace: &Workspace) -> anyhow::Result<()> {
        let outcome = self.outcome(workspace).await?;

        match self.output {
            OutputFormat::Table => render_table(&outcome),
            OutputFormat::Json => {
                serde_json::to_writer_pretty(std::io::stdout(), &outcome)
                    .context("failed to render json output")?;
                println!();
            }
        }
        Ok(())
    }

    async fn outcome(&self, workspace: &Workspace) -> anyhow::Result<PlanOutcome> {
        let config = workspace.config()?;
        let rules = workspace.rules()?;

        let manifest: DesignManifest = read_manifest(&self.design)?;
        let domain = manifest
            .domain()
            .cloned()
            .or_else(|| self.domain.as_deref().map(Domain::new))
            .context("the design manifest names no domain; pass --domain")?;

        let matcher = LayeredMatcher::new(Arc::new(rules));
        let plugin = matcher
            .registry()
            .get(&domain)
            .with_context(|| format!("no plug-in is registered for domain {domain}"))?;
        let design = plugin.extract_design(&manifest)?;

        let mut facilities = Vec::new();
        for path in &self.facilities {
            let manifests: Vec<FacilityManifest> = read_manifest(path)?;
            for manifest in &manifests {
                facilities.push(
                    extract_facility(&matcher, manifest, &domain)
                        .with_context(|| format!("in {}", path.display()))?,
                );
            }
        }

        let mut options = PlanOptions::for_domain(&config, &domain);
        if self.strict {
            options = options.with_validation_mode(ValidationMode::Strict);
        }
        if let Some(alternatives) = self.alternatives {
            options.max_alternatives = alternatives;
        }

        let planner = Planner::new(Arc::new(matcher), config.worker_threads)?;
        Ok(planner.plan(&design, &facilities, &options).await?)
    }
}

/// Facilities are extracted by the plug-in of their own domain, so that the
/// planner can report and skip those of another domain.
fn extract_facility(
    matcher: &LayeredMatcher,
    manifest: &FacilityManifest,
    default_domain: &Domain,
) -> anyhow::Result<Facility> {
    let domain = manifest.domain().unwrap_or(default_domain);
    let plugin = matcher
        .registry()
        .get(domain)
        .with_context(|| format!("no plug-in is registered for domain {domain}"))?;
    Ok(plugin.extract_facility(manifest)?)
}

fn render_table(outcome: &PlanOutcome) {
    if let Some(best) = outcome.best() {
        println!("{}", "Best supply tree".success());
        let rows = best
            .nodes()
            .map(|node| {
                vec![
                    node.id.to_string(),
                    node.facility.to_string(),
                    node.requirements
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                    node.quantity.to_string(),
                    node.lead_time_days.to_string(),
                    format!("{:.2}", node.confidence),
                ]
            })
            .collect::<Vec<_>>();
        render(
            &["NODE", "FACILITY", "REQUIREMENTS", "QTY", "DAYS", "CONFIDENCE"],
            &rows,
        );
        println!();
    } else {
        println!("{}", "No valid supply tree".failure());
        println!();
    }

    if !outcome.ranked.is_empty() {
        println!("Ranked candidates");
        render(&TREE_HEADERS, &tree_rows(&outcome.ranked));
        println!();
    }

    if !outcome.rejected.is_empty() {
        println!("{}", "Rejected candidates".warning());
        render(&TREE_HEADERS, &tree_rows(&outcome.rejected));
        for tree in &outcome.rejected {
            if let ValidationState::Invalid(reasons) = tree.validation() {
                println!("{}", short(tree).dim());
                for reason in reasons {
                    println!("  - {reason}");
                }
            }
        }
        println!();
    }

    if !outcome.unresolved.is_empty() {
        println!("{}", "Unresolved requirements".warning());
        let rows = outcome
            .unresolved
            .iter()
            .map(|unresolved| {
                vec![
                    unresolved.requirement.to_string(),
                    unresolved.component.to_string(),
                    unresolved.label.clone(),
                    unresolved.reason.clone(),
                ]
            })
            .collect::<Vec<_>>();
        render(&["REQUIREMENT", "COMPONENT", "LABEL", "REASON"], &rows);
        println!();
    }

    println!("Facility coverage");
    let rows = outcome
        .facility_scores
        .iter()
        .map(|score| {
            vec![
                score.facility().to_string(),
                percent(score.coverage()),
                format!("{:.2}", score.aggregate_confidence()),
                score.unmet().len().to_string(),
            ]
        })
        .collect::<Vec<_>>();
    render(&["FACILITY", "COVERAGE", "CONFIDENCE", "UNMET"], &rows);
}

const TREE_HEADERS: [&str; 5] = ["TREE", "FACILITIES", "COVERAGE", "CONFIDENCE", "UNRESOLVED"];

fn tree_rows(trees: &[SupplyTree]) -> Vec<Vec<String>> {
    trees
        .iter()
        .map(|tree| {
            let score = tree.score();
            vec![
                short(tree),
                tree.facilities()
                    .map(|record| record.id.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                percent(score.coverage),
                format!("{:.2}", score.aggregate_confidence),
                tree.unresolved().len().to_string(),
            ]
        })
        .collect()
}

fn short(tree: &SupplyTree) -> String {
    tree.fingerprint().chars().take(12).collect()
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
"#;

    const DESIGN: &str = r"
id: bracket
domain: manufacturing
due_within_days: 10
components:
  - id: frame
    requirements:
      - label: Computer Numerical Control machining
        quantity: 2
      - label: tig welding
    depends_on: [panel]
  - id: panel
    requirements:
      - label: powder coating
";

    const FACILITIES: &str = r"
- id: fab-01
  capacity: 10
  capabilities:
    - label: CNC machining
      lead_time_days: 3
    - label: tig welding
      lead_time_days: 2
- id: coat-02
  capabilities:
    - label: powder coating
      lead_time_days: 4
";

    /// Writes the manifests and returns a workspace, loading rules if asked.
    fn setup(root: &Path, with_rules: bool) -> Workspace {
        std::fs::write(root.join("design.yaml"), DESIGN).unwrap();
        std::fs::write(root.join("facilities.yaml"), FACILITIES).unwrap();
        let mut rule_dirs = Vec::new();
        if with_rules {
            let rules = root.join("rules");
            std::fs::create_dir_all(&rules).unwrap();
            std::fs::write(rules.join("manufacturing.yaml"), RULES).unwrap();
            rule_dirs.push(rules);
        }
        Workspace::new(root.join("stree.toml"), rule_dirs)
    }

    fn plan(root: &Path, output: OutputFormat) -> Plan {
        Plan {
            design: root.join("design.yaml"),
            facilities: vec![root.join("facilities.yaml")],
            domain: None,
            strict: true,
            alternatives: None,
            output,
        }
    }

    #[tokio::test]
    async fn plan_covers_the_design_through_loaded_rules() {
        let tmp = tempdir().unwrap();
        let workspace = setup(tmp.path(), true);

        let outcome = plan(tmp.path(), OutputFormat::Table)
            .outcome(&workspace)
            .await
            .unwrap();

        let best = outcome.best().expect("a valid supply tree");
        assert!((best.score().coverage - 1.0).abs() < f64::EPSILON);
        let facilities: Vec<_> = best.facilities().map(|record| record.id.as_str()).collect();
        assert_eq!(facilities, vec!["coat-02", "fab-01"]);
        assert!(outcome.unresolved.is_empty());

        let machining = best
            .nodes()
            .find(|node| node.requirements.contains(&"frame-1".into()))
            .unwrap();
        assert!((machining.confidence - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn plan_without_rules_leaves_the_abbreviation_unresolved() {
        let tmp = tempdir().unwrap();
        let workspace = setup(tmp.path(), false);

        let outcome = plan(tmp.path(), OutputFormat::Table)
            .outcome(&workspace)
            .await
            .unwrap();

        assert!(outcome.best().is_none());
        let unresolved: Vec<_> = outcome
            .unresolved
            .iter()
            .map(|unresolved| unresolved.requirement.as_str())
            .collect();
        assert_eq!(unresolved, vec!["frame-1"]);
        assert!(!outcome.rejected.is_empty());
    }

    #[tokio::test]
    async fn plan_run_renders_both_formats() {
        let tmp = tempdir().unwrap();
        let workspace = setup(tmp.path(), true);

        plan(tmp.path(), OutputFormat::Table)
            .run(&workspace)
            .await
            .expect("table output should succeed");
        plan(tmp.path(), OutputFormat::Json)
            .run(&workspace)
            .await
            .expect("json output should succeed");
    }

    #[tokio::test]
    async fn plan_requires_a_domain() {
        let tmp = tempdir().unwrap();
        let workspace = setup(tmp.path(), false);
        std::fs::write(
            tmp.path().join("design.yaml"),
            DESIGN.replace("domain: manufacturing\n", ""),
        )
        .unwrap();

        let error = plan(tmp.path(), OutputFormat::Table)
            .outcome(&workspace)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("pass --domain"));
    }
}
