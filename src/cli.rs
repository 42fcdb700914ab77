use std::path::{Path, PathBuf};

mod plan;
mod rules;
mod table;
mod terminal;

use anyhow::Context;
use clap::ArgAction;
use plan::Plan;
use rules::Rules;
use supply_tree::{Config, RuleStore};
use tracing::{info, instrument};

#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the configuration file
    #[arg(short, long, default_value = "stree.toml", global = true)]
    config: PathBuf,

    /// Directories of rule set documents to load
    #[arg(short, long, global = true)]
    rules: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        Self::setup_logging(self.verbose);

        let workspace = Workspace::new(self.config, self.rules);
        self.command.run(&workspace).await
    }

    fn setup_logging(verbosity: u8) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let level = match verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };

        let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// Write a default configuration file
    Init,

    /// Plan supply trees for a design
    Plan(Plan),

    /// Check, compare and export capability rules
    #[command(subcommand)]
    Rules(Rules),
}

impl Command {
    async fn run(self, workspace: &Workspace) -> anyhow::Result<()> {
        match self {
            Self::Init => Init::run(&workspace.config_path)?,
            Self::Plan(command) => command.run(workspace).await?,
            Self::Rules(command) => command.run(workspace)?,
        }
        Ok(())
    }
}

/// Paths shared by every command.
#[derive(Debug)]
pub struct Workspace {
    config_path: PathBuf,
    rule_dirs: Vec<PathBuf>,
}

impl Workspace {
    const fn new(config_path: PathBuf, rule_dirs: Vec<PathBuf>) -> Self {
        Self {
            config_path,
            rule_dirs,
        }
    }

    /// The configuration file, or the defaults if it does not exist.
    fn config(&self) -> anyhow::Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }
        Config::load(&self.config_path)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("failed to load {}", self.config_path.display()))
    }

    /// A rule store holding every rule set found in the rule directories.
    #[instrument(skip(self))]
    fn rules(&self) -> anyhow::Result<RuleStore> {
        let store = RuleStore::new();
        for dir in &self.rule_dirs {
            let summaries = store
                .load_dir(dir)
                .with_context(|| format!("failed to load rules from {}", dir.display()))?;
            for summary in summaries {
                info!(
                    domain = %summary.domain,
                    version = %summary.version,
                    rules = summary.changes.added.len() + summary.changes.updated.len(),
                    "Loaded rule set"
                );
            }
        }
        Ok(store)
    }
}

#[derive(Debug)]
struct Init;

impl Init {
    #[instrument]
    fn run(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }

        Config::default()
            .save(path)
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {e}", path.display()))?;

        println!("Created {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn init_writes_a_loadable_config() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("stree.toml");

        Init::run(&path).expect("init command should succeed");

        let workspace = Workspace::new(path, Vec::new());
        assert_eq!(workspace.config().unwrap(), Config::default());
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("stree.toml");
        std::fs::write(&path, "keep me").unwrap();

        let error = Init::run(&path).unwrap_err();
        assert!(error.to_string().contains("already exists"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let tmp = tempdir().unwrap();
        let workspace = Workspace::new(tmp.path().join("absent.toml"), Vec::new());
        assert_eq!(workspace.config().unwrap(), Config::default());
    }
}
