use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::collector::{self, ChangeSink, Collector};
use crate::domain::Change;
use crate::infra::{Config, ConfigManager, SqliteStore, Store};
use crate::logging;
use crate::sources::github::{self, GitHubAdapter, GitHubCredentials, StdinPrompt};
use crate::sources::{AdapterRegistry, SOURCE_TYPES};

#[derive(Parser)]
#[command(name = "chglg")]
#[command(about = "Collect new releases and commits from tracked repositories", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to $CHGLG_CONFIG, ./chglg.yml, ./repositories.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file (defaults to $CHGLG_DB, the config file, ~/.chglg/changes.db)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch everything new since the last successful run (default)
    Collect,

    /// Show the most recently stored changes
    Show {
        /// Number of changes to show
        #[arg(short = 'n', default_value = "10")]
        count: usize,
    },

    /// Check configuration, database, credentials and sources
    Health,

    /// Write a starter configuration file
    Init,
}

/// Prints every new change as `<date> - <message> [<author>]`.
struct ConsoleSink;

impl ChangeSink for ConsoleSink {
    fn accepted(&self, change: &Change) {
        println!(
            "{} - {} [{}]",
            change.display_date().dimmed(),
            change.message,
            change.author.cyan()
        );
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match &cli.command {
        None | Some(Commands::Collect) => collect_command(&cli).await,
        Some(Commands::Show { count }) => show_command(&cli, *count),
        Some(Commands::Health) => health_command(&cli).await,
        Some(Commands::Init) => init_command(&cli),
    }
}

async fn collect_command(cli: &Cli) -> Result<()> {
    let manager = ConfigManager::load(cli.config.as_deref())?;
    let config = manager.get();

    // Reject the configuration before any login, prompt or database file.
    collector::validate(&config.repositories, SOURCE_TYPES)?;

    let store = open_store(&manager, cli)?;
    let registry = build_registry(config).await?;

    let collector = Collector::new(registry, store)
        .with_limit(config.max_items)
        .with_sink(Box::new(ConsoleSink));

    let report = collector.run(&config.repositories).await?;
    info!(
        new = report.inserted(),
        repositories = report.repositories.len(),
        "done"
    );

    Ok(())
}

fn show_command(cli: &Cli, count: usize) -> Result<()> {
    let manager = ConfigManager::load(cli.config.as_deref())?;
    let store = open_store(&manager, cli)?;

    let changes = store.recent_changes(count)?;

    if changes.is_empty() {
        println!("No changes collected yet");
    } else {
        for change in changes {
            let label = change
                .metadata
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or(change.repository.as_str())
                .to_string();
            println!(
                "{} {:<8} {} - {} [{}]",
                change.display_date().dimmed(),
                change.kind.to_string().yellow(),
                label.bold(),
                change.message,
                change.author.cyan()
            );
        }
    }

    Ok(())
}

async fn health_command(cli: &Cli) -> Result<()> {
    println!("{}", "Checking chglg health...".bold());

    let mut all_ok = true;

    let manager = match ConfigManager::load(cli.config.as_deref()) {
        Ok(manager) => {
            println!(
                "✓ Configuration: {} ({} repositories)",
                manager.path().display(),
                manager.get().repositories.len()
            );
            manager
        }
        Err(e) => {
            println!("{} Config error: {}", "✗".red(), e);
            anyhow::bail!("configuration could not be loaded");
        }
    };

    match open_store(&manager, cli) {
        Ok(store) => {
            let watermark = store
                .last_check_date()?
                .map(|d| d.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            println!(
                "✓ Database: {} changes, last successful run: {}",
                store.count()?,
                watermark
            );
        }
        Err(e) => {
            println!("{} Database error: {:#}", "✗".red(), e);
            all_ok = false;
        }
    }

    println!("\nSources:");
    match build_registry(manager.get()).await {
        Ok(registry) => {
            for adapter in registry.adapters() {
                match adapter.health_check().await {
                    Ok(true) => println!("  ✓ {} reachable", adapter.source_type()),
                    Ok(false) => {
                        println!("  {} {} rate limit exhausted", "⚠️".yellow(), adapter.source_type())
                    }
                    Err(e) => {
                        println!("  {} {}: {}", "✗".red(), adapter.source_type(), e);
                        all_ok = false;
                    }
                }
            }
            for entry in &manager.get().repositories {
                if registry.resolve(&entry.source.source_type).is_err() {
                    println!(
                        "  {} {}: unsupported source type `{}`",
                        "✗".red(),
                        entry.source.full_name(),
                        entry.source.source_type
                    );
                    all_ok = false;
                }
            }
        }
        Err(e) => {
            println!("  {} {:#}", "✗".red(), e);
            all_ok = false;
        }
    }

    if all_ok {
        println!("\n{}", "All systems operational".green().bold());
    } else {
        println!("\n{} Some issues detected", "⚠️".yellow().bold());
    }

    Ok(())
}

fn init_command(cli: &Cli) -> Result<()> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(ConfigManager::CONFIG_FILE));

    if ConfigManager::create_default(&path)? {
        println!("✓ Created config at {}", path.display());
    } else {
        println!("{} {} already exists", "⚠️".yellow(), path.display());
    }

    Ok(())
}

// Helper functions

fn open_store(manager: &ConfigManager, cli: &Cli) -> Result<Arc<dyn Store>> {
    let path = manager.database_path(cli.database.as_deref())?;
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Adapters for every source type the configuration uses. Types without an
/// adapter are left out; the collector rejects them before fetching.
async fn build_registry(config: &Config) -> Result<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();

    if config.uses_source(github::SOURCE_TYPE) {
        let credentials = GitHubCredentials::from_env()?;
        let adapter = GitHubAdapter::connect(&credentials, &StdinPrompt)
            .await
            .context("Failed to log in to GitHub")?;
        registry.register(Arc::new(adapter));
    }

    Ok(registry)
}
