use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};

use sluice_core::config::MigratorConfig;
use sluice_core::run::{RunEvent, RunOutcome};
use sluice_runtime::{DirectorySource, MigrationRunner};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Manage database migrations.
#[derive(Parser)]
pub struct MigrateCommand {
    #[command(subcommand)]
    pub action: MigrateAction,

    /// Configuration file path.
    #[arg(short, long, default_value = "sluice.toml", global = true)]
    pub config: String,

    /// Migrations directory path (overrides the configured one).
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Run all pending migrations.
    Up,

    /// Roll back every migration newer than a version.
    Down {
        /// Version to return to. It stays applied.
        #[arg(long = "to", allow_negative_numbers = true)]
        target: i64,
    },

    /// Show migration status.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create the next numbered migration files.
    Create {
        /// What the migration does, e.g. "add users".
        description: String,
    },
}

impl MigrateCommand {
    pub async fn execute(self) -> Result<()> {
        // Load .env if present
        dotenvy::dotenv().ok();

        if let MigrateAction::Create { description } = &self.action {
            let dir = self.resolve_dir(self.load_config().ok().as_ref());
            return create_migration(&dir, description);
        }

        let config = self.load_config()?;
        super::init_tracing(&config.logging);
        info!("Loaded configuration from {}", self.config);

        let dir = self.resolve_dir(Some(&config));
        let mut runner = MigrationRunner::from_config(&config)
            .source(DirectorySource::new(&dir))
            .observer(|event: &RunEvent<'_>| match event {
                RunEvent::MigrationCommitted {
                    version,
                    description,
                    elapsed,
                } => println!(
                    "  {} {} {} {}",
                    style("✓").green(),
                    style(version).cyan(),
                    description,
                    style(format!("({:?})", elapsed)).dim()
                ),
                RunEvent::LockAcquired { lock, .. } => {
                    println!("  {} Holding lock {}", style("→").dim(), style(lock).dim())
                }
                _ => {}
            })
            .build()?;

        match self.action {
            MigrateAction::Up => {
                print_header("Migrations");

                let cancel = CancellationToken::new();
                let on_ctrl_c = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        on_ctrl_c.cancel();
                    }
                });

                println!("  {} Running pending migrations...", style("→").dim());
                let report = runner.run(cancel).await;

                match &report.outcome {
                    RunOutcome::Succeeded if report.applied.is_empty() => {
                        println!("  {} Database is up to date", style("ℹ").blue())
                    }
                    RunOutcome::Succeeded => println!(
                        "  {} Applied {} migration(s), now at version {}",
                        style("✓").green(),
                        report.applied_count(),
                        display_version(report.max_version)
                    ),
                    RunOutcome::Cancelled => println!(
                        "  {} Cancelled after {} migration(s)",
                        style("○").yellow(),
                        report.applied_count()
                    ),
                    RunOutcome::Failed(e) => {
                        println!("  {} {}", style("✗").red(), style(e).red())
                    }
                }
                println!();

                report.into_result()?;
            }

            MigrateAction::Down { target } => {
                print_header("Migrations");
                println!(
                    "  {} Rolling back to version {}...",
                    style("→").dim(),
                    target
                );

                let report = runner.rollback_to(target).await?;

                if report.reverted.is_empty() {
                    println!("  {} No migrations to rollback", style("ℹ").blue());
                } else {
                    for version in &report.reverted {
                        println!("  {} Rolled back: {}", style("✓").green(), version);
                    }
                    println!();
                    println!(
                        "  {} Rolled back {} migration(s), now at version {}",
                        style("✓").green(),
                        report.reverted.len(),
                        display_version(report.max_version)
                    );
                }
                println!();
            }

            MigrateAction::Status { json } => {
                let status = runner.status().await?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                    return Ok(());
                }

                print_header("Migration Status");

                if status.applied.is_empty() && status.pending.is_empty() {
                    println!("  {} No migrations found", style("ℹ").blue());
                    return Ok(());
                }

                if !status.applied.is_empty() {
                    println!("  {} Applied:", style("✓").green());
                    for entry in &status.applied {
                        let marker = if status.unknown.contains(&entry.version) {
                            style("?").red().to_string()
                        } else {
                            style("-").dim().to_string()
                        };
                        println!(
                            "    {} {} {} {} ({})",
                            marker,
                            style(entry.version).cyan(),
                            entry.description,
                            style("at").dim(),
                            entry.applied_on.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }

                if !status.pending.is_empty() {
                    if !status.applied.is_empty() {
                        println!();
                    }
                    println!("  {} Pending:", style("○").yellow());
                    for pending in &status.pending {
                        let marker = if pending.reversible {
                            style("↓").green().to_string()
                        } else {
                            style("→").dim().to_string()
                        };
                        println!(
                            "    {} {} {}",
                            marker,
                            style(pending.version).yellow(),
                            pending.description
                        );
                    }
                }

                println!();
                println!(
                    "  {} {} applied, {} pending",
                    style("ℹ").blue(),
                    status.applied.len(),
                    status.pending.len()
                );
                if !status.unknown.is_empty() {
                    println!(
                        "  {} {} applied version(s) have no migration file",
                        style("!").red(),
                        status.unknown.len()
                    );
                }
                println!();
            }

            MigrateAction::Create { .. } => {}
        }

        Ok(())
    }

    fn load_config(&self) -> Result<MigratorConfig> {
        let config_path = Path::new(&self.config);
        if !config_path.exists() {
            anyhow::bail!(
                "Configuration file not found: {}\nCreate one with a [database] section (provider, url).",
                self.config
            );
        }

        MigratorConfig::from_file(config_path)
            .with_context(|| format!("Failed to load {}", self.config))
    }

    /// Command-line directory, else the configured one.
    fn resolve_dir(&self, config: Option<&MigratorConfig>) -> PathBuf {
        match (&self.migrations_dir, config) {
            (Some(dir), _) => PathBuf::from(dir),
            (None, Some(config)) => config.migrations.dir.clone(),
            (None, None) => PathBuf::from("migrations"),
        }
    }
}

fn print_header(title: &str) {
    println!();
    println!("  {} {}", style("sluice").bold().cyan(), style(title).bold());
    println!();
}

fn display_version(version: Option<i64>) -> String {
    version.map_or_else(|| "none".to_string(), |v| v.to_string())
}

/// Write `<next>_<slug>.sql` and its `.down.sql` companion.
fn create_migration(dir: &Path, description: &str) -> Result<()> {
    let slug = slugify(description);
    if slug.is_empty() {
        anyhow::bail!("Migration description must contain letters or digits");
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let version = next_version(dir)?;

    let up = dir.join(format!("{:04}_{}.sql", version, slug));
    let down = dir.join(format!("{:04}_{}.down.sql", version, slug));

    std::fs::write(&up, format!("-- {}\n", description))?;
    std::fs::write(&down, format!("-- Revert: {}\n", description))?;

    println!("  {} Created {}", style("✓").green(), up.display());
    println!("  {} Created {}", style("✓").green(), down.display());
    Ok(())
}

fn slugify(description: &str) -> String {
    description
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

/// One past the highest numeric prefix of the `.sql` files in `dir`.
fn next_version(dir: &Path) -> Result<i64> {
    let mut max = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e != "sql").unwrap_or(true) {
            continue;
        }

        let prefix: String = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if let Ok(version) = prefix.parse::<i64>() {
            max = max.max(version);
        }
    }
    Ok(max + 1)
}
