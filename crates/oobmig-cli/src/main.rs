mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use oobmig_config::{AppConfig, ConfigLoader, LogConfig};
use oobmig_core::{
    MigrationStore, MigratorRegistry, Runner, RunnerOptions, Version, definitions,
    schedule_migration_interrupts,
};
use oobmig_db::SqliteMigrationStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "oobmig",
    version,
    about = "Plan, inspect and steer out-of-band data migrations"
)]
struct Cli {
    /// Path to config file (YAML or TOML).
    #[arg(short, long, global = true, env = "OOBMIG_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database holding migration state. Overrides the config file.
    #[arg(long, global = true, env = "OOBMIG_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the versions at which an upgrade or downgrade has to pause.
    Plan {
        #[arg(long)]
        from: Version,
        #[arg(long)]
        to: Version,
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Check that the recorded migration state is safe for a version.
    Validate {
        /// Version about to run. Defaults to `current_version` from config.
        #[arg(long)]
        current: Option<Version>,
        /// Earliest version this database ran. Defaults to `first_version`
        /// from config, then to the current version.
        #[arg(long)]
        first: Option<Version>,
    },
    /// Upsert the built-in migration definitions into the database.
    Sync,
    /// List recorded migrations with their progress.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Change the direction in which migrations are driven.
    Direction {
        /// Drive the migrations towards 0% progress.
        #[arg(long, conflicts_with = "forward", required_unless_present = "forward")]
        reverse: bool,
        /// Drive the migrations towards 100% progress.
        #[arg(long)]
        forward: bool,
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = ConfigLoader::new();
    let mut config = loader
        .load(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(database) = cli.database.clone() {
        config.database_path = Some(database);
    }
    init_tracing(&config.log);

    match cli.command {
        Command::Plan { from, to, json } => {
            let interrupts = schedule_migration_interrupts(from, to)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&interrupts)?);
            } else {
                println!("{}", render::render_plan(from, to, &interrupts));
            }
        }
        Command::Validate { current, first } => {
            let current = match current {
                Some(v) => v,
                None => config_version(config.current_version.as_deref())?
                    .context("no current version given (use --current or current_version)")?,
            };
            let first = match first {
                Some(v) => v,
                None => config_version(config.first_version.as_deref())?.unwrap_or(current),
            };
            let runner = open_runner(&config)?.1;
            runner.validate(current, first).await?;
            println!("out-of-band migrations are compatible with {current}");
        }
        Command::Sync => {
            let runner = open_runner(&config)?.1;
            runner.synchronize_metadata().await?;
        }
        Command::Status { json } => {
            let (store, _) = open_runner(&config)?;
            let migrations = store.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&migrations)?);
            } else {
                println!("{}", render::render_status(&migrations));
            }
        }
        Command::Direction {
            reverse,
            forward,
            ids,
        } => {
            if reverse == forward {
                bail!("exactly one of --reverse or --forward is required");
            }
            let runner = open_runner(&config)?.1;
            runner.update_direction(&ids, reverse).await?;
        }
    }

    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn config_version(raw: Option<&str>) -> Result<Option<Version>> {
    raw.map(|s| s.parse::<Version>())
        .transpose()
        .context("invalid version in configuration")
}

/// Open the store and a runner with no migrators registered, for one-shot
/// operator commands.
fn open_runner(config: &AppConfig) -> Result<(Arc<SqliteMigrationStore>, Runner)> {
    let path = config
        .database_path
        .clone()
        .context("no database path configured")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let store = Arc::new(SqliteMigrationStore::open(&path)?);
    info!("using migration database {}", path.display());

    let registry = MigratorRegistry::new(definitions::embedded()?);
    let runner = Runner::new(store.clone(), registry, RunnerOptions::default());
    Ok((store, runner))
}
