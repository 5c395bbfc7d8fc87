//! # ReportPortal Sync CLI (`rpsync`)
//!
//! ## Usage
//!
//! ```bash
//! rpsync --config ./config/rpsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rpsync init` | Create the SQLite database and run schema migrations |
//! | `rpsync sync run` | Incremental sync (add `--full` to rebuild) |
//! | `rpsync sync status` | Checkpoints and record counts per unit |
//! | `rpsync storage search "<query>"` | Similarity search over stored records |
//! | `rpsync storage get <record_id>` | Print one stored record |
//! | `rpsync storage clear --yes` | Remove every stored record |
//! | `rpsync config show` | Print the effective config, token masked |
//!
//! `sync run` exits 0 when every unit completed, 2 when some failed, and
//! 1 when the run failed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use reportportal_sync::core::models::EntityType;
use reportportal_sync::progress::ProgressMode;
use reportportal_sync::{config, logging, migrate, status, storage_cmd, sync_cmd};

/// ReportPortal Sync: mirror ReportPortal launches, test items, logs and
/// more into a local vector store.
#[derive(Parser)]
#[command(
    name = "rpsync",
    about = "Mirror ReportPortal entities into a local vector store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rpsync.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Run or inspect synchronization.
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Inspect or clear the vector store.
    Storage {
        #[command(subcommand)]
        action: StorageAction,
    },

    /// Show configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Sync projects and entity types into the vector store.
    ///
    /// Without `--full`, each unit resumes from its checkpoint (or the
    /// lookback window when it has none).
    Run {
        /// Re-fetch everything and replace the stored records.
        #[arg(long)]
        full: bool,

        /// Project to sync; repeatable. Defaults to `api.default_project`,
        /// then to every project the token can see.
        #[arg(long = "project")]
        projects: Vec<String>,

        /// Entity type to sync; repeatable. Defaults to all.
        #[arg(long = "entity-type")]
        entity_types: Vec<EntityType>,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show checkpoints and record counts per unit.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum StorageAction {
    /// Rank stored records by similarity to a query.
    Search {
        query: String,

        #[arg(long)]
        project: Option<String>,

        #[arg(long = "entity-type")]
        entity_types: Vec<EntityType>,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Print a stored record by id (`entity_type:id`).
    Get { record_id: String },

    /// Delete every record in the configured collection.
    Clear {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration with the token masked.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    let progress = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { action } => match action {
            SyncAction::Run {
                full,
                projects,
                entity_types,
                json,
            } => {
                let state = sync_cmd::run_sync(
                    &cfg,
                    full,
                    projects,
                    entity_types,
                    json,
                    progress.reporter(),
                )
                .await?;
                return Ok(ExitCode::from(state.exit_code()));
            }
            SyncAction::Status { json } => {
                status::run_status(&cfg, json).await?;
            }
        },
        Commands::Storage { action } => match action {
            StorageAction::Search {
                query,
                project,
                entity_types,
                limit,
                json,
            } => {
                storage_cmd::run_search(&cfg, &query, project, entity_types, limit, json).await?;
            }
            StorageAction::Get { record_id } => {
                storage_cmd::run_get(&cfg, &record_id).await?;
            }
            StorageAction::Clear { yes } => {
                storage_cmd::run_clear(&cfg, yes).await?;
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&cfg.redacted())?);
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}
