//! # memento-dash CLI (`mdash`)
//!
//! ## Usage
//!
//! ```bash
//! mdash --config ./config/mdash.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mdash init` | Create the database and the tables of the import plan |
//! | `mdash import` | Fetch every active plan source and insert new entries |
//! | `mdash expand <table>...` | Copy `raw.fields[]` values into columns |
//! | `mdash calendar` | Rebuild `calendar` and `calendar_range` |
//! | `mdash libraries` | List the libraries visible to the token |
//! | `mdash fields <id>` | Show the field definitions of a library |
//! | `mdash verify` | Integrity check and calendar presence |
//!
//! Logging goes to stderr and follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use memento_dash::progress::ProgressMode;
use memento_dash::{calendar, config, expand, import, libraries, migrate, verify};

/// memento-dash CLI: import Memento libraries into SQLite and derive the
/// dashboard's calendar.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mdash.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mdash",
    about = "Import Memento libraries into SQLite and build the dashboard calendar",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mdash.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and the base table of every active plan source.
    ///
    /// Idempotent; existing tables are only brought up to the base schema.
    Init {
        /// Import plan (INI or YAML). Overrides `[import].plan`.
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Import every active source of the plan.
    ///
    /// Entries already present (same `ext_id`) are ignored, so re-running
    /// only adds what is new.
    Import {
        /// Import plan (INI or YAML). Overrides `[import].plan`.
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Only import this source (plan section name or table).
        #[arg(long)]
        source: Option<String>,

        /// Fetch and classify entries without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr: off, human, json. Human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Add a column per payload field and fill empty cells.
    Expand {
        /// Tables to expand.
        #[arg(required = true)]
        tables: Vec<String>,
    },

    /// Rebuild the calendar table and the calendar_range view.
    Calendar {
        /// Column list file (`table.column` per line). Overrides `[calendar].columns`.
        #[arg(long)]
        columns: Option<PathBuf>,

        /// Link prefix for calendar rows. Overrides `[calendar].base_path`.
        #[arg(long)]
        base_path: Option<String>,
    },

    /// List the libraries visible to the configured token.
    Libraries,

    /// Show the field definitions of one library.
    Fields {
        /// Library id, as printed by `mdash libraries`.
        library_id: String,
    },

    /// Check database integrity and the calendar artifacts.
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init { plan } => {
            migrate::run_init(&cfg, plan).await?;
        }
        Commands::Import {
            plan,
            source,
            dry_run,
            progress,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            import::run_import(&cfg, &cli.config, plan, source, dry_run, progress).await?;
        }
        Commands::Expand { tables } => {
            expand::run_expand(&cfg, &tables).await?;
        }
        Commands::Calendar { columns, base_path } => {
            calendar::run_calendar(&cfg, columns, base_path).await?;
        }
        Commands::Libraries => {
            libraries::run_libraries(&cfg, &cli.config).await?;
        }
        Commands::Fields { library_id } => {
            libraries::run_fields(&cfg, &cli.config, &library_id).await?;
        }
        Commands::Verify => {
            verify::run_verify(&cfg).await?;
        }
    }

    Ok(())
}
