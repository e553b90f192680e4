//! Stocksync CLI - command-line interface for marketplace inventory sync.

mod commands;
mod config;
mod progress;
mod shutdown;

use clap::{Parser, Subcommand};
use console::Term;
use stocksync::Marketplace;
use stocksync::TaskPriority;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::commands::OutputFormat;

#[derive(Parser)]
#[command(name = "stocksync")]
#[command(version)]
#[command(about = "Resilient marketplace inventory synchronization")]
#[command(
    long_about = "Stocksync pulls stock levels from Ozon and Wildberries into a local \
database. Syncs run on a prioritized worker pool with rate limiting, retries and \
fallback to cached or estimated data. Health, recovery and fallback operations can \
also be run by hand."
)]
#[command(after_long_help = r#"EXAMPLES
    Sync both marketplaces:
        $ stocksync sync ozon wildberries

    Sync Wildberries ahead of anything else, without fallback data:
        $ stocksync sync wb --priority critical --no-fallback

    Show the health report as JSON:
        $ stocksync health --format json

    Remove corrupted rows from the last 30 days:
        $ stocksync recover cleanup ozon --days-back 30

    Generate shell completions:
        $ stocksync completions bash > ~/.local/share/bash-completion/completions/stocksync

CONFIGURATION
    Stocksync reads configuration from:
      1. ~/.config/stocksync/config.toml (or $XDG_CONFIG_HOME/stocksync/config.toml)
      2. ./stocksync.toml
      3. Environment variables (STOCKSYNC_* prefix, nested keys joined by "__")
      4. .env file in current directory

ENVIRONMENT VARIABLES
    STOCKSYNC_DATABASE__URL          Database connection string (default: ~/.local/state/stocksync/stocksync.db)
    STOCKSYNC_OZON__CLIENT_ID        Ozon seller client id
    STOCKSYNC_OZON__API_KEY          Ozon seller API key
    STOCKSYNC_WILDBERRIES__API_KEY   Wildberries statistics API token
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Synchronize inventory from one or more marketplaces
    Sync {
        /// Marketplaces to sync (ozon, wildberries/wb)
        #[arg(required = true)]
        sources: Vec<Marketplace>,

        /// Scheduling priority (critical, high, normal, low)
        #[arg(short, long, default_value_t = TaskPriority::Normal)]
        priority: TaskPriority,

        /// Fail instead of substituting cached or estimated data
        #[arg(long)]
        no_fallback: bool,

        /// Output format for the run summary
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Show the health report for every marketplace
    Health {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Repair stored inventory data
    Recover {
        #[command(subcommand)]
        action: RecoverAction,
    },
    /// Substitute data when a marketplace is unavailable
    Fallback {
        #[command(subcommand)]
        action: FallbackAction,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
    /// Fresh install - drop all tables and reapply migrations
    Fresh,
}

#[derive(Subcommand)]
enum RecoverAction {
    /// Delete recent snapshots and queue a high-priority sync to rewrite them
    Resync {
        source: Marketplace,

        /// Days of snapshots to delete
        #[arg(short, long, default_value_t = 7)]
        days_back: i64,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Remove negative, malformed, stale and duplicate rows
    Cleanup {
        source: Marketplace,

        /// Days of snapshots to scan
        #[arg(short, long, default_value_t = 30)]
        days_back: i64,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Roll back the records written by a failed run
    Failure {
        source: Marketplace,

        /// Failed run to roll back (default: the latest unrecovered failure)
        #[arg(short, long)]
        session_id: Option<Uuid>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Score stored data without changing it
    Validate {
        source: Marketplace,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum FallbackAction {
    /// Copy the most recent recent-enough snapshot to today
    Cached {
        source: Marketplace,

        /// Oldest snapshot age accepted, in hours
        #[arg(short, long, default_value_t = stocksync::sync::DEFAULT_FALLBACK_MAX_AGE_HOURS)]
        max_age_hours: i64,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Estimate current stock from history
    Estimate {
        source: Marketplace,

        /// Days of history to use
        #[arg(short, long, default_value_t = stocksync::sync::DEFAULT_ESTIMATE_DAYS_BACK)]
        days_back: i64,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    shutdown::setup_shutdown_handler();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("stocksync=info,stocksync_cli=info"),
    };

    // Logs go to stderr so JSON output on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(Term::stderr().is_term())
        .with_writer(std::io::stderr)
        .init();

    let config = config::Config::load();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        commands::meta::handle_completions(*shell)?;
        return Ok(());
    }

    let database_url = config
        .database_url()
        .ok_or("Could not determine a database URL; set STOCKSYNC_DATABASE__URL")?;

    // Ensure the database directory exists for SQLite
    if database_url.starts_with("sqlite://") {
        let db_path = database_url.trim_start_matches("sqlite://");
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        let db_path = std::path::Path::new(db_path);

        if db_path.is_relative() && !db_path.as_os_str().is_empty() {
            tracing::warn!(
                "Database path '{}' is relative - behavior depends on current directory. \
                 Consider using an absolute path.",
                db_path.display()
            );
        }

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
    }

    match cli.command {
        Commands::Migrate { action } => {
            commands::migrate::handle_migrate(action, &database_url).await?;
        }
        Commands::Sync {
            sources,
            priority,
            no_fallback,
            format,
        } => {
            commands::sync::handle_sync(
                &config,
                &database_url,
                sources,
                priority,
                !no_fallback,
                format,
            )
            .await?;
        }
        Commands::Health { format } => {
            commands::health::handle_health(&config, &database_url, format).await?;
        }
        Commands::Recover { action } => {
            commands::recover::handle_recover(action, &config, &database_url).await?;
        }
        Commands::Fallback { action } => {
            commands::fallback::handle_fallback(action, &config, &database_url).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
