//! Command-line interface for the Trixy Flow event indexer.
//!
//! # Commands
//!
//! - `run` (default): index continuously until Ctrl-C
//! - `catch-up`: index up to the current sealed height, print a summary, exit
//! - `status`: show the stored cursor and per-table row counts
//!
//! # Example
//!
//! ```bash
//! trixy-indexer
//! trixy-indexer catch-up --window-size 100
//! trixy-indexer status
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::chain::{ChainClient, FlowHttpClient};
use crate::config::Config;
use crate::db::models::TableCount;
use crate::db::{create_pool, Repository};
use crate::error::IndexerResult;
use crate::sync::{CatchUpSummary, SyncController, SyncObserver, WindowReport};

/// Trixy event indexer for the Flow blockchain
#[derive(Parser, Debug)]
#[command(name = "trixy-indexer")]
#[command(about = "Indexes Trixy prediction-market events from Flow into SQLite", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    sync: SyncArgs,

    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Overrides for the environment configuration.
#[derive(Args, Debug, Clone, Default)]
struct SyncArgs {
    /// Heights per window (1-250, default: WINDOW_SIZE or 200)
    #[arg(short, long, global = true)]
    window_size: Option<u64>,

    /// Seconds between polls once caught up, at least 1 (default: POLL_INTERVAL_SECS or 2)
    #[arg(short, long, global = true)]
    poll_interval: Option<u64>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Index continuously until Ctrl-C
    Run,

    /// Index up to the current sealed height, then exit
    CatchUp,

    /// Show sync progress and stored row counts
    Status,
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns an error if configuration, database setup or the access client
/// fail before indexing starts.
pub async fn run() -> IndexerResult<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_command(&cli.sync).await,
        Commands::CatchUp => catch_up_command(&cli.sync).await,
        Commands::Status => status_command(&cli.sync).await,
    }
}

fn load_config(args: &SyncArgs) -> IndexerResult<Config> {
    let mut config = Config::from_env()?;
    if let Some(window_size) = args.window_size {
        config.set_window_size(window_size)?;
    }
    if let Some(secs) = args.poll_interval {
        config.set_poll_interval_secs(secs)?;
    }
    Ok(config)
}

/// Config, store and access client, in the order fatal errors are reported.
async fn setup(args: &SyncArgs) -> IndexerResult<(Config, Repository, FlowHttpClient)> {
    let config = load_config(args)?;
    let client = FlowHttpClient::new(config.access_url())?;
    let pool = create_pool(config.database_url()).await?;
    Ok((config, Repository::new(pool), client))
}

fn print_banner(config: &Config) {
    println!("{}", "🚀 Trixy Flow indexer".cyan().bold());
    println!("   {} {}", "Network: ".dimmed(), config.network().yellow());
    println!("   {} {}", "Access:  ".dimmed(), config.access_url());
    println!(
        "   {} {} ({})",
        "Contract:".dimmed(),
        config.contract().address().yellow(),
        config.contract().name()
    );
    println!("   {} {}", "Database:".dimmed(), config.database_url());
    println!(
        "   {} {} heights, poll every {}s",
        "Window:  ".dimmed(),
        config.window_size(),
        config.poll_interval_secs()
    );
    println!();
}

/// Flip the returned receiver to `true` on Ctrl-C.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            println!();
            println!("{}", "🛑 Shutting down gracefully...".yellow().bold());
            let _ = tx.send(true);
        }
    });
    rx
}

/// Execute the run command (continuous indexing).
async fn run_command(args: &SyncArgs) -> IndexerResult<()> {
    let (config, repo, client) = setup(args).await?;
    print_banner(&config);

    let observer = Arc::new(ConsoleObserver::new(repo.clone()));
    let mut controller =
        SyncController::new(client, repo, config.sync_settings()).with_observer(observer);

    controller.run(shutdown_on_ctrl_c()).await?;

    if let Some(cursor) = controller.cursor() {
        println!("{} Last processed height: {}", "📍".cyan(), cursor);
    }
    println!("{}", "👋 Shutdown complete".green().bold());
    Ok(())
}

/// Execute the catch-up command (index to the current head, then exit).
async fn catch_up_command(args: &SyncArgs) -> IndexerResult<()> {
    let (config, repo, client) = setup(args).await?;
    print_banner(&config);

    let observer = Arc::new(ConsoleObserver::new(repo.clone()));
    let mut controller =
        SyncController::new(client, repo, config.sync_settings()).with_observer(observer);

    let mut shutdown = shutdown_on_ctrl_c();
    let summary = controller.catch_up_once(&mut shutdown).await?;

    if summary.interrupted {
        println!(
            "{} Interrupted at height {} of {}",
            "⏸️ ".yellow(),
            summary.end_cursor,
            summary.target_height
        );
    }
    Ok(())
}

/// Execute the status command.
async fn status_command(args: &SyncArgs) -> IndexerResult<()> {
    let (config, repo, client) = setup(args).await?;
    let address = config.contract().address();

    println!("{}", "📋 Trixy indexer status".cyan().bold());
    match repo.get_sync_state(address).await? {
        Some(state) => {
            let updated = chrono::DateTime::<chrono::Utc>::from_timestamp(state.updated_at, 0)
                .map_or_else(|| state.updated_at.to_string(), |t| t.to_rfc3339());
            println!(
                "   {} {} ({}, {})",
                "Contract:".dimmed(),
                state.contract_address.yellow(),
                state.contract_name,
                state.network
            );
            println!(
                "   {} {}",
                "Cursor:  ".dimmed(),
                state.last_block_height.to_string().yellow()
            );
            println!("   {} {}", "Updated: ".dimmed(), updated);

            match client.latest_height().await {
                Ok(latest) => println!(
                    "   {} {} ({} behind)",
                    "Sealed:  ".dimmed(),
                    latest,
                    latest.saturating_sub(state.height())
                ),
                Err(e) => {
                    warn!(error = %e, "Could not fetch latest height");
                    println!("   {} {}", "Sealed:  ".dimmed(), "unavailable".red());
                }
            }
        }
        None => println!(
            "   {} no sync state for {} yet (starts at {})",
            "Cursor:  ".dimmed(),
            address.yellow(),
            config.contract().start_block()
        ),
    }

    println!();
    print_table_counts(&repo.table_counts().await?);

    let skipped = repo.recent_skipped_events(5).await?;
    if !skipped.is_empty() {
        println!();
        println!("{}", "Recently skipped events:".yellow().bold());
        for event in skipped {
            println!(
                "   {} {}:{} @ {} {}",
                event.event_kind,
                event.transaction_id.dimmed(),
                event.event_index,
                event.block_height,
                event.reason.red()
            );
        }
    }

    Ok(())
}

fn print_table_counts(counts: &[TableCount]) {
    println!("{}", "📊 Stored rows".cyan().bold());
    for count in counts {
        println!("   {:<24} {:>8}", count.table, count.rows.to_string().yellow());
    }
}

fn format_window(report: &WindowReport) -> String {
    let mut line = format!(
        "Heights {}-{} | events: {} | new: {} | duplicates: {}",
        report.start_height, report.end_height, report.fetched, report.persisted, report.duplicates
    );
    if report.failures() > 0 {
        line.push_str(&format!(" | failed: {}", report.failures()));
    }
    if !report.failed_kinds.is_empty() {
        let kinds: Vec<&str> = report.failed_kinds.iter().map(|k| k.name()).collect();
        line.push_str(&format!(" | kinds skipped: {}", kinds.join(", ")));
    }
    line
}

/// Prints sync progress to the console.
struct ConsoleObserver {
    repo: Repository,
}

impl ConsoleObserver {
    const fn new(repo: Repository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl SyncObserver for ConsoleObserver {
    async fn on_bootstrap(&self, cursor: u64, latest_height: u64) {
        println!(
            "{} Cursor at {}, sealed height {} ({} behind)",
            "🔍".cyan(),
            cursor.to_string().yellow(),
            latest_height.to_string().yellow(),
            latest_height.saturating_sub(cursor)
        );
    }

    async fn on_window(&self, report: &WindowReport) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format_window(report);
        let line = if report.failures() > 0 || !report.failed_kinds.is_empty() {
            line.yellow()
        } else {
            line.normal()
        };
        println!("{} {} {}", "📦".cyan(), timestamp.to_string().dimmed(), line);
    }

    async fn on_caught_up(&self, summary: &CatchUpSummary) {
        println!(
            "{} Caught up to {} ({} windows, {} new, {} duplicates, {} decode failures)",
            "✅".green(),
            summary.end_cursor.to_string().yellow(),
            summary.windows,
            summary.persisted,
            summary.duplicates,
            summary.decode_failures
        );
        match self.repo.table_counts().await {
            Ok(counts) => print_table_counts(&counts),
            Err(e) => warn!(error = %e, "Failed to read table counts"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::try_parse_from(["trixy-indexer"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.sync.window_size.is_none());
    }

    #[test]
    fn test_subcommands_parse() {
        let cli = Cli::try_parse_from(["trixy-indexer", "catch-up"]).unwrap();
        assert_eq!(cli.command, Some(Commands::CatchUp));

        let cli = Cli::try_parse_from(["trixy-indexer", "status"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Status));

        assert!(Cli::try_parse_from(["trixy-indexer", "watch"]).is_err());
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::try_parse_from([
            "trixy-indexer",
            "run",
            "--window-size",
            "100",
            "--poll-interval",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.command, Some(Commands::Run));
        assert_eq!(cli.sync.window_size, Some(100));
        assert_eq!(cli.sync.poll_interval, Some(5));
    }

    #[test]
    fn test_format_window() {
        let report = WindowReport {
            start_height: 101,
            end_height: 300,
            fetched: 4,
            persisted: 3,
            decode_failures: 1,
            failed_kinds: vec![EventKind::YieldWithdrawn],
            ..WindowReport::default()
        };
        assert_eq!(
            format_window(&report),
            "Heights 101-300 | events: 4 | new: 3 | duplicates: 0 | failed: 1 | kinds skipped: YieldWithdrawn"
        );
    }
}
