//! CLI entry point for the Trixy Flow event indexer.
//!
//! ```text
//! main.rs (runtime + tracing)
//!     ↓
//! cli.rs  → config → db (pool, migrations) → chain client
//!     ↓
//! sync::SyncController (bootstrap → catch up → poll)
//! ```

use tracing::error;
use trixy_flow_indexer::{cli, observability};

/// Entry point for the Trixy Flow event indexer.
///
/// Logging is configured from `RUST_LOG`, `LOG_LEVEL`, `LOG_JSON` and
/// `LOG_FILE`; everything else is delegated to the CLI module.
#[tokio::main]
async fn main() {
    // `.env` may also carry the logging variables
    let _ = dotenvy::dotenv();

    let log_guard = match observability::init_tracing(&observability::LogSettings::from_env()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run().await {
        error!(error = %e, "Application error");
        eprintln!("Error: {e}");
        drop(log_guard);
        std::process::exit(1);
    }
}
