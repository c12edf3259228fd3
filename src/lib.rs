//! # Trixy Flow Event Indexer
//!
//! Follows the Trixy prediction-market contract on a Flow network and keeps
//! its six event kinds in SQLite: market creation, bets, resolution, claims
//! and yield deposits/withdrawals.
//!
//! ## Features
//!
//! - **Bounded windows**: heights are processed in windows of at most 250
//! - **Idempotent persistence**: every table is unique on
//!   `(transaction_id, event_index)`, so re-running a range is harmless
//! - **Durable, monotonic cursor**: restarts resume from the last saved window
//! - **Failure isolation**: a bad event or a failed kind query never blocks
//!   the rest of the window
//! - **Dead letters**: undecodable payloads are kept in `flow_skipped_events`
//!
//! ## Architecture
//!
//! 1. **Config** ([`config`]) - environment and networks file
//! 2. **Chain** ([`chain`]) - `ChainClient` trait, Flow REST client, JSON-Cadence
//! 3. **Events** ([`events`]) - event kinds and the typed decoder
//! 4. **Db** ([`db`]) - pool, migrations, repository
//! 5. **Sync** ([`sync`]) - retriever, cursor/sink traits, controller
//!
//! ## Using as a Library
//!
//! ```rust,no_run
//! use trixy_flow_indexer::{
//!     chain::FlowHttpClient, config::Config, db::{create_pool, Repository}, sync::SyncController,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let client = FlowHttpClient::new(config.access_url())?;
//!     let repo = Repository::new(create_pool(config.database_url()).await?);
//!
//!     let mut controller = SyncController::new(client, repo, config.sync_settings());
//!     let (_tx, mut shutdown) = tokio::sync::watch::channel(false);
//!     let summary = controller.catch_up_once(&mut shutdown).await?;
//!     println!("Indexed up to {}", summary.end_cursor);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`error::IndexerResult<T>`](error::IndexerResult):
//!
//! ```rust
//! use trixy_flow_indexer::error::{IndexerError, IndexerResult};
//!
//! fn example() -> IndexerResult<()> {
//!     Err(IndexerError::state("cursor missing", None))
//! }
//! assert!(example().is_err());
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod observability;
pub mod sync;
