//! Configuration management for the Flow event indexer.
//!
//! This module handles loading and validating configuration from environment variables
//! using the `dotenvy` crate, plus an optional JSON networks file that lists the
//! monitored contracts per network. All operations return [`IndexerResult`].
//!
//! ## Environment Variables
//!
//! Optional (with defaults):
//! - `FLOW_ACCESS_URL`: Flow Access REST endpoint (default: `https://rest-testnet.onflow.org`)
//! - `FLOW_NETWORK`: Network identifier (default: `testnet`)
//! - `DATABASE_URL`: SQLite URL (default: `sqlite:./trixy-indexer.db`)
//! - `NETWORKS_FILE`: Contracts per network (default: `./networks.json`)
//! - `CONTRACT_ADDRESS`: Contract to index; takes precedence over `NETWORKS_FILE`
//! - `CONTRACT_NAME`: Contract name used with `CONTRACT_ADDRESS` (default: `TrixyEvents`)
//! - `START_BLOCK`: Start height used with `CONTRACT_ADDRESS` (default: 0)
//! - `WINDOW_SIZE`: Heights per sync window (default: 200)
//! - `POLL_INTERVAL_SECS`: Delay between up-to-date checks (default: 2)
//! - `RETRY_DELAY_SECS`: Base delay after a transient failure (default: 2)
//!
//! ## Networks file
//!
//! ```json
//! {
//!   "testnet": {
//!     "contracts": [
//!       { "name": "TrixyEvents", "address": "0x1234abcd5678ef90", "startBlock": 250000000 }
//!     ]
//!   }
//! }
//! ```
//!
//! Only the first contract of the selected network is indexed.
//!
//! ## Example
//!
//! ```no_run
//! use trixy_flow_indexer::config::Config;
//! use trixy_flow_indexer::error::IndexerResult;
//!
//! # fn main() -> IndexerResult<()> {
//! let config = Config::from_env()?;
//! println!("Indexing {} on {}", config.contract().address(), config.network());
//! # Ok(())
//! # }
//! ```

use crate::error::{IndexerError, IndexerResult};
use crate::sync::SyncSettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest height range the Flow Access API serves in one events query.
pub const MAX_WINDOW_SIZE: u64 = 250;

const DEFAULT_ACCESS_URL: &str = "https://rest-testnet.onflow.org";
const DEFAULT_NETWORK: &str = "testnet";
const DEFAULT_DATABASE_URL: &str = "sqlite:./trixy-indexer.db";
const DEFAULT_NETWORKS_FILE: &str = "./networks.json";
const DEFAULT_CONTRACT_NAME: &str = "TrixyEvents";

/// A monitored contract as resolved at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractConfig {
    name: String,
    /// Lowercase, `0x`-prefixed hex address
    address: String,
    start_block: u64,
}

impl ContractConfig {
    /// Build a contract entry, normalizing and validating the address.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the address is not 1-16 hex digits
    /// with an optional `0x` prefix.
    pub fn new(
        name: impl Into<String>,
        address: &str,
        start_block: u64,
    ) -> IndexerResult<Self> {
        Ok(Self {
            name: name.into(),
            address: normalize_address(address)?,
            start_block,
        })
    }

    /// Contract name (e.g. `TrixyEvents`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contract address with `0x` prefix.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Contract address without the `0x` prefix, as used in Cadence type ids.
    #[must_use]
    pub fn bare_address(&self) -> &str {
        self.address.trim_start_matches("0x")
    }

    /// Height the sync cursor is seeded with on first run.
    #[must_use]
    pub const fn start_block(&self) -> u64 {
        self.start_block
    }
}

/// Main configuration struct for the indexer.
///
/// Contains all runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Flow Access REST endpoint
    access_url: String,

    /// Network identifier (e.g. `testnet`, `mainnet`)
    network: String,

    /// SQLite database URL
    database_url: String,

    /// The contract being indexed
    contract: ContractConfig,

    /// Heights per sync window
    window_size: u64,

    /// Up-to-date polling interval in seconds
    poll_interval_secs: u64,

    /// Base retry delay in seconds after transient failures
    retry_delay_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This function:
    /// 1. Loads `.env` file using `dotenvy` (if present)
    /// 2. Reads and validates all environment variables
    /// 3. Resolves the monitored contract from `CONTRACT_ADDRESS` or the networks file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Numeric variables are not valid numbers
    /// - The window size is zero or above [`MAX_WINDOW_SIZE`]
    /// - The poll interval is zero
    /// - No contract can be resolved for the selected network
    pub fn from_env() -> IndexerResult<Self> {
        // Load .env file if present (ignore error if file doesn't exist)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// [`Config::from_env`] delegates here with `std::env::var`.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> IndexerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let access_url = lookup("FLOW_ACCESS_URL")
            .unwrap_or_else(|| DEFAULT_ACCESS_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        if !access_url.starts_with("http://") && !access_url.starts_with("https://") {
            return Err(IndexerError::config(
                format!("FLOW_ACCESS_URL must be an http(s) URL, got: {access_url}"),
                None,
            ));
        }

        let network = lookup("FLOW_NETWORK").unwrap_or_else(|| DEFAULT_NETWORK.to_string());
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let window_size = parse_u64(&lookup, "WINDOW_SIZE", 200)?;
        validate_window_size(window_size)?;

        let poll_interval_secs = parse_u64(&lookup, "POLL_INTERVAL_SECS", 2)?;
        validate_poll_interval(poll_interval_secs)?;
        let retry_delay_secs = parse_u64(&lookup, "RETRY_DELAY_SECS", 2)?;

        // An explicit contract address wins over the networks file
        let contract = if let Some(address) = lookup("CONTRACT_ADDRESS") {
            let name =
                lookup("CONTRACT_NAME").unwrap_or_else(|| DEFAULT_CONTRACT_NAME.to_string());
            let start_block = parse_u64(&lookup, "START_BLOCK", 0)?;
            ContractConfig::new(name, &address, start_block)?
        } else {
            let path: PathBuf = lookup("NETWORKS_FILE")
                .unwrap_or_else(|| DEFAULT_NETWORKS_FILE.to_string())
                .into();
            let contracts = load_contracts(&path, &network)?;
            contracts.into_iter().next().ok_or_else(|| {
                IndexerError::config(
                    format!("No contracts configured for network '{network}'"),
                    None,
                )
            })?
        };

        Ok(Self {
            access_url,
            network,
            database_url,
            contract,
            window_size,
            poll_interval_secs,
            retry_delay_secs,
        })
    }

    /// Override the window size (CLI flag).
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or above [`MAX_WINDOW_SIZE`].
    pub fn set_window_size(&mut self, window_size: u64) -> IndexerResult<()> {
        validate_window_size(window_size)?;
        self.window_size = window_size;
        Ok(())
    }

    /// Override the poll interval (CLI flag).
    ///
    /// # Errors
    ///
    /// Returns an error if `secs` is zero.
    pub fn set_poll_interval_secs(&mut self, secs: u64) -> IndexerResult<()> {
        validate_poll_interval(secs)?;
        self.poll_interval_secs = secs;
        Ok(())
    }

    /// Get the Flow Access REST endpoint.
    #[must_use]
    pub fn access_url(&self) -> &str {
        &self.access_url
    }

    /// Get the network identifier.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Get the database URL.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Get the monitored contract.
    #[must_use]
    pub const fn contract(&self) -> &ContractConfig {
        &self.contract
    }

    /// Get the window size (heights per sync window).
    #[must_use]
    pub const fn window_size(&self) -> u64 {
        self.window_size
    }

    /// Get the polling interval in seconds.
    #[must_use]
    pub const fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
    }

    /// Get the base retry delay in seconds.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> u64 {
        self.retry_delay_secs
    }

    /// Settings handed to the sync controller.
    #[must_use]
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            contract_address: self.contract.address().to_string(),
            contract_name: self.contract.name().to_string(),
            network: self.network.clone(),
            start_block: self.contract.start_block(),
            window_size: self.window_size,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            retry_delay: Duration::from_secs(self.retry_delay_secs.max(1)),
        }
    }
}

/// One entry of the networks file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractEntry {
    name: String,
    address: String,
    #[serde(default)]
    start_block: u64,
}

#[derive(Debug, Deserialize)]
struct NetworkEntry {
    #[serde(default)]
    contracts: Vec<ContractEntry>,
}

/// Load the contracts configured for `network` from a JSON networks file.
///
/// # Errors
///
/// Returns a configuration error if the file cannot be read or parsed, the
/// network is missing, or an address is malformed.
pub fn load_contracts(path: &Path, network: &str) -> IndexerResult<Vec<ContractConfig>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        IndexerError::config(
            format!("Failed to read networks file {}", path.display()),
            Some(Box::new(e)),
        )
    })?;

    parse_contracts(&raw, network)
}

fn parse_contracts(raw: &str, network: &str) -> IndexerResult<Vec<ContractConfig>> {
    let mut networks: HashMap<String, NetworkEntry> = serde_json::from_str(raw)
        .map_err(|e| IndexerError::config("Malformed networks file", Some(Box::new(e))))?;

    let entry = networks.remove(network).ok_or_else(|| {
        IndexerError::config(
            format!("Network '{network}' not found in networks file"),
            None,
        )
    })?;

    entry
        .contracts
        .into_iter()
        .map(|c| ContractConfig::new(c.name, &c.address, c.start_block))
        .collect()
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> IndexerResult<u64>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map_or(Ok(default), |raw| {
        raw.trim().parse::<u64>().map_err(|e| {
            IndexerError::config(format!("{key} must be a valid number"), Some(Box::new(e)))
        })
    })
}

fn validate_poll_interval(secs: u64) -> IndexerResult<()> {
    if secs == 0 {
        return Err(IndexerError::config(
            "POLL_INTERVAL_SECS must be at least 1",
            None,
        ));
    }
    Ok(())
}

fn validate_window_size(window_size: u64) -> IndexerResult<()> {
    if window_size == 0 || window_size > MAX_WINDOW_SIZE {
        return Err(IndexerError::config(
            format!("WINDOW_SIZE must be between 1 and {MAX_WINDOW_SIZE}, got: {window_size}"),
            None,
        ));
    }
    Ok(())
}

/// Normalize a Flow address to lowercase `0x`-prefixed hex.
fn normalize_address(address: &str) -> IndexerResult<String> {
    let trimmed = address.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if hex.is_empty() || hex.len() > 16 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IndexerError::config(
            format!("Invalid Flow address: '{address}' (expected up to 16 hex digits)"),
            None,
        ));
    }

    Ok(format!("0x{}", hex.to_ascii_lowercase()))
}
