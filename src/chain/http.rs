//! Flow Access REST API client.
//!
//! This module implements [`ChainClient`] over the public Flow Access REST
//! API (`/v1/blocks`, `/v1/events`). Event payloads arrive base64-encoded and
//! are decoded to JSON-Cadence here; interpreting the fields is left to the
//! event decoder.
//!
//! ## Example
//!
//! ```no_run
//! use trixy_flow_indexer::chain::{ChainClient, FlowHttpClient};
//! use trixy_flow_indexer::error::IndexerResult;
//!
//! # async fn example() -> IndexerResult<()> {
//! let client = FlowHttpClient::new("https://rest-testnet.onflow.org")?;
//! let latest = client.latest_height().await?;
//! println!("Latest sealed height: {latest}");
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use eyre::WrapErr;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{BlockEvents, BlockHeader, ChainClient, RawEvent};
use crate::error::{IndexerError, IndexerResult};

/// Per-request timeout for access node calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct BlockResponse {
    header: BlockHeaderResponse,
}

#[derive(Debug, Deserialize)]
struct BlockHeaderResponse {
    height: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct BlockEventsResponse {
    block_height: String,
    #[serde(default)]
    events: Vec<EventResponse>,
}

#[derive(Debug, Deserialize)]
struct EventResponse {
    #[serde(rename = "type")]
    event_type: String,
    transaction_id: String,
    event_index: String,
    payload: String,
}

/// HTTP client for a Flow Access node.
#[derive(Debug, Clone)]
pub struct FlowHttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl FlowHttpClient {
    /// Create a client for the access node at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not http(s) or the HTTP client cannot
    /// be built.
    #[instrument(skip(base_url), fields(access_host = tracing::field::Empty))]
    pub fn new(base_url: &str) -> IndexerResult<Self> {
        info!("Initializing Flow access client");

        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(IndexerError::rpc(
                format!(
                    "Invalid access node URL: '{base_url}'. Expected format: 'https://rest-testnet.onflow.org'"
                ),
                None,
            ));
        }
        tracing::Span::current().record("access_host", base_url.as_str());

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| IndexerError::rpc("Failed to build HTTP client", Some(Box::new(e))))?;

        Ok(Self { client, base_url })
    }

    /// Base URL of the access node.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> IndexerResult<T> {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| IndexerError::rpc(format!("Request to {path} failed"), Some(Box::new(e))))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexerError::rpc(
                format!("{path} returned {status}: {}", body.trim()),
                None,
            ));
        }

        response.json::<T>().await.map_err(|e| {
            IndexerError::rpc(
                format!("Failed to parse {path} response"),
                Some(Box::new(e)),
            )
        })
    }

    async fn fetch_block(&self, height: &str) -> IndexerResult<BlockHeader> {
        let blocks: Vec<BlockResponse> = self
            .get_json("/v1/blocks", &[("height", height.to_string())])
            .await?;

        let block = blocks
            .into_iter()
            .next()
            .ok_or_else(|| IndexerError::rpc(format!("No block returned for height {height}"), None))?;

        Ok(parse_header(&block.header)?)
    }
}

fn parse_height(raw: &str) -> eyre::Result<u64> {
    raw.parse::<u64>()
        .wrap_err_with(|| format!("invalid height '{raw}'"))
}

fn parse_header(header: &BlockHeaderResponse) -> eyre::Result<BlockHeader> {
    let height = parse_height(&header.height)?;
    let timestamp = chrono::DateTime::parse_from_rfc3339(&header.timestamp)
        .wrap_err_with(|| format!("invalid block timestamp '{}'", header.timestamp))?
        .timestamp();

    Ok(BlockHeader { height, timestamp })
}

fn decode_payload(raw: &str) -> eyre::Result<serde_json::Value> {
    let bytes = BASE64
        .decode(raw.trim())
        .wrap_err("event payload is not valid base64")?;
    serde_json::from_slice(&bytes).wrap_err("event payload is not valid JSON")
}

/// Parse one event of a block.
///
/// A payload that is not base64 JSON is kept as its raw text so the decoder
/// rejects it and the event lands in the dead-letter table. Only an event
/// index that cannot be parsed drops the event here.
fn parse_event(event: EventResponse) -> eyre::Result<RawEvent> {
    let event_index = event
        .event_index
        .parse::<u32>()
        .wrap_err_with(|| format!("invalid event index '{}'", event.event_index))?;

    let payload = decode_payload(&event.payload).unwrap_or_else(|e| {
        warn!(
            transaction_id = %event.transaction_id,
            event_index,
            error = %format!("{e:#}"),
            "Keeping undecodable payload as text"
        );
        serde_json::Value::String(event.payload.clone())
    });

    Ok(RawEvent {
        event_type: event.event_type,
        transaction_id: event.transaction_id,
        event_index,
        payload,
    })
}

/// Parse one block of events, skipping only the events that cannot be keyed.
fn parse_block_events(block: BlockEventsResponse) -> eyre::Result<BlockEvents> {
    let block_height = parse_height(&block.block_height)?;

    let mut events = Vec::with_capacity(block.events.len());
    for event in block.events {
        let transaction_id = event.transaction_id.clone();
        match parse_event(event) {
            Ok(raw) => events.push(raw),
            Err(e) => warn!(
                block_height,
                transaction_id = %transaction_id,
                error = %format!("{e:#}"),
                "Skipping event with unusable metadata"
            ),
        }
    }

    Ok(BlockEvents {
        block_height,
        events,
    })
}

/// Parse every block, skipping blocks whose height cannot be read.
fn parse_blocks(event_type: &str, blocks: Vec<BlockEventsResponse>) -> Vec<BlockEvents> {
    blocks
        .into_iter()
        .filter_map(|block| {
            let raw_height = block.block_height.clone();
            parse_block_events(block)
                .map_err(|e| {
                    warn!(
                        event_type,
                        block_height = %raw_height,
                        error = %format!("{e:#}"),
                        "Skipping block with unusable height"
                    );
                })
                .ok()
        })
        .collect()
}

#[async_trait]
impl ChainClient for FlowHttpClient {
    #[instrument(skip(self), fields(height = tracing::field::Empty, duration_ms = tracing::field::Empty))]
    async fn latest_height(&self) -> IndexerResult<u64> {
        debug!("Fetching latest sealed block");

        let start = std::time::Instant::now();
        let header = self.fetch_block("sealed").await?;

        let duration = start.elapsed();
        tracing::Span::current().record("height", header.height);
        tracing::Span::current().record("duration_ms", duration.as_millis() as u64);

        debug!(
            height = header.height,
            duration_ms = duration.as_millis(),
            "Latest sealed block fetched"
        );

        Ok(header.height)
    }

    #[instrument(skip(self), fields(blocks = tracing::field::Empty))]
    async fn events_for_height_range(
        &self,
        event_type: &str,
        start_height: u64,
        end_height: u64,
    ) -> IndexerResult<Vec<BlockEvents>> {
        let blocks: Vec<BlockEventsResponse> = self
            .get_json(
                "/v1/events",
                &[
                    ("type", event_type.to_string()),
                    ("start_height", start_height.to_string()),
                    ("end_height", end_height.to_string()),
                ],
            )
            .await?;

        tracing::Span::current().record("blocks", blocks.len());

        Ok(parse_blocks(event_type, blocks))
    }

    #[instrument(skip(self))]
    async fn block_by_height(&self, height: u64) -> IndexerResult<BlockHeader> {
        self.fetch_block(&height.to_string()).await
    }
}
