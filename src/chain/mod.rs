//! Flow chain access.
//!
//! The sync pipeline talks to the chain only through the [`ChainClient`]
//! trait. [`http::FlowHttpClient`] implements it against the Flow Access REST
//! API; tests drive the pipeline with scripted in-memory clients.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │      SyncController      │
//! └────────────┬─────────────┘
//!              │ ChainClient
//!      ┌───────▼────────┐
//!      │ FlowHttpClient │──► GET /v1/blocks, /v1/events
//!      └────────────────┘
//! ```

pub mod cadence;
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::IndexerResult;

pub use http::FlowHttpClient;

/// Header fields of a block the pipeline needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block height
    pub height: u64,
    /// Block timestamp (Unix epoch seconds)
    pub timestamp: i64,
}

/// A single event as returned by the access node, payload still undecoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Fully qualified event type, e.g. `A.0123.TrixyEvents.BetPlaced`
    pub event_type: String,
    /// Hex id of the emitting transaction
    pub transaction_id: String,
    /// Index of the event within its transaction
    pub event_index: u32,
    /// JSON-Cadence payload
    pub payload: serde_json::Value,
}

/// Events of one type emitted in one block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEvents {
    /// Height of the block containing the events
    pub block_height: u64,
    /// Events in emission order
    pub events: Vec<RawEvent>,
}

/// Read access to a Flow network.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Height of the latest sealed block.
    async fn latest_height(&self) -> IndexerResult<u64>;

    /// Events of `event_type` in the inclusive range `[start_height, end_height]`.
    async fn events_for_height_range(
        &self,
        event_type: &str,
        start_height: u64,
        end_height: u64,
    ) -> IndexerResult<Vec<BlockEvents>>;

    /// Header of the block at `height`.
    async fn block_by_height(&self, height: u64) -> IndexerResult<BlockHeader>;
}

#[async_trait]
impl<T> ChainClient for Arc<T>
where
    T: ChainClient + ?Sized,
{
    async fn latest_height(&self) -> IndexerResult<u64> {
        (**self).latest_height().await
    }

    async fn events_for_height_range(
        &self,
        event_type: &str,
        start_height: u64,
        end_height: u64,
    ) -> IndexerResult<Vec<BlockEvents>> {
        (**self)
            .events_for_height_range(event_type, start_height, end_height)
            .await
    }

    async fn block_by_height(&self, height: u64) -> IndexerResult<BlockHeader> {
        (**self).block_by_height(height).await
    }
}
