//! Event sync pipeline.
//!
//! The pipeline pulls Trixy events out of a Flow network window by window and
//! writes them to the store:
//!
//! ```text
//! SyncCursor ──► SyncController ──► BatchRetriever ──► ChainClient
//!      ▲               │
//!      │               ├──► decode_raw
//!      └── save ◄──────┴──► RecordSink
//! ```
//!
//! The controller depends only on the [`SyncCursor`] and [`RecordSink`]
//! traits defined here; [`Repository`] implements both against SQLite.

pub mod backoff;
pub mod controller;
pub mod retriever;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::db::models::{SkippedEventRecord, SyncStateRecord};
use crate::db::{PersistOutcome, Repository};
use crate::error::IndexerResult;
use crate::events::EventRecord;

pub use backoff::Backoff;
pub use controller::{
    next_window, CatchUpSummary, NoopObserver, SyncController, SyncObserver, SyncPhase, WindowReport,
};
pub use retriever::{BatchRetriever, RetrievedEvent, WindowBatch};

/// Everything the controller needs to know about the contract it follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Contract address, lowercase `0x` hex
    pub contract_address: String,
    /// Contract name, stored with the sync state
    pub contract_name: String,
    /// Network identifier, stored with the sync state
    pub network: String,
    /// Height the cursor is seeded at on first run
    pub start_block: u64,
    /// Maximum number of heights per window
    pub window_size: u64,
    /// Sleep between polls once caught up
    pub poll_interval: Duration,
    /// Base delay after a transient failure
    pub retry_delay: Duration,
}

/// Durable per-contract "last processed height".
#[async_trait]
pub trait SyncCursor: Send + Sync {
    /// Stored height, or `None` on the first run for this contract.
    async fn load(&self, contract_address: &str) -> IndexerResult<Option<u64>>;

    /// Seed a fresh cursor at `settings.start_block`.
    async fn create(&self, settings: &SyncSettings) -> IndexerResult<()>;

    /// Persist a new height. Must never lower the stored value.
    async fn save(&self, contract_address: &str, height: u64) -> IndexerResult<()>;
}

/// Idempotent destination for decoded records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Store a record; an already stored `(transaction_id, event_index)`
    /// yields [`PersistOutcome::Duplicate`].
    async fn persist(&self, record: &EventRecord) -> IndexerResult<PersistOutcome>;

    /// Keep an undecodable event for later inspection.
    async fn dead_letter(&self, skipped: &SkippedEventRecord) -> IndexerResult<()>;
}

#[async_trait]
impl SyncCursor for Repository {
    async fn load(&self, contract_address: &str) -> IndexerResult<Option<u64>> {
        Ok(self
            .get_sync_state(contract_address)
            .await?
            .map(|state| state.height()))
    }

    async fn create(&self, settings: &SyncSettings) -> IndexerResult<()> {
        let state = SyncStateRecord::new(
            settings.contract_address.as_str(),
            settings.contract_name.as_str(),
            settings.network.as_str(),
            settings.start_block,
        );
        self.create_sync_state(&state).await
    }

    async fn save(&self, contract_address: &str, height: u64) -> IndexerResult<()> {
        self.advance_sync_state(contract_address, height).await
    }
}

#[async_trait]
impl RecordSink for Repository {
    async fn persist(&self, record: &EventRecord) -> IndexerResult<PersistOutcome> {
        self.insert_event(record).await
    }

    async fn dead_letter(&self, skipped: &SkippedEventRecord) -> IndexerResult<()> {
        self.insert_skipped_event(skipped).await.map(|_| ())
    }
}

#[async_trait]
impl<T> SyncCursor for Arc<T>
where
    T: SyncCursor + ?Sized,
{
    async fn load(&self, contract_address: &str) -> IndexerResult<Option<u64>> {
        (**self).load(contract_address).await
    }

    async fn create(&self, settings: &SyncSettings) -> IndexerResult<()> {
        (**self).create(settings).await
    }

    async fn save(&self, contract_address: &str, height: u64) -> IndexerResult<()> {
        (**self).save(contract_address, height).await
    }
}

#[async_trait]
impl<T> RecordSink for Arc<T>
where
    T: RecordSink + ?Sized,
{
    async fn persist(&self, record: &EventRecord) -> IndexerResult<PersistOutcome> {
        (**self).persist(record).await
    }

    async fn dead_letter(&self, skipped: &SkippedEventRecord) -> IndexerResult<()> {
        (**self).dead_letter(skipped).await
    }
}
