//! Per-kind event retrieval for one height window.

use std::collections::HashMap;

use tracing::{debug, instrument, warn};

use crate::chain::{ChainClient, RawEvent};
use crate::events::EventKind;

/// A raw event together with the block it was emitted in.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedEvent {
    /// Kind the event was queried as
    pub kind: EventKind,
    /// Undecoded event
    pub raw: RawEvent,
    /// Height of the containing block
    pub block_height: u64,
    /// Timestamp of the containing block (Unix epoch seconds)
    pub block_timestamp: i64,
}

/// Everything retrieved for one window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowBatch {
    /// Events whose block could be resolved, grouped by kind in query order
    pub events: Vec<RetrievedEvent>,
    /// Kinds whose query failed; skipped for this window
    pub failed_kinds: Vec<EventKind>,
    /// Events dropped because their block header could not be fetched
    pub unresolved_events: usize,
}

/// Fetches the monitored contract's events, one kind at a time.
#[derive(Debug, Clone)]
pub struct BatchRetriever<C> {
    client: C,
    contract_address: String,
    kinds: Vec<EventKind>,
}

impl<C: ChainClient> BatchRetriever<C> {
    /// Retriever for every [`EventKind`] of `contract_address`.
    pub fn new(client: C, contract_address: impl Into<String>) -> Self {
        Self::with_kinds(client, contract_address, EventKind::ALL.to_vec())
    }

    /// Retriever limited to `kinds`, queried in the given order.
    pub fn with_kinds(client: C, contract_address: impl Into<String>, kinds: Vec<EventKind>) -> Self {
        Self {
            client,
            contract_address: contract_address.into(),
            kinds,
        }
    }

    /// Chain client used for queries.
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Kinds queried per window.
    pub fn kinds(&self) -> &[EventKind] {
        &self.kinds
    }

    /// Retrieve all events in `[start_height, end_height]`.
    ///
    /// Never fails as a whole: a failed kind query is logged and recorded in
    /// [`WindowBatch::failed_kinds`], and an event whose block cannot be
    /// fetched is dropped and counted.
    #[instrument(skip(self), fields(contract = %self.contract_address))]
    pub async fn fetch_window(&self, start_height: u64, end_height: u64) -> WindowBatch {
        let mut batch = WindowBatch::default();
        let mut timestamps: HashMap<u64, i64> = HashMap::new();

        for &kind in &self.kinds {
            let event_type = kind.qualified_type(&self.contract_address);

            let blocks = match self
                .client
                .events_for_height_range(&event_type, start_height, end_height)
                .await
            {
                Ok(blocks) => blocks,
                Err(e) => {
                    warn!(
                        kind = %kind,
                        start_height,
                        end_height,
                        error = %e,
                        "Failed to query events, skipping kind for this window"
                    );
                    batch.failed_kinds.push(kind);
                    continue;
                }
            };

            for block in blocks {
                for raw in block.events {
                    let timestamp = match timestamps.get(&block.block_height) {
                        Some(ts) => *ts,
                        None => match self.client.block_by_height(block.block_height).await {
                            Ok(header) => {
                                timestamps.insert(block.block_height, header.timestamp);
                                header.timestamp
                            }
                            Err(e) => {
                                warn!(
                                    kind = %kind,
                                    block_height = block.block_height,
                                    transaction_id = %raw.transaction_id,
                                    error = %e,
                                    "Failed to fetch block, skipping event"
                                );
                                batch.unresolved_events += 1;
                                continue;
                            }
                        },
                    };

                    batch.events.push(RetrievedEvent {
                        kind,
                        raw,
                        block_height: block.block_height,
                        block_timestamp: timestamp,
                    });
                }
            }
        }

        debug!(
            events = batch.events.len(),
            failed_kinds = batch.failed_kinds.len(),
            blocks_fetched = timestamps.len(),
            "Window retrieved"
        );

        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{BlockEvents, BlockHeader};
    use crate::error::{IndexerError, IndexerResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Two BetPlaced events in block 10, everything else fails or is empty.
    struct FakeChain {
        block_calls: AtomicUsize,
        fail_block: Option<u64>,
    }

    fn raw(index: u32) -> RawEvent {
        RawEvent {
            event_type: "A.01.TrixyEvents.BetPlaced".to_string(),
            transaction_id: "aa".to_string(),
            event_index: index,
            payload: serde_json::json!({}),
        }
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn latest_height(&self) -> IndexerResult<u64> {
            Ok(20)
        }

        async fn events_for_height_range(
            &self,
            event_type: &str,
            _start_height: u64,
            _end_height: u64,
        ) -> IndexerResult<Vec<BlockEvents>> {
            if event_type.ends_with(".MarketCreated") {
                return Err(IndexerError::rpc("boom", None));
            }
            if event_type.ends_with(".BetPlaced") {
                return Ok(vec![
                    BlockEvents {
                        block_height: 10,
                        events: vec![raw(0), raw(1)],
                    },
                    BlockEvents {
                        block_height: 11,
                        events: vec![raw(2)],
                    },
                ]);
            }
            Ok(Vec::new())
        }

        async fn block_by_height(&self, height: u64) -> IndexerResult<BlockHeader> {
            self.block_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_block == Some(height) {
                return Err(IndexerError::rpc("no block", None));
            }
            Ok(BlockHeader {
                height,
                timestamp: 1_700_000_000 + height as i64,
            })
        }
    }

    #[tokio::test]
    async fn test_failed_kind_does_not_stop_others() {
        let chain = FakeChain {
            block_calls: AtomicUsize::new(0),
            fail_block: None,
        };
        let retriever = BatchRetriever::new(chain, "0x01");

        let batch = retriever.fetch_window(1, 20).await;
        assert_eq!(batch.failed_kinds, vec![EventKind::MarketCreated]);
        assert_eq!(batch.events.len(), 3);
        assert!(batch.events.iter().all(|e| e.kind == EventKind::BetPlaced));
        assert_eq!(batch.events[0].block_timestamp, 1_700_000_010);
    }

    #[tokio::test]
    async fn test_block_timestamps_are_memoized() {
        let chain = FakeChain {
            block_calls: AtomicUsize::new(0),
            fail_block: None,
        };
        let retriever = BatchRetriever::new(chain, "0x01");

        retriever.fetch_window(1, 20).await;
        assert_eq!(retriever.client().block_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_block_failure_skips_only_its_events() {
        let chain = FakeChain {
            block_calls: AtomicUsize::new(0),
            fail_block: Some(11),
        };
        let retriever = BatchRetriever::new(chain, "0x01");

        let batch = retriever.fetch_window(1, 20).await;
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.unresolved_events, 1);
    }
}
