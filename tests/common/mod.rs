//! Shared fixtures: a scripted in-memory Flow chain and payload builders.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use trixy_flow_indexer::chain::{BlockEvents, BlockHeader, ChainClient, RawEvent};
use trixy_flow_indexer::db::{create_pool, Repository};
use trixy_flow_indexer::error::{IndexerError, IndexerResult};
use trixy_flow_indexer::events::EventKind;
use trixy_flow_indexer::sync::SyncSettings;

pub const CONTRACT: &str = "0x0123456789abcdef";
pub const BASE_TIMESTAMP: i64 = 1_700_000_000;

/// Chain whose events, head and failures are set by the test.
#[derive(Default)]
pub struct ScriptedChain {
    latest: AtomicU64,
    head_down: AtomicBool,
    head_calls: AtomicUsize,
    events: Mutex<Vec<(String, u64, RawEvent)>>,
    failing_types: Mutex<HashSet<String>>,
    range_queries: Mutex<Vec<(u64, u64)>>,
    block_calls: AtomicUsize,
}

impl ScriptedChain {
    pub fn new(latest: u64) -> Self {
        let chain = Self::default();
        chain.set_latest(latest);
        chain
    }

    pub fn set_latest(&self, height: u64) {
        self.latest.store(height, Ordering::SeqCst);
    }

    /// While set, `latest_height` fails like an unreachable access node.
    pub fn set_head_down(&self, down: bool) {
        self.head_down.store(down, Ordering::SeqCst);
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn push(&self, kind: EventKind, height: u64, tx: &str, index: u32, payload: Value) {
        let event_type = kind.qualified_type(CONTRACT);
        let raw = RawEvent {
            event_type: event_type.clone(),
            transaction_id: tx.to_string(),
            event_index: index,
            payload,
        };
        self.events.lock().unwrap().push((event_type, height, raw));
    }

    pub fn fail_kind(&self, kind: EventKind) {
        self.failing_types
            .lock()
            .unwrap()
            .insert(kind.qualified_type(CONTRACT));
    }

    /// Distinct `(start, end)` ranges queried, in order.
    pub fn windows(&self) -> Vec<(u64, u64)> {
        let mut windows: Vec<(u64, u64)> = Vec::new();
        for range in self.range_queries.lock().unwrap().iter() {
            if windows.last() != Some(range) {
                windows.push(*range);
            }
        }
        windows
    }

    /// Every range query made, one per kind per window attempt.
    pub fn query_count(&self) -> usize {
        self.range_queries.lock().unwrap().len()
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn latest_height(&self) -> IndexerResult<u64> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if self.head_down.load(Ordering::SeqCst) {
            return Err(IndexerError::rpc("access node unreachable", None));
        }
        Ok(self.latest.load(Ordering::SeqCst))
    }

    async fn events_for_height_range(
        &self,
        event_type: &str,
        start_height: u64,
        end_height: u64,
    ) -> IndexerResult<Vec<BlockEvents>> {
        self.range_queries
            .lock()
            .unwrap()
            .push((start_height, end_height));

        if self.failing_types.lock().unwrap().contains(event_type) {
            return Err(IndexerError::rpc(format!("{event_type} unavailable"), None));
        }

        let mut by_height: BTreeMap<u64, Vec<RawEvent>> = BTreeMap::new();
        for (t, height, raw) in self.events.lock().unwrap().iter() {
            if t == event_type && (start_height..=end_height).contains(height) {
                by_height.entry(*height).or_default().push(raw.clone());
            }
        }

        Ok(by_height
            .into_iter()
            .map(|(block_height, events)| BlockEvents {
                block_height,
                events,
            })
            .collect())
    }

    async fn block_by_height(&self, height: u64) -> IndexerResult<BlockHeader> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        Ok(BlockHeader {
            height,
            timestamp: BASE_TIMESTAMP + height as i64,
        })
    }
}

pub fn settings(start_block: u64, window_size: u64) -> SyncSettings {
    SyncSettings {
        contract_address: CONTRACT.to_string(),
        contract_name: "TrixyEvents".to_string(),
        network: "emulator".to_string(),
        start_block,
        window_size,
        poll_interval: Duration::from_millis(10),
        retry_delay: Duration::from_millis(10),
    }
}

pub async fn memory_repo() -> Repository {
    Repository::new(create_pool("sqlite::memory:").await.unwrap())
}

pub async fn rows(repo: &Repository, table: &str) -> i64 {
    repo.table_counts()
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.table == table)
        .map(|c| c.rows)
        .unwrap()
}

// ==================== JSON-Cadence builders ====================

pub fn uint64(v: u64) -> Value {
    json!({"type": "UInt64", "value": v.to_string()})
}

pub fn uint32(v: u32) -> Value {
    json!({"type": "UInt32", "value": v.to_string()})
}

pub fn ufix(v: &str) -> Value {
    json!({"type": "UFix64", "value": v})
}

pub fn string(v: &str) -> Value {
    json!({"type": "String", "value": v})
}

pub fn address(v: &str) -> Value {
    json!({"type": "Address", "value": v})
}

pub fn optional(v: Option<Value>) -> Value {
    json!({"type": "Optional", "value": v})
}

pub fn array(items: Vec<Value>) -> Value {
    json!({"type": "Array", "value": items})
}

pub fn dictionary(entries: Vec<(Value, Value)>) -> Value {
    let entries: Vec<Value> = entries
        .into_iter()
        .map(|(k, v)| json!({"key": k, "value": v}))
        .collect();
    json!({"type": "Dictionary", "value": entries})
}

pub fn event(kind: EventKind, fields: Vec<(&str, Value)>) -> Value {
    let fields: Vec<Value> = fields
        .into_iter()
        .map(|(name, value)| json!({"name": name, "value": value}))
        .collect();
    json!({
        "type": "Event",
        "value": {"id": kind.qualified_type(CONTRACT), "fields": fields}
    })
}

pub fn market_created(market_id: u64, options_field: &str) -> Value {
    event(
        EventKind::MarketCreated,
        vec![
            ("marketId", uint64(market_id)),
            ("question", string("Which protocol yields more?")),
            ("endTime", ufix("1735689600.00000000")),
            (options_field, array(vec![string("aave"), string("compound")])),
            ("creator", address("0x01cf0e2f2f715450")),
        ],
    )
}

pub fn bet_placed(market_id: u64, amount: &str) -> Value {
    event(
        EventKind::BetPlaced,
        vec![
            ("marketId", uint64(market_id)),
            ("user", address("0x0000000000000abc")),
            ("selectedOption", string("aave")),
            ("amount", ufix(amount)),
        ],
    )
}

pub fn market_resolved(market_id: u64) -> Value {
    event(
        EventKind::MarketResolved,
        vec![
            ("marketId", uint64(market_id)),
            ("winningOption", string("aave")),
            (
                "finalAPYs",
                dictionary(vec![
                    (string("aave"), ufix("4.20000000")),
                    (string("compound"), ufix("3.10000000")),
                ]),
            ),
            ("resolvedAt", ufix("1735689700.00000000")),
        ],
    )
}

pub fn winnings_claimed(market_id: u64) -> Value {
    event(
        EventKind::WinningsClaimed,
        vec![
            ("marketId", uint64(market_id)),
            ("user", address("0x0000000000000abc")),
            ("payout", ufix("25.00000000")),
        ],
    )
}

pub fn yield_deposited(market_id: u64) -> Value {
    event(
        EventKind::YieldDeposited,
        vec![
            ("userAddress", address("0x0000000000000abc")),
            ("protocolName", string("aave")),
            ("amount", ufix("12.50000000")),
            ("marketId", uint64(market_id)),
        ],
    )
}

pub fn yield_withdrawn(market_id: u64) -> Value {
    event(
        EventKind::YieldWithdrawn,
        vec![
            ("marketId", uint64(market_id)),
            ("protocol", string("aave")),
            ("amount", ufix("12.50000000")),
            ("yieldEarned", ufix("0.52000000")),
        ],
    )
}

/// One event of every kind, spread over heights 10..=460.
pub fn script_full_market(chain: &ScriptedChain) {
    chain.push(EventKind::MarketCreated, 10, "tx01", 0, market_created(1, "options"));
    chain.push(EventKind::BetPlaced, 120, "tx02", 0, bet_placed(1, "12.50000000"));
    chain.push(EventKind::YieldDeposited, 120, "tx02", 1, yield_deposited(1));
    chain.push(EventKind::MarketResolved, 310, "tx03", 0, market_resolved(1));
    chain.push(EventKind::YieldWithdrawn, 310, "tx03", 1, yield_withdrawn(1));
    chain.push(EventKind::WinningsClaimed, 460, "tx04", 0, winnings_claimed(1));
}
