//! Database models that map to SQL tables.
//!
//! The six event records are immutable once stored; each table enforces
//! `UNIQUE (transaction_id, event_index)` so re-ingesting a window is a no-op.
//! Amounts are kept as exact decimal strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::events::{EventKind, EventMeta};

/// `MarketCreated` event. Maps to `flow_market_createds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketCreatedRecord {
    /// Market identifier
    pub market_id: u64,
    /// Market question text
    pub question: String,
    /// Market end time, whole Unix seconds as text
    pub end_time: String,
    /// Selectable options (stored as a JSON array)
    pub options: Vec<String>,
    /// Yield protocol backing the market; empty when the event has none
    pub yield_protocol: String,
    /// Creator address
    pub creator: String,
    /// Block and transaction position
    #[serde(flatten)]
    pub meta: EventMeta,
}

/// `BetPlaced` event. Maps to `flow_bet_placeds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetPlacedRecord {
    /// Market identifier
    pub market_id: u64,
    /// Bettor address
    pub user: String,
    /// Option the bet was placed on
    pub selected_option: String,
    /// Index of the yield protocol; 0 when the event has none
    pub protocol_index: u32,
    /// Stake (UFix64 text)
    pub amount: String,
    /// Block and transaction position
    #[serde(flatten)]
    pub meta: EventMeta,
}

/// `MarketResolved` event. Maps to `flow_market_resolveds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketResolvedRecord {
    /// Market identifier
    pub market_id: u64,
    /// Winning option
    pub winning_option: String,
    /// Final APY per protocol (stored as a JSON object)
    pub final_apys: BTreeMap<String, String>,
    /// Resolution time (UFix64 text)
    pub resolved_at: String,
    /// Block and transaction position
    #[serde(flatten)]
    pub meta: EventMeta,
}

/// `WinningsClaimed` event. Maps to `flow_winnings_claimeds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinningsClaimedRecord {
    /// Market identifier
    pub market_id: u64,
    /// Claimant address
    pub user: String,
    /// Payout (UFix64 text)
    pub payout: String,
    /// Block and transaction position
    #[serde(flatten)]
    pub meta: EventMeta,
}

/// `YieldDeposited` event. Maps to `flow_yield_depositeds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YieldDepositedRecord {
    /// Depositor address
    pub user_address: String,
    /// Yield protocol name
    pub protocol_name: String,
    /// Deposited amount (UFix64 text)
    pub amount: String,
    /// Position identifier, or the market id when the event carries none
    pub position_id: String,
    /// Block and transaction position
    #[serde(flatten)]
    pub meta: EventMeta,
}

/// `YieldWithdrawn` event. Maps to `flow_yield_withdrawns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YieldWithdrawnRecord {
    /// Market identifier
    pub market_id: u64,
    /// Yield protocol name
    pub protocol: String,
    /// Withdrawn principal (UFix64 text)
    pub amount: String,
    /// Yield earned on top of principal (UFix64 text)
    pub yield_earned: String,
    /// Block and transaction position
    #[serde(flatten)]
    pub meta: EventMeta,
}

/// Per-contract sync progress.
///
/// Maps to the `flow_sync_states` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncStateRecord {
    /// Database-assigned unique identifier
    pub id: i64,
    /// Contract address (unique)
    pub contract_address: String,
    /// Contract name
    pub contract_name: String,
    /// Network identifier
    pub network: String,
    /// Last fully processed height
    pub last_block_height: i64,
    /// Unix timestamp of the last update
    pub updated_at: i64,
}

impl SyncStateRecord {
    /// Creates a fresh sync state seeded at `start_block`.
    #[must_use]
    pub fn new(
        contract_address: impl Into<String>,
        contract_name: impl Into<String>,
        network: impl Into<String>,
        start_block: u64,
    ) -> Self {
        Self {
            id: 0, // Will be set by database
            contract_address: contract_address.into(),
            contract_name: contract_name.into(),
            network: network.into(),
            last_block_height: i64::try_from(start_block).unwrap_or(i64::MAX),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Last processed height as `u64`.
    #[must_use]
    pub fn height(&self) -> u64 {
        u64::try_from(self.last_block_height).unwrap_or(0)
    }
}

/// A raw event that could not be decoded, kept for later inspection.
///
/// Maps to the `flow_skipped_events` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SkippedEventRecord {
    /// Database-assigned unique identifier
    pub id: i64,
    /// Event kind name
    pub event_kind: String,
    /// Height of the containing block
    pub block_height: i64,
    /// Emitting transaction
    pub transaction_id: String,
    /// Index within the transaction
    pub event_index: i64,
    /// Raw JSON-Cadence payload
    pub payload: String,
    /// Why decoding failed
    pub reason: String,
    /// Unix timestamp when record was created
    pub created_at: i64,
}

impl SkippedEventRecord {
    /// Creates a dead-letter entry for an undecodable event.
    #[must_use]
    pub fn new(
        kind: EventKind,
        block_height: u64,
        transaction_id: impl Into<String>,
        event_index: u32,
        payload: &serde_json::Value,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: 0, // Will be set by database
            event_kind: kind.name().to_string(),
            block_height: i64::try_from(block_height).unwrap_or(i64::MAX),
            transaction_id: transaction_id.into(),
            event_index: i64::from(event_index),
            payload: payload.to_string(),
            reason: reason.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Row count of one event table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCount {
    /// Table name
    pub table: String,
    /// Number of rows
    pub rows: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state_seeded_at_start_block() {
        let state = SyncStateRecord::new("0x01", "TrixyEvents", "testnet", 1_000);
        assert_eq!(state.height(), 1_000);
        assert_eq!(state.id, 0);
        assert!(state.updated_at > 0);
    }

    #[test]
    fn test_skipped_event_keeps_payload() {
        let payload = serde_json::json!({"type": "Event"});
        let skipped = SkippedEventRecord::new(
            EventKind::BetPlaced,
            10,
            "aa",
            2,
            &payload,
            "missing field `amount`",
        );
        assert_eq!(skipped.event_kind, "BetPlaced");
        assert_eq!(skipped.payload, r#"{"type":"Event"}"#);
        assert_eq!(skipped.event_index, 2);
    }

    #[test]
    fn test_record_serializes_flat_meta() {
        let record = WinningsClaimedRecord {
            market_id: 1,
            user: "0x01".to_string(),
            payout: "2.00000000".to_string(),
            meta: EventMeta {
                block_height: 5,
                block_timestamp: 100,
                transaction_id: "tx".to_string(),
                event_index: 0,
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["transaction_id"], "tx");
        assert_eq!(json["payout"], "2.00000000");
    }
}
