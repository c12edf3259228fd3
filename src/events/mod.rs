//! Trixy contract events.
//!
//! The monitored contract emits six event kinds. This module names them,
//! builds their fully qualified Cadence type ids, and wraps the typed records
//! produced by the [`decoder`].
//!
//! ## Example
//!
//! ```
//! use trixy_flow_indexer::events::EventKind;
//!
//! let kind = EventKind::BetPlaced;
//! assert_eq!(kind.qualified_type("0x1234abcd"), "A.1234abcd.TrixyEvents.BetPlaced");
//! assert_eq!(kind.table(), "flow_bet_placeds");
//! ```

pub mod decoder;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::db::models::{
    BetPlacedRecord, MarketCreatedRecord, MarketResolvedRecord, WinningsClaimedRecord,
    YieldDepositedRecord, YieldWithdrawnRecord,
};
use crate::error::IndexerError;

pub use decoder::{decode_event, decode_raw};

/// Cadence contract declaring the events.
pub const EVENTS_CONTRACT: &str = "TrixyEvents";

/// The event kinds emitted by the Trixy contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// A new prediction market was opened
    MarketCreated,
    /// A user placed a bet on a market option
    BetPlaced,
    /// A market was resolved with a winning option
    MarketResolved,
    /// A user claimed winnings from a resolved market
    WinningsClaimed,
    /// Funds were deposited into a yield protocol
    YieldDeposited,
    /// Funds were withdrawn from a yield protocol
    YieldWithdrawn,
}

impl EventKind {
    /// Every kind, in the order the retriever queries them.
    pub const ALL: [Self; 6] = [
        Self::MarketCreated,
        Self::BetPlaced,
        Self::MarketResolved,
        Self::WinningsClaimed,
        Self::YieldDeposited,
        Self::YieldWithdrawn,
    ];

    /// Event name as declared in Cadence.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MarketCreated => "MarketCreated",
            Self::BetPlaced => "BetPlaced",
            Self::MarketResolved => "MarketResolved",
            Self::WinningsClaimed => "WinningsClaimed",
            Self::YieldDeposited => "YieldDeposited",
            Self::YieldWithdrawn => "YieldWithdrawn",
        }
    }

    /// Table holding records of this kind.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::MarketCreated => "flow_market_createds",
            Self::BetPlaced => "flow_bet_placeds",
            Self::MarketResolved => "flow_market_resolveds",
            Self::WinningsClaimed => "flow_winnings_claimeds",
            Self::YieldDeposited => "flow_yield_depositeds",
            Self::YieldWithdrawn => "flow_yield_withdrawns",
        }
    }

    /// Fully qualified Cadence type id for a contract address (with or without `0x`).
    #[must_use]
    pub fn qualified_type(self, contract_address: &str) -> String {
        let bare = contract_address.trim_start_matches("0x");
        format!("A.{bare}.{EVENTS_CONTRACT}.{}", self.name())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| IndexerError::decoding(format!("Unknown event kind '{s}'"), None))
    }
}

/// Where an event came from: block and position within its transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Height of the containing block
    pub block_height: u64,
    /// Timestamp of the containing block (Unix epoch seconds)
    pub block_timestamp: i64,
    /// Hex id of the emitting transaction
    pub transaction_id: String,
    /// Index of the event within its transaction
    pub event_index: u32,
}

/// A decoded event, ready for persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "record")]
pub enum EventRecord {
    /// See [`EventKind::MarketCreated`]
    MarketCreated(MarketCreatedRecord),
    /// See [`EventKind::BetPlaced`]
    BetPlaced(BetPlacedRecord),
    /// See [`EventKind::MarketResolved`]
    MarketResolved(MarketResolvedRecord),
    /// See [`EventKind::WinningsClaimed`]
    WinningsClaimed(WinningsClaimedRecord),
    /// See [`EventKind::YieldDeposited`]
    YieldDeposited(YieldDepositedRecord),
    /// See [`EventKind::YieldWithdrawn`]
    YieldWithdrawn(YieldWithdrawnRecord),
}

impl EventRecord {
    /// Kind of the wrapped record.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::MarketCreated(_) => EventKind::MarketCreated,
            Self::BetPlaced(_) => EventKind::BetPlaced,
            Self::MarketResolved(_) => EventKind::MarketResolved,
            Self::WinningsClaimed(_) => EventKind::WinningsClaimed,
            Self::YieldDeposited(_) => EventKind::YieldDeposited,
            Self::YieldWithdrawn(_) => EventKind::YieldWithdrawn,
        }
    }

    /// Block and transaction position of the wrapped record.
    #[must_use]
    pub const fn meta(&self) -> &EventMeta {
        match self {
            Self::MarketCreated(r) => &r.meta,
            Self::BetPlaced(r) => &r.meta,
            Self::MarketResolved(r) => &r.meta,
            Self::WinningsClaimed(r) => &r.meta,
            Self::YieldDeposited(r) => &r.meta,
            Self::YieldWithdrawn(r) => &r.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_type_strips_prefix() {
        assert_eq!(
            EventKind::MarketResolved.qualified_type("0xabc"),
            "A.abc.TrixyEvents.MarketResolved"
        );
        assert_eq!(
            EventKind::MarketResolved.qualified_type("abc"),
            "A.abc.TrixyEvents.MarketResolved"
        );
    }

    #[test]
    fn test_kind_round_trips_through_name() {
        for kind in EventKind::ALL {
            assert_eq!(kind.name().parse::<EventKind>().unwrap(), kind);
        }
        assert!("Transfer".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_tables_are_distinct() {
        let mut tables: Vec<_> = EventKind::ALL.iter().map(|k| k.table()).collect();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), 6);
    }
}
