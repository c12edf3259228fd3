//! Repository pattern for database operations.
//!
//! Provides the store operations the sync pipeline needs: idempotent event
//! inserts, the monotonic per-contract cursor, the dead-letter table and
//! row-count summaries.

use sqlx::sqlite::SqliteQueryResult;
use sqlx::SqlitePool;
use tracing::{debug, info, instrument, warn};

use super::models::{
    BetPlacedRecord, MarketCreatedRecord, MarketResolvedRecord, SkippedEventRecord,
    SyncStateRecord, TableCount, WinningsClaimedRecord, YieldDepositedRecord,
    YieldWithdrawnRecord,
};
use crate::error::{IndexerError, IndexerResult};
use crate::events::{EventKind, EventMeta, EventRecord};

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// A new row was written
    Inserted,
    /// A row with the same `(transaction_id, event_index)` already existed
    Duplicate,
}

/// Repository for database operations.
///
/// Wraps a SQLite connection pool and provides type-safe methods
/// for all database interactions.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

fn sql_int(value: u64, what: &str) -> IndexerResult<i64> {
    i64::try_from(value).map_err(|e| {
        IndexerError::database(format!("{what} {value} exceeds SQLite integer range"), Some(Box::new(e)))
    })
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> IndexerResult<String> {
    serde_json::to_string(value).map_err(|e| {
        IndexerError::database(format!("Failed to serialize {what}"), Some(Box::new(e)))
    })
}

/// Map an insert result to an outcome, treating a uniqueness violation as a no-op.
fn insert_outcome(
    result: Result<SqliteQueryResult, sqlx::Error>,
    kind: EventKind,
    meta: &EventMeta,
) -> IndexerResult<PersistOutcome> {
    match result {
        Ok(_) => Ok(PersistOutcome::Inserted),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            debug!(
                kind = %kind,
                transaction_id = %meta.transaction_id,
                event_index = meta.event_index,
                "Event already stored"
            );
            Ok(PersistOutcome::Duplicate)
        }
        Err(e) => Err(IndexerError::database(
            format!(
                "Failed to insert {kind} ({}:{})",
                meta.transaction_id, meta.event_index
            ),
            Some(Box::new(e)),
        )),
    }
}

impl Repository {
    /// Creates a new repository with the given connection pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ==================== SYNC STATE OPERATIONS ====================

    /// Gets the sync state for a contract.
    ///
    /// Returns `None` if no state exists (first run).
    pub async fn get_sync_state(
        &self,
        contract_address: &str,
    ) -> IndexerResult<Option<SyncStateRecord>> {
        sqlx::query_as::<_, SyncStateRecord>(
            "SELECT * FROM flow_sync_states WHERE contract_address = ?",
        )
        .bind(contract_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to query sync state", Some(Box::new(e))))
    }

    /// Stores a fresh sync state. An existing row for the same contract is
    /// left untouched.
    pub async fn create_sync_state(&self, state: &SyncStateRecord) -> IndexerResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO flow_sync_states (
                contract_address, contract_name, network, last_block_height, updated_at
            )
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (contract_address) DO NOTHING
            "#,
        )
        .bind(&state.contract_address)
        .bind(&state.contract_name)
        .bind(&state.network)
        .bind(state.last_block_height)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to create sync state", Some(Box::new(e))))?;

        if result.rows_affected() > 0 {
            info!(
                contract_address = %state.contract_address,
                start_block = state.last_block_height,
                "Sync state created"
            );
        }
        Ok(())
    }

    /// Moves the cursor of a contract forward to `height`.
    ///
    /// Re-saving the current height is accepted; a lower height is rejected
    /// without touching the row.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::StateError`] when the row is missing or the
    /// update would move the cursor backwards.
    #[instrument(skip(self))]
    pub async fn advance_sync_state(&self, contract_address: &str, height: u64) -> IndexerResult<()> {
        let height_i64 = sql_int(height, "Block height")?;

        let result = sqlx::query(
            r#"
            UPDATE flow_sync_states
            SET last_block_height = ?, updated_at = ?
            WHERE contract_address = ? AND last_block_height <= ?
            "#,
        )
        .bind(height_i64)
        .bind(chrono::Utc::now().timestamp())
        .bind(contract_address)
        .bind(height_i64)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to update sync state", Some(Box::new(e))))?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.get_sync_state(contract_address).await? {
            None => Err(IndexerError::state(
                format!("No sync state for contract {contract_address}"),
                None,
            )),
            Some(current) => {
                warn!(
                    current = current.last_block_height,
                    requested = height,
                    "Rejected backwards cursor update"
                );
                Err(IndexerError::state(
                    format!(
                        "Refusing to move cursor of {contract_address} back from {} to {height}",
                        current.last_block_height
                    ),
                    None,
                ))
            }
        }
    }

    // ==================== EVENT OPERATIONS ====================

    /// Inserts a decoded event into its kind's table.
    pub async fn insert_event(&self, record: &EventRecord) -> IndexerResult<PersistOutcome> {
        match record {
            EventRecord::MarketCreated(r) => self.insert_market_created(r).await,
            EventRecord::BetPlaced(r) => self.insert_bet_placed(r).await,
            EventRecord::MarketResolved(r) => self.insert_market_resolved(r).await,
            EventRecord::WinningsClaimed(r) => self.insert_winnings_claimed(r).await,
            EventRecord::YieldDeposited(r) => self.insert_yield_deposited(r).await,
            EventRecord::YieldWithdrawn(r) => self.insert_yield_withdrawn(r).await,
        }
    }

    /// Inserts a `MarketCreated` record.
    pub async fn insert_market_created(
        &self,
        r: &MarketCreatedRecord,
    ) -> IndexerResult<PersistOutcome> {
        let options = to_json(&r.options, "market options")?;

        let result = sqlx::query(
            r#"
            INSERT INTO flow_market_createds (
                market_id, question, end_time, options, yield_protocol, creator,
                block_height, block_timestamp, transaction_id, event_index, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sql_int(r.market_id, "Market id")?)
        .bind(&r.question)
        .bind(&r.end_time)
        .bind(options)
        .bind(&r.yield_protocol)
        .bind(&r.creator)
        .bind(sql_int(r.meta.block_height, "Block height")?)
        .bind(r.meta.block_timestamp)
        .bind(&r.meta.transaction_id)
        .bind(i64::from(r.meta.event_index))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        insert_outcome(result, EventKind::MarketCreated, &r.meta)
    }

    /// Inserts a `BetPlaced` record.
    pub async fn insert_bet_placed(&self, r: &BetPlacedRecord) -> IndexerResult<PersistOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO flow_bet_placeds (
                market_id, user, selected_option, protocol_index, amount,
                block_height, block_timestamp, transaction_id, event_index, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sql_int(r.market_id, "Market id")?)
        .bind(&r.user)
        .bind(&r.selected_option)
        .bind(i64::from(r.protocol_index))
        .bind(&r.amount)
        .bind(sql_int(r.meta.block_height, "Block height")?)
        .bind(r.meta.block_timestamp)
        .bind(&r.meta.transaction_id)
        .bind(i64::from(r.meta.event_index))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        insert_outcome(result, EventKind::BetPlaced, &r.meta)
    }

    /// Inserts a `MarketResolved` record.
    pub async fn insert_market_resolved(
        &self,
        r: &MarketResolvedRecord,
    ) -> IndexerResult<PersistOutcome> {
        let final_apys = to_json(&r.final_apys, "final APYs")?;

        let result = sqlx::query(
            r#"
            INSERT INTO flow_market_resolveds (
                market_id, winning_option, final_apys, resolved_at,
                block_height, block_timestamp, transaction_id, event_index, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sql_int(r.market_id, "Market id")?)
        .bind(&r.winning_option)
        .bind(final_apys)
        .bind(&r.resolved_at)
        .bind(sql_int(r.meta.block_height, "Block height")?)
        .bind(r.meta.block_timestamp)
        .bind(&r.meta.transaction_id)
        .bind(i64::from(r.meta.event_index))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        insert_outcome(result, EventKind::MarketResolved, &r.meta)
    }

    /// Inserts a `WinningsClaimed` record.
    pub async fn insert_winnings_claimed(
        &self,
        r: &WinningsClaimedRecord,
    ) -> IndexerResult<PersistOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO flow_winnings_claimeds (
                market_id, user, payout,
                block_height, block_timestamp, transaction_id, event_index, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sql_int(r.market_id, "Market id")?)
        .bind(&r.user)
        .bind(&r.payout)
        .bind(sql_int(r.meta.block_height, "Block height")?)
        .bind(r.meta.block_timestamp)
        .bind(&r.meta.transaction_id)
        .bind(i64::from(r.meta.event_index))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        insert_outcome(result, EventKind::WinningsClaimed, &r.meta)
    }

    /// Inserts a `YieldDeposited` record.
    pub async fn insert_yield_deposited(
        &self,
        r: &YieldDepositedRecord,
    ) -> IndexerResult<PersistOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO flow_yield_depositeds (
                user_address, protocol_name, amount, position_id,
                block_height, block_timestamp, transaction_id, event_index, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&r.user_address)
        .bind(&r.protocol_name)
        .bind(&r.amount)
        .bind(&r.position_id)
        .bind(sql_int(r.meta.block_height, "Block height")?)
        .bind(r.meta.block_timestamp)
        .bind(&r.meta.transaction_id)
        .bind(i64::from(r.meta.event_index))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        insert_outcome(result, EventKind::YieldDeposited, &r.meta)
    }

    /// Inserts a `YieldWithdrawn` record.
    pub async fn insert_yield_withdrawn(
        &self,
        r: &YieldWithdrawnRecord,
    ) -> IndexerResult<PersistOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO flow_yield_withdrawns (
                market_id, protocol, amount, yield_earned,
                block_height, block_timestamp, transaction_id, event_index, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sql_int(r.market_id, "Market id")?)
        .bind(&r.protocol)
        .bind(&r.amount)
        .bind(&r.yield_earned)
        .bind(sql_int(r.meta.block_height, "Block height")?)
        .bind(r.meta.block_timestamp)
        .bind(&r.meta.transaction_id)
        .bind(i64::from(r.meta.event_index))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        insert_outcome(result, EventKind::YieldWithdrawn, &r.meta)
    }

    // ==================== DEAD LETTER OPERATIONS ====================

    /// Records an undecodable event. Returns `false` when it was already stored.
    pub async fn insert_skipped_event(&self, skipped: &SkippedEventRecord) -> IndexerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO flow_skipped_events (
                event_kind, block_height, transaction_id, event_index, payload, reason, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&skipped.event_kind)
        .bind(skipped.block_height)
        .bind(&skipped.transaction_id)
        .bind(skipped.event_index)
        .bind(&skipped.payload)
        .bind(&skipped.reason)
        .bind(skipped.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            IndexerError::database("Failed to record skipped event", Some(Box::new(e)))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recent skipped events, newest first.
    pub async fn recent_skipped_events(&self, limit: u32) -> IndexerResult<Vec<SkippedEventRecord>> {
        sqlx::query_as::<_, SkippedEventRecord>(
            "SELECT * FROM flow_skipped_events ORDER BY block_height DESC, id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::database("Failed to query skipped events", Some(Box::new(e))))
    }

    // ==================== SUMMARY OPERATIONS ====================

    /// Row count of every event table plus the dead-letter table.
    pub async fn table_counts(&self) -> IndexerResult<Vec<TableCount>> {
        let tables = EventKind::ALL
            .iter()
            .map(|kind| kind.table())
            .chain(std::iter::once("flow_skipped_events"));

        let mut counts = Vec::with_capacity(EventKind::ALL.len() + 1);
        for table in tables {
            // Table names come from a fixed list, never from input
            let (rows,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    IndexerError::database(format!("Failed to count rows in {table}"), Some(Box::new(e)))
                })?;
            counts.push(TableCount {
                table: table.to_string(),
                rows,
            });
        }

        Ok(counts)
    }

    /// Checks database connectivity.
    pub async fn health_check(&self) -> IndexerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::database("Database health check failed", Some(Box::new(e))))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;
    use std::collections::BTreeMap;

    async fn setup_test_db() -> Repository {
        let pool = create_pool("sqlite::memory:")
            .await
            .expect("Failed to create pool");
        Repository::new(pool)
    }

    fn meta(tx: &str, index: u32) -> EventMeta {
        EventMeta {
            block_height: 120,
            block_timestamp: 1_700_000_000,
            transaction_id: tx.to_string(),
            event_index: index,
        }
    }

    fn bet(tx: &str, index: u32) -> EventRecord {
        EventRecord::BetPlaced(BetPlacedRecord {
            market_id: 7,
            user: "0xabc".to_string(),
            selected_option: "yes".to_string(),
            protocol_index: 0,
            amount: "12.50000000".to_string(),
            meta: meta(tx, index),
        })
    }

    async fn count(repo: &Repository, table: &str) -> i64 {
        repo.table_counts()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.table == table)
            .map(|c| c.rows)
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_noop() {
        let repo = setup_test_db().await;

        let first = repo.insert_event(&bet("aa", 0)).await.unwrap();
        let second = repo.insert_event(&bet("aa", 0)).await.unwrap();

        assert_eq!(first, PersistOutcome::Inserted);
        assert_eq!(second, PersistOutcome::Duplicate);
        assert_eq!(count(&repo, "flow_bet_placeds").await, 1);
    }

    #[tokio::test]
    async fn test_same_transaction_different_index_is_distinct() {
        let repo = setup_test_db().await;

        repo.insert_event(&bet("aa", 0)).await.unwrap();
        repo.insert_event(&bet("aa", 1)).await.unwrap();

        assert_eq!(count(&repo, "flow_bet_placeds").await, 2);
    }

    #[tokio::test]
    async fn test_json_columns_round_trip() {
        let repo = setup_test_db().await;

        let created = EventRecord::MarketCreated(MarketCreatedRecord {
            market_id: 1,
            question: "Which protocol wins?".to_string(),
            end_time: "1735689600".to_string(),
            options: vec!["aave".to_string(), "compound".to_string()],
            yield_protocol: String::new(),
            creator: "0x01".to_string(),
            meta: meta("bb", 0),
        });
        let mut apys = BTreeMap::new();
        apys.insert("aave".to_string(), "4.20000000".to_string());
        let resolved = EventRecord::MarketResolved(MarketResolvedRecord {
            market_id: 1,
            winning_option: "aave".to_string(),
            final_apys: apys,
            resolved_at: "1735689600.00000000".to_string(),
            meta: meta("cc", 0),
        });

        repo.insert_event(&created).await.unwrap();
        repo.insert_event(&resolved).await.unwrap();

        let (options,): (String,) =
            sqlx::query_as("SELECT options FROM flow_market_createds WHERE market_id = 1")
                .fetch_one(repo.pool())
                .await
                .unwrap();
        assert_eq!(options, r#"["aave","compound"]"#);

        let (final_apys,): (String,) =
            sqlx::query_as("SELECT final_apys FROM flow_market_resolveds WHERE market_id = 1")
                .fetch_one(repo.pool())
                .await
                .unwrap();
        assert_eq!(final_apys, r#"{"aave":"4.20000000"}"#);
    }

    #[tokio::test]
    async fn test_sync_state_lifecycle() {
        let repo = setup_test_db().await;
        assert!(repo.get_sync_state("0x01").await.unwrap().is_none());

        let state = SyncStateRecord::new("0x01", "TrixyEvents", "testnet", 100);
        repo.create_sync_state(&state).await.unwrap();
        // Second create keeps the original row
        repo.create_sync_state(&SyncStateRecord::new("0x01", "TrixyEvents", "testnet", 5))
            .await
            .unwrap();

        let loaded = repo.get_sync_state("0x01").await.unwrap().unwrap();
        assert_eq!(loaded.height(), 100);

        repo.advance_sync_state("0x01", 300).await.unwrap();
        repo.advance_sync_state("0x01", 300).await.unwrap();
        assert_eq!(repo.get_sync_state("0x01").await.unwrap().unwrap().height(), 300);
    }

    #[tokio::test]
    async fn test_cursor_never_moves_backwards() {
        let repo = setup_test_db().await;
        repo.create_sync_state(&SyncStateRecord::new("0x01", "TrixyEvents", "testnet", 500))
            .await
            .unwrap();

        let err = repo.advance_sync_state("0x01", 499).await.unwrap_err();
        assert!(matches!(err, IndexerError::StateError { .. }));
        assert_eq!(repo.get_sync_state("0x01").await.unwrap().unwrap().height(), 500);
    }

    #[tokio::test]
    async fn test_advance_without_state_fails() {
        let repo = setup_test_db().await;
        let err = repo.advance_sync_state("0x02", 10).await.unwrap_err();
        assert!(err.to_string().contains("No sync state"));
    }

    #[tokio::test]
    async fn test_skipped_events_are_idempotent() {
        let repo = setup_test_db().await;
        let payload = serde_json::json!({"type": "Event"});
        let skipped =
            SkippedEventRecord::new(EventKind::BetPlaced, 10, "dd", 0, &payload, "missing field");

        assert!(repo.insert_skipped_event(&skipped).await.unwrap());
        assert!(!repo.insert_skipped_event(&skipped).await.unwrap());

        let recent = repo.recent_skipped_events(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].reason, "missing field");
        assert_eq!(count(&repo, "flow_skipped_events").await, 1);
    }

    #[tokio::test]
    async fn test_table_counts_cover_all_tables() {
        let repo = setup_test_db().await;
        repo.health_check().await.unwrap();

        let counts = repo.table_counts().await.unwrap();
        assert_eq!(counts.len(), 7);
        assert!(counts.iter().all(|c| c.rows == 0));
    }
}
