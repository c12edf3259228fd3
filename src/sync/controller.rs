//! The sync state machine.
//!
//! ```text
//! Bootstrapping ──► CatchingUp ──► UpToDate
//!       ▲               ▲  │           │
//!       │               │  └─ window ──┘ poll, head moved
//!       └── cursor save failed
//! ```
//!
//! A window is `[cursor + 1, min(cursor + window_size, latest)]`. The cursor
//! is saved once per window, after every event in it has been persisted,
//! recognised as a duplicate, or accounted for as a failure.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::backoff::Backoff;
use super::retriever::BatchRetriever;
use super::{RecordSink, SyncCursor, SyncSettings};
use crate::chain::ChainClient;
use crate::db::models::SkippedEventRecord;
use crate::db::PersistOutcome;
use crate::error::{IndexerError, IndexerResult};
use crate::events::{decode_raw, EventKind};

/// Where the controller is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncPhase {
    /// Cursor not loaded yet (or must be re-read)
    Bootstrapping,
    /// Behind the latest observed height
    CatchingUp,
    /// At the latest observed height, polling for more
    UpToDate,
}

/// Outcome of one processed window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WindowReport {
    /// First height of the window
    pub start_height: u64,
    /// Last height of the window (inclusive)
    pub end_height: u64,
    /// Events returned by the chain with a resolved block
    pub fetched: usize,
    /// Newly stored records
    pub persisted: usize,
    /// Records that were already stored
    pub duplicates: usize,
    /// Events that failed to decode
    pub decode_failures: usize,
    /// Records the store failed to write
    pub persist_failures: usize,
    /// Events dropped because their block could not be fetched
    pub unresolved_events: usize,
    /// Kinds whose query failed for this window
    pub failed_kinds: Vec<EventKind>,
}

impl WindowReport {
    /// Events that were not stored in this window.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.decode_failures + self.persist_failures + self.unresolved_events
    }
}

/// Aggregate of a catch-up pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatchUpSummary {
    /// Cursor before the first window
    pub start_cursor: u64,
    /// Cursor after the last window
    pub end_cursor: u64,
    /// Latest height the pass aimed for
    pub target_height: u64,
    /// Windows processed
    pub windows: usize,
    /// Newly stored records
    pub persisted: usize,
    /// Records that were already stored
    pub duplicates: usize,
    /// Events that failed to decode
    pub decode_failures: usize,
    /// Records the store failed to write, plus events with unresolved blocks
    pub persist_failures: usize,
    /// Whether a shutdown request cut the pass short
    pub interrupted: bool,
}

impl CatchUpSummary {
    fn starting_at(cursor: u64, target_height: u64) -> Self {
        Self {
            start_cursor: cursor,
            end_cursor: cursor,
            target_height,
            ..Self::default()
        }
    }

    fn record(&mut self, report: &WindowReport) {
        self.end_cursor = report.end_height;
        self.windows += 1;
        self.persisted += report.persisted;
        self.duplicates += report.duplicates;
        self.decode_failures += report.decode_failures;
        self.persist_failures += report.persist_failures + report.unresolved_events;
    }
}

/// Progress callbacks, used by the CLI for console output.
#[async_trait]
pub trait SyncObserver: Send + Sync {
    /// Cursor loaded and latest height known.
    async fn on_bootstrap(&self, _cursor: u64, _latest_height: u64) {}

    /// A window was processed and its cursor saved.
    async fn on_window(&self, _report: &WindowReport) {}

    /// The cursor reached the latest observed height.
    async fn on_caught_up(&self, _summary: &CatchUpSummary) {}
}

/// Observer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl SyncObserver for NoopObserver {}

/// Next window after `cursor`, or `None` when `cursor` has reached `latest`.
///
/// ```
/// use trixy_flow_indexer::sync::next_window;
///
/// assert_eq!(next_window(100, 1000, 200), Some((101, 300)));
/// assert_eq!(next_window(900, 950, 200), Some((901, 950)));
/// assert_eq!(next_window(950, 950, 200), None);
/// ```
#[must_use]
pub fn next_window(cursor: u64, latest_height: u64, window_size: u64) -> Option<(u64, u64)> {
    if cursor >= latest_height {
        return None;
    }
    let start = cursor + 1;
    let end = cursor.saturating_add(window_size.max(1)).min(latest_height);
    Some((start, end))
}

enum Step {
    Window,
    CaughtUp,
    Interrupted,
}

enum Tick {
    Continue,
    Stop,
}

/// Resolves once shutdown has been requested. A dropped sender never resolves.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Run `fut` unless shutdown is requested first.
async fn cancellable<F: Future>(shutdown: &mut watch::Receiver<bool>, fut: F) -> Option<F::Output> {
    if *shutdown.borrow() {
        return None;
    }
    tokio::select! {
        biased;
        () = shutdown_requested(shutdown) => None,
        out = fut => Some(out),
    }
}

/// Drives retrieval, decoding and persistence for one contract.
pub struct SyncController<C, S> {
    retriever: BatchRetriever<C>,
    store: S,
    settings: SyncSettings,
    observer: Arc<dyn SyncObserver>,
    phase: SyncPhase,
    cursor: Option<u64>,
    latest_height: u64,
    progress: CatchUpSummary,
}

impl<C, S> SyncController<C, S>
where
    C: ChainClient,
    S: SyncCursor + RecordSink,
{
    /// Controller for the contract in `settings`.
    pub fn new(client: C, store: S, settings: SyncSettings) -> Self {
        let retriever = BatchRetriever::new(client, settings.contract_address.clone());
        Self::with_retriever(retriever, store, settings)
    }

    /// Controller over a preconfigured retriever.
    pub fn with_retriever(retriever: BatchRetriever<C>, store: S, settings: SyncSettings) -> Self {
        Self {
            retriever,
            store,
            settings,
            observer: Arc::new(NoopObserver),
            phase: SyncPhase::Bootstrapping,
            cursor: None,
            latest_height: 0,
            progress: CatchUpSummary::default(),
        }
    }

    /// Attach a progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Current phase.
    pub const fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Cursor as last loaded or saved; `None` before bootstrap.
    pub const fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Settings in use.
    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// The store records are written to.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Load the cursor, creating it at the start block on first run.
    #[instrument(skip(self), fields(contract = %self.settings.contract_address))]
    pub async fn load_cursor(&mut self) -> IndexerResult<u64> {
        let address = &self.settings.contract_address;

        let cursor = match self.store.load(address).await? {
            Some(height) => {
                info!(cursor = height, "Resuming from stored sync state");
                height
            }
            None => {
                info!(
                    start_block = self.settings.start_block,
                    "No sync state found, creating one"
                );
                self.store.create(&self.settings).await?;
                self.store.load(address).await?.ok_or_else(|| {
                    IndexerError::state(format!("Sync state for {address} missing after create"), None)
                })?
            }
        };

        self.cursor = Some(cursor);
        Ok(cursor)
    }

    /// Retrieve, decode and persist every event in `[start_height, end_height]`.
    ///
    /// Per-event and per-kind failures are logged and counted; the window as a
    /// whole always completes.
    #[instrument(skip(self), fields(duration_ms = tracing::field::Empty))]
    pub async fn process_window(&self, start_height: u64, end_height: u64) -> WindowReport {
        let started = Instant::now();
        let batch = self.retriever.fetch_window(start_height, end_height).await;

        let mut report = WindowReport {
            start_height,
            end_height,
            fetched: batch.events.len(),
            unresolved_events: batch.unresolved_events,
            failed_kinds: batch.failed_kinds,
            ..WindowReport::default()
        };

        for event in batch.events {
            let record = match decode_raw(
                event.kind,
                &event.raw,
                event.block_height,
                event.block_timestamp,
            ) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        kind = %event.kind,
                        block_height = event.block_height,
                        transaction_id = %event.raw.transaction_id,
                        event_index = event.raw.event_index,
                        error = %e,
                        "Skipping undecodable event"
                    );
                    report.decode_failures += 1;

                    let skipped = SkippedEventRecord::new(
                        event.kind,
                        event.block_height,
                        event.raw.transaction_id.as_str(),
                        event.raw.event_index,
                        &event.raw.payload,
                        e.to_string(),
                    );
                    if let Err(dl_err) = self.store.dead_letter(&skipped).await {
                        warn!(error = %dl_err, "Failed to record skipped event");
                    }
                    continue;
                }
            };

            match self.store.persist(&record).await {
                Ok(PersistOutcome::Inserted) => report.persisted += 1,
                Ok(PersistOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    warn!(
                        kind = %event.kind,
                        transaction_id = %event.raw.transaction_id,
                        event_index = event.raw.event_index,
                        error = %e,
                        "Failed to persist event"
                    );
                    report.persist_failures += 1;
                }
            }
        }

        let duration = started.elapsed();
        tracing::Span::current().record("duration_ms", duration.as_millis() as u64);

        info!(
            start_height,
            end_height,
            events = report.fetched,
            persisted = report.persisted,
            duplicates = report.duplicates,
            failures = report.failures(),
            "Window processed"
        );

        report
    }

    /// Index up to the latest height observed now, then return.
    ///
    /// # Errors
    ///
    /// Fails when the cursor cannot be loaded or saved or the latest height
    /// cannot be fetched. Windows completed before the failure stay saved.
    pub async fn catch_up_once(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> IndexerResult<CatchUpSummary> {
        let cursor = match self.cursor {
            Some(cursor) => cursor,
            None => self.load_cursor().await?,
        };

        let Some(latest) = cancellable(shutdown, self.retriever.client().latest_height()).await
        else {
            return Ok(CatchUpSummary {
                interrupted: true,
                ..CatchUpSummary::starting_at(cursor, cursor)
            });
        };
        let latest = latest?;
        self.latest_height = latest;
        self.observer.on_bootstrap(cursor, latest).await;

        self.progress = CatchUpSummary::starting_at(cursor, latest);
        loop {
            match self.step(shutdown).await? {
                Step::Window => {}
                Step::CaughtUp => break,
                Step::Interrupted => {
                    self.progress.interrupted = true;
                    return Ok(self.progress.clone());
                }
            }
        }

        self.phase = SyncPhase::UpToDate;
        self.observer.on_caught_up(&self.progress).await;
        Ok(self.progress.clone())
    }

    /// Index forever, until `shutdown` flips to `true`.
    ///
    /// Transient failures are retried with backoff; this only returns once
    /// shutdown is requested.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> IndexerResult<()> {
        let mut backoff = Backoff::new(self.settings.retry_delay);

        info!(
            contract = %self.settings.contract_address,
            network = %self.settings.network,
            window_size = self.settings.window_size,
            "Sync loop starting"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let tick = match self.phase {
                SyncPhase::Bootstrapping => self.bootstrap_tick(&mut shutdown).await,
                SyncPhase::CatchingUp => self.catching_up_tick(&mut shutdown).await,
                SyncPhase::UpToDate => self.up_to_date_tick(&mut shutdown).await,
            };

            match tick {
                Ok(Tick::Continue) => backoff.reset(),
                Ok(Tick::Stop) => break,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        phase = ?self.phase,
                        attempt = backoff.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Sync step failed, retrying"
                    );
                    if cancellable(&mut shutdown, tokio::time::sleep(delay)).await.is_none() {
                        break;
                    }
                }
            }
        }

        info!(cursor = ?self.cursor, "Sync loop stopped");
        Ok(())
    }

    async fn bootstrap_tick(&mut self, shutdown: &mut watch::Receiver<bool>) -> IndexerResult<Tick> {
        let cursor = self.load_cursor().await?;

        let Some(latest) = cancellable(shutdown, self.retriever.client().latest_height()).await
        else {
            return Ok(Tick::Stop);
        };
        self.latest_height = latest?;

        info!(cursor, latest_height = self.latest_height, "Bootstrapped");
        self.observer.on_bootstrap(cursor, self.latest_height).await;

        self.progress = CatchUpSummary::starting_at(cursor, self.latest_height);
        self.phase = SyncPhase::CatchingUp;
        Ok(Tick::Continue)
    }

    async fn catching_up_tick(&mut self, shutdown: &mut watch::Receiver<bool>) -> IndexerResult<Tick> {
        match self.step(shutdown).await? {
            Step::Window => Ok(Tick::Continue),
            Step::Interrupted => Ok(Tick::Stop),
            Step::CaughtUp => {
                if self.progress.windows > 0 {
                    info!(
                        cursor = self.progress.end_cursor,
                        windows = self.progress.windows,
                        persisted = self.progress.persisted,
                        "Caught up"
                    );
                    self.observer.on_caught_up(&self.progress).await;
                }
                self.phase = SyncPhase::UpToDate;
                Ok(Tick::Continue)
            }
        }
    }

    async fn up_to_date_tick(&mut self, shutdown: &mut watch::Receiver<bool>) -> IndexerResult<Tick> {
        let poll: Duration = self.settings.poll_interval;
        if cancellable(shutdown, tokio::time::sleep(poll)).await.is_none() {
            return Ok(Tick::Stop);
        }

        let Some(latest) = cancellable(shutdown, self.retriever.client().latest_height()).await
        else {
            return Ok(Tick::Stop);
        };
        let latest = latest?;

        let cursor = self.cursor.unwrap_or(self.settings.start_block);
        if latest > cursor {
            debug!(cursor, latest_height = latest, "New blocks available");
            self.latest_height = latest;
            self.progress = CatchUpSummary::starting_at(cursor, latest);
            self.phase = SyncPhase::CatchingUp;
        }
        Ok(Tick::Continue)
    }

    /// Process the next window and save the cursor.
    async fn step(&mut self, shutdown: &mut watch::Receiver<bool>) -> IndexerResult<Step> {
        let Some(cursor) = self.cursor else {
            self.phase = SyncPhase::Bootstrapping;
            return Err(IndexerError::state("Cursor not loaded", None));
        };

        let Some((start, end)) = next_window(cursor, self.latest_height, self.settings.window_size)
        else {
            return Ok(Step::CaughtUp);
        };

        let Some(report) = cancellable(shutdown, self.process_window(start, end)).await else {
            return Ok(Step::Interrupted);
        };

        if let Err(e) = self.store.save(&self.settings.contract_address, end).await {
            // Re-read the stored cursor before trying again
            self.cursor = None;
            self.phase = SyncPhase::Bootstrapping;
            return Err(e);
        }

        self.cursor = Some(end);
        self.progress.record(&report);
        self.observer.on_window(&report).await;
        Ok(Step::Window)
    }
}
