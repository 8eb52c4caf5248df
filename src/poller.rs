//! ==============================================================================
//! poller.rs - timer-driven fetch / merge cycle
//! ==============================================================================
//!
//! purpose:
//!     one tick = fetch the last N readings, parse them, merge them into a
//!     fresh Series snapshot and publish it. the poller is the only writer
//!     of the series; the web server only ever reads the published Arc.
//!
//! relationships:
//!     - used by: main.rs (runs the loop), server.rs (reads AppState)
//!     - uses: sth.rs (HistorySource), domain.rs (parse_batch), series.rs
//!
//! failure handling:
//!     - empty fetch (including any upstream error): no-op
//!     - unparseable batch: logged, whole batch dropped, series unchanged
//!     - the next tick retries unconditionally, no backoff
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;

use crate::domain::{parse_batch, SeriesError};
use crate::series::{Series, SeriesState};
use crate::sth::HistorySource;

// ==============================================================================
// shared state
// ==============================================================================
// written by the poll loop once per tick, read by the http handlers.
// the series itself is an immutable snapshot behind an arc, so a reader
// holding it never observes a half-merged batch.

#[derive(Clone, Default)]
pub struct AppState {
    pub series: Arc<Series>,
    pub status: PollStatus,
}

pub type SharedState = Arc<RwLock<AppState>>;

#[derive(Clone, Debug, Default, Serialize)]
pub struct PollStatus {
    /// ticks run since start
    pub ticks: u64,
    /// points appended by the most recent tick
    pub last_added: usize,
    /// unix timestamp (ms) of the last tick that merged a batch
    pub last_update: Option<i64>,
    /// parse error of the most recent tick, cleared on success
    pub last_error: Option<String>,
    pub state: Option<SeriesState>,
}

/// what a single tick did
#[derive(Debug, PartialEq)]
pub enum TickOutcome {
    NoData,
    Merged { added: usize, total: usize },
    Rejected(SeriesError),
}

pub struct Poller<S> {
    source: S,
    last_n: u32,
    tz: Tz,
    state: SharedState,
    show_data: bool,
}

impl<S: HistorySource> Poller<S> {
    pub fn new(source: S, last_n: u32, tz: Tz, state: SharedState) -> Self {
        Self { source, last_n, tz, state, show_data: false }
    }

    pub fn show_data(mut self, show: bool) -> Self {
        self.show_data = show;
        self
    }

    /// run one fetch / merge / publish cycle
    pub async fn tick(&self) -> TickOutcome {
        let records = self.source.fetch(self.last_n).await;

        let outcome = if records.is_empty() {
            TickOutcome::NoData
        } else {
            match parse_batch(&records, self.tz) {
                Ok(readings) => {
                    let current = self.state.read().await.series.clone();
                    let next = current.merged(&readings);
                    let added = next.len() - current.len();

                    if self.show_data {
                        let fresh = current.len()..;
                        for (ts, value) in next.timestamps()[fresh.clone()].iter().zip(&next.values()[fresh]) {
                            tracing::info!("[POLL] {} -> {:.2}", ts.to_rfc3339(), value);
                        }
                    }

                    let total = next.len();
                    self.state.write().await.series = Arc::new(next);
                    TickOutcome::Merged { added, total }
                }
                Err(e) => {
                    tracing::error!("[POLL] ✗ Dropping batch of {}: {}", records.len(), e);
                    TickOutcome::Rejected(e)
                }
            }
        };

        self.record(&outcome).await;
        outcome
    }

    async fn record(&self, outcome: &TickOutcome) {
        let mut guard = self.state.write().await;
        let state = guard.series.state();
        let status = &mut guard.status;
        status.ticks += 1;
        status.state = Some(state);
        match outcome {
            TickOutcome::NoData => {
                status.last_added = 0;
            }
            TickOutcome::Merged { added, .. } => {
                status.last_added = *added;
                status.last_update = Some(chrono::Utc::now().timestamp_millis());
                status.last_error = None;
            }
            TickOutcome::Rejected(e) => {
                status.last_added = 0;
                status.last_error = Some(e.to_string());
            }
        }
    }

    /// tick forever at `interval`; a slow cycle delays the next tick
    pub async fn run(self, interval: Duration) {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("[POLL] Starting history polling ({}s interval)", interval.as_secs());
        loop {
            timer.tick().await;
            if let TickOutcome::Merged { added, total } = self.tick().await {
                tracing::debug!(added, total, "[POLL] merged");
            }
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawRecord;
    use chrono_tz::Europe::Lisbon;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// hands out queued batches, then empty ones
    struct ScriptedSource {
        batches: Mutex<VecDeque<Vec<RawRecord>>>,
        requested: Mutex<Vec<u32>>,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Vec<RawRecord>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl HistorySource for ScriptedSource {
        async fn fetch(&self, last_n: u32) -> Vec<RawRecord> {
            self.requested.lock().unwrap().push(last_n);
            self.batches.lock().unwrap().pop_front().unwrap_or_default()
        }
    }

    fn poller(batches: Vec<Vec<RawRecord>>) -> (Poller<ScriptedSource>, SharedState) {
        let state = SharedState::default();
        let poller = Poller::new(ScriptedSource::new(batches), 10, Lisbon, state.clone());
        (poller, state)
    }

    #[tokio::test]
    async fn test_tick_merges_and_publishes() {
        let (poller, state) = poller(vec![vec![RawRecord::new("10", "2024-01-01 12:00:00.000000")]]);

        assert_eq!(poller.tick().await, TickOutcome::Merged { added: 1, total: 1 });

        let state = state.read().await;
        assert_eq!(state.series.len(), 1);
        assert_eq!(state.series.mean(), Some(10.0));
        assert_eq!(state.status.state, Some(SeriesState::NonEmpty));
        assert!(state.status.last_update.is_some());
        assert_eq!(*poller.source.requested.lock().unwrap(), vec![10]);
    }

    #[tokio::test]
    async fn test_repeated_batch_adds_nothing() {
        let batch = vec![RawRecord::new("10", "2024-01-01 12:00:00.000000")];
        let (poller, state) = poller(vec![batch.clone(), batch]);

        poller.tick().await;
        assert_eq!(poller.tick().await, TickOutcome::Merged { added: 0, total: 1 });
        assert_eq!(state.read().await.status.ticks, 2);
    }

    #[tokio::test]
    async fn test_empty_fetch_is_noop() {
        let (poller, state) = poller(vec![vec![RawRecord::new("7", "2024-01-01 12:00:00")]]);
        poller.tick().await;
        let before = state.read().await.series.clone();

        assert_eq!(poller.tick().await, TickOutcome::NoData);

        let after = state.read().await;
        assert!(Arc::ptr_eq(&before, &after.series));
        assert_eq!(after.status.last_added, 0);
    }

    #[tokio::test]
    async fn test_bad_timestamp_drops_whole_batch() {
        let (poller, state) = poller(vec![
            vec![
                RawRecord::new("1", "2024-01-01 12:00:00"),
                RawRecord::new("2", "not a time"),
            ],
            vec![RawRecord::new("3", "2024-01-01 12:00:10")],
        ]);

        assert!(matches!(
            poller.tick().await,
            TickOutcome::Rejected(SeriesError::InvalidTimestamp(_))
        ));
        {
            let state = state.read().await;
            assert!(state.series.is_empty());
            assert_eq!(state.status.state, Some(SeriesState::Empty));
            assert!(state.status.last_error.is_some());
        }

        // next tick retries and recovers
        assert_eq!(poller.tick().await, TickOutcome::Merged { added: 1, total: 1 });
        assert!(state.read().await.status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_state_never_reverts_to_empty() {
        let (poller, state) = poller(vec![vec![RawRecord::new("1", "2024-01-01 12:00:00")]]);
        poller.tick().await;
        poller.tick().await;
        poller.tick().await;
        assert_eq!(state.read().await.status.state, Some(SeriesState::NonEmpty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_on_interval() {
        let (poller, state) = poller(vec![
            vec![RawRecord::new("1", "2024-01-01 12:00:00")],
            vec![RawRecord::new("2", "2024-01-01 12:00:05")],
        ]);
        let handle = tokio::spawn(poller.run(Duration::from_secs(5)));

        // first tick fires immediately, the second after one interval
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        handle.abort();

        let state = state.read().await;
        assert_eq!(state.series.values(), &[1.0, 2.0]);
        assert_eq!(state.status.ticks, 2);
    }
}
