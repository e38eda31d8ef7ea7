//! Polling session: scheduling, ordering and shared state.
//!
//! A [`Session`] owns a background task that asks its [`MetricsSource`] for a
//! payload on every tick of a fixed interval, whether or not earlier polls
//! have answered. Each poll runs as its own task bounded by a per-call
//! timeout, so overlapping polls are possible. Every poll carries a sequence
//! number and the time it was issued; [`SessionState::apply`] drops any result
//! that is not newer than the last one applied, so a slow response can never
//! overwrite fresher data.
//!
//! ```no_run
//! use std::sync::Arc;
//! use scrapewatch::{FileSource, PollOptions, Session, TimeRange};
//!
//! # tokio_test::block_on(async {
//! let session = Session::start(Arc::new(FileSource::new("metrics.txt")), PollOptions::default());
//!
//! let mut updates = session.subscribe();
//! updates.changed().await.ok();
//!
//! session.read(|state| {
//!     println!("{} polls retained", state.history().len());
//!     println!("{} in the last 15m", state.window(TimeRange::FifteenMinutes).count());
//! });
//!
//! session.stop().await;
//! # });
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::data::history::{self, History, HistoryEntry, TimeRange};
use crate::data::{compute_rates, parse_with_report, Rates};
use crate::error::ScrapeError;
use crate::source::MetricsSource;

/// Timing and retention knobs for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Time between polls.
    pub interval: Duration,
    /// Upper bound on a single poll.
    pub request_timeout: Duration,
    /// Maximum number of history entries retained.
    pub history_capacity: usize,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: history::DEFAULT_POLL_INTERVAL,
            request_timeout: Duration::from_secs(5),
            history_capacity: history::DEFAULT_CAPACITY,
        }
    }
}

/// The result of one poll, tagged with when it was issued.
#[derive(Debug)]
pub struct PollOutcome {
    pub seq: u64,
    /// Issue time in milliseconds since the epoch.
    pub issued_at_ms: u64,
    pub result: Result<String, ScrapeError>,
}

/// What [`SessionState::apply`] did with an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Parsed and appended to history; rates recomputed.
    Appended,
    /// The poll failed; history is unchanged.
    Failed,
    /// Older than data already applied; ignored.
    Stale,
}

/// Everything a consumer reads: history, latest rates and error state.
#[derive(Debug, Clone)]
pub struct SessionState {
    history: History,
    rates: Rates,
    last_error: Option<String>,
    last_applied_seq: Option<u64>,
    last_failed_seq: Option<u64>,
    discarded: u64,
}

impl SessionState {
    pub fn new(options: PollOptions) -> Self {
        Self {
            history: History::with_capacity(options.history_capacity, options.interval),
            rates: Rates::default(),
            last_error: None,
            last_applied_seq: None,
            last_failed_seq: None,
            discarded: 0,
        }
    }

    /// Apply one poll outcome.
    ///
    /// Outcomes not newer than the last applied success are discarded. A
    /// failure records its message and leaves history untouched. A success
    /// is parsed, diffed against the latest entry and appended.
    pub fn apply(&mut self, outcome: PollOutcome) -> Applied {
        let PollOutcome {
            seq,
            issued_at_ms,
            result,
        } = outcome;

        if let Some(last) = self.last_applied_seq.filter(|&last| seq <= last) {
            self.discarded += 1;
            debug!(seq, last, "discarding out-of-order poll result");
            return Applied::Stale;
        }

        let text = match result {
            Ok(text) => text,
            Err(error) => {
                warn!(seq, %error, "metrics poll failed");
                // A newer failure's message stands.
                if self.last_failed_seq.map_or(true, |failed| seq >= failed) {
                    self.last_error = Some(error.to_string());
                    self.last_failed_seq = Some(seq);
                }
                return Applied::Failed;
            }
        };

        let report = parse_with_report(&text);
        if !report.skipped.is_empty() {
            debug!(seq, skipped = report.skipped.len(), "skipped malformed lines");
        }
        let snapshot = report.snapshot;

        let rates = match self.history.latest() {
            Some(previous) => {
                let elapsed_ms = issued_at_ms.saturating_sub(previous.timestamp_ms);
                compute_rates(&previous.snapshot, &snapshot, elapsed_ms as f64 / 1000.0)
            }
            None => Rates::default(),
        };

        self.history
            .append(HistoryEntry::new(seq, issued_at_ms, snapshot, &rates));
        self.rates = rates;
        self.last_applied_seq = Some(seq);
        // A newer failure still stands.
        if self.last_failed_seq.map_or(true, |failed| seq > failed) {
            self.last_error = None;
        }

        Applied::Appended
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Trailing history entries for `range`, oldest first.
    pub fn window(&self, range: TimeRange) -> impl Iterator<Item = &HistoryEntry> {
        self.history.window(range)
    }

    /// Rates from the latest applied poll (empty until two polls succeed).
    pub fn rates(&self) -> &Rates {
        &self.rates
    }

    /// Message of the most recent failed poll, cleared by a newer success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_applied_seq(&self) -> Option<u64> {
        self.last_applied_seq
    }

    /// Number of out-of-order results dropped so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

/// A running poll loop and the state it feeds.
///
/// Call [`Session::stop`] to end it cleanly; dropping the session aborts the
/// loop and any polls still in flight.
#[derive(Debug)]
pub struct Session {
    state: Arc<RwLock<SessionState>>,
    updates: watch::Receiver<u64>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    description: String,
}

impl Session {
    /// Spawn the poll loop on the current tokio runtime.
    ///
    /// The first poll is issued immediately.
    pub fn start(source: Arc<dyn MetricsSource>, options: PollOptions) -> Self {
        let state = Arc::new(RwLock::new(SessionState::new(options)));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (updates_tx, updates) = watch::channel(0u64);
        let description = source.description().to_string();

        info!(
            source = %description,
            interval = ?options.interval,
            timeout = ?options.request_timeout,
            "starting metrics poller"
        );

        let task = tokio::spawn(run_poller(
            source,
            options,
            state.clone(),
            updates_tx,
            stop_rx,
        ));

        Self {
            state,
            updates,
            stop_tx,
            task: Some(task),
            description,
        }
    }

    /// Run `f` against a consistent view of the state.
    pub fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&*self.state.read())
    }

    /// Shared handle to the state, for consumers that outlive a borrow.
    pub fn state(&self) -> Arc<RwLock<SessionState>> {
        self.state.clone()
    }

    /// A receiver whose value counts applied (non-stale) poll results.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.updates.clone()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Stop polling and wait for the loop to exit.
    ///
    /// Polls still in flight are aborted and never reach the state.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!(source = %self.description, "metrics poller stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_poller(
    source: Arc<dyn MetricsSource>,
    options: PollOptions,
    state: Arc<RwLock<SessionState>>,
    updates: watch::Sender<u64>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let clock = PollClock::new();
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight = JoinSet::new();
    let mut seq = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                seq += 1;
                let source = source.clone();
                let timeout = options.request_timeout;
                let issued_at_ms = clock.now_ms();

                in_flight.spawn(async move {
                    let result = match tokio::time::timeout(timeout, source.fetch()).await {
                        Ok(result) => result,
                        Err(_) => Err(ScrapeError::Timeout),
                    };
                    PollOutcome { seq, issued_at_ms, result }
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                match joined {
                    Ok(outcome) => {
                        let applied = state.write().apply(outcome);
                        if applied != Applied::Stale {
                            updates.send_modify(|count| *count += 1);
                        }
                    }
                    Err(e) => warn!(error = %e, "poll task ended abnormally"),
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    in_flight.abort_all();
}

/// Wall-clock milliseconds that advance with the runtime's monotonic clock.
struct PollClock {
    base_ms: u64,
    started: Instant,
}

impl PollClock {
    fn new() -> Self {
        let base_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            base_ms,
            started: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.base_ms + self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payload(requests: u64) -> String {
        format!(
            "go_app_cpu_usage_percent 12.5\n\
             http_requests_total{{handler=\"/search\",method=\"GET\",status=\"200\"}} {}\n",
            requests
        )
    }

    fn ok(seq: u64, issued_at_ms: u64, requests: u64) -> PollOutcome {
        PollOutcome {
            seq,
            issued_at_ms,
            result: Ok(payload(requests)),
        }
    }

    fn failed(seq: u64, issued_at_ms: u64) -> PollOutcome {
        PollOutcome {
            seq,
            issued_at_ms,
            result: Err(ScrapeError::Status(503)),
        }
    }

    /// Plays back a fixed list of (delay, result) steps, one per fetch.
    #[derive(Debug, Default)]
    struct ScriptedSource {
        steps: Mutex<VecDeque<(Duration, Result<String, ScrapeError>)>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(steps: Vec<(Duration, Result<String, ScrapeError>)>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetricsSource for ScriptedSource {
        async fn fetch(&self) -> Result<String, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().pop_front();
            match step {
                Some((delay, result)) => {
                    tokio::time::sleep(delay).await;
                    result
                }
                None => Ok(String::new()),
            }
        }

        fn description(&self) -> &str {
            "scripted"
        }
    }

    fn options() -> PollOptions {
        PollOptions {
            interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            history_capacity: 100,
        }
    }

    #[test]
    fn first_poll_has_no_rates() {
        let mut state = SessionState::new(options());

        assert_eq!(state.apply(ok(1, 0, 100)), Applied::Appended);

        assert_eq!(state.history().len(), 1);
        assert_eq!(state.rates(), &Rates::default());
        assert_eq!(state.history().latest().unwrap().scalars.cpu, Some(12.5));
    }

    #[test]
    fn second_poll_derives_rates_from_issue_times() {
        let mut state = SessionState::new(options());
        state.apply(ok(1, 10_000, 100));
        state.apply(ok(2, 15_000, 150));

        assert_eq!(state.rates().total_rps, 10.0);
        assert_eq!(state.rates().per_route_rps[0].value, 10.0);
        assert_eq!(state.history().latest().unwrap().scalars.rps, 10.0);
        assert_eq!(state.last_applied_seq(), Some(2));
    }

    #[test]
    fn stale_results_are_discarded() {
        let mut state = SessionState::new(options());
        state.apply(ok(2, 5_000, 150));

        assert_eq!(state.apply(ok(1, 0, 100)), Applied::Stale);
        assert_eq!(state.apply(ok(2, 5_000, 150)), Applied::Stale);
        assert_eq!(state.apply(failed(1, 0)), Applied::Stale);

        assert_eq!(state.history().len(), 1);
        assert_eq!(state.history().latest().unwrap().seq, 2);
        assert_eq!(state.discarded(), 3);
        assert!(state.last_error().is_none());
    }

    #[test]
    fn failure_keeps_history_and_sets_error() {
        let mut state = SessionState::new(options());
        state.apply(ok(1, 0, 100));

        assert_eq!(state.apply(failed(2, 5_000)), Applied::Failed);

        assert_eq!(state.history().len(), 1);
        assert_eq!(state.last_error(), Some("Endpoint returned status 503"));

        state.apply(ok(3, 10_000, 200));
        assert!(state.last_error().is_none());
        assert_eq!(state.history().len(), 2);
        // Rates span the gap left by the failed poll.
        assert_eq!(state.rates().total_rps, 10.0);
    }

    #[test]
    fn older_success_does_not_clear_newer_failure() {
        let mut state = SessionState::new(options());
        state.apply(ok(1, 0, 100));
        state.apply(failed(3, 10_000));

        assert_eq!(state.apply(ok(2, 5_000, 150)), Applied::Appended);
        assert_eq!(state.last_error(), Some("Endpoint returned status 503"));
    }

    #[test]
    fn late_failure_keeps_newer_failure_message() {
        let mut state = SessionState::new(options());
        state.apply(ok(1, 0, 100));
        state.apply(failed(3, 10_000));

        let late = PollOutcome {
            seq: 2,
            issued_at_ms: 5_000,
            result: Err(ScrapeError::Timeout),
        };
        assert_eq!(state.apply(late), Applied::Failed);
        assert_eq!(state.last_error(), Some("Endpoint returned status 503"));

        // A success newer than both clears it.
        state.apply(ok(4, 15_000, 200));
        assert!(state.last_error().is_none());
    }

    #[test]
    fn window_follows_history() {
        let mut state = SessionState::new(PollOptions {
            interval: Duration::from_secs(300),
            ..options()
        });
        for seq in 1..=10 {
            state.apply(ok(seq, seq * 300_000, seq * 10));
        }

        // 15 minutes of 5-minute polls.
        let seqs: Vec<u64> = state.window(TimeRange::FifteenMinutes).map(|e| e.seq).collect();
        assert_eq!(seqs, vec![8, 9, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval_and_derives_rates() {
        let source = ScriptedSource::new(vec![
            (Duration::ZERO, Ok(payload(100))),
            (Duration::ZERO, Ok(payload(150))),
        ]);
        let session = Session::start(source.clone(), options());
        let mut updates = session.subscribe();

        updates.wait_for(|&count| count >= 2).await.unwrap();

        session.read(|state| {
            assert_eq!(state.history().len(), 2);
            assert_eq!(state.rates().total_rps, 10.0);
            assert!(state.last_error().is_none());
        });
        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_never_overwrites_newer_one() {
        // Poll 1 answers at t=8s, poll 2 (issued at t=5s) answers at t=6s.
        let source = ScriptedSource::new(vec![
            (Duration::from_secs(8), Ok(payload(100))),
            (Duration::from_secs(1), Ok(payload(150))),
        ]);
        let session = Session::start(source.clone(), options());

        tokio::time::sleep(Duration::from_secs(9)).await;

        session.read(|state| {
            assert_eq!(state.history().len(), 1);
            assert_eq!(state.last_applied_seq(), Some(2));
            assert_eq!(state.discarded(), 1);
        });
        assert_eq!(source.calls(), 2);
        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_poll_times_out() {
        let source = ScriptedSource::new(vec![(Duration::from_secs(60), Ok(payload(100)))]);
        let session = Session::start(
            source.clone(),
            PollOptions {
                request_timeout: Duration::from_secs(2),
                ..options()
            },
        );
        let mut updates = session.subscribe();

        updates.wait_for(|&count| count >= 1).await.unwrap();

        session.read(|state| {
            assert!(state.history().is_empty());
            assert_eq!(state.last_error(), Some("Request timed out"));
        });
        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_does_not_stop_the_schedule() {
        let source = ScriptedSource::new(vec![
            (Duration::ZERO, Ok(payload(100))),
            (Duration::ZERO, Err(ScrapeError::Status(503))),
            (Duration::ZERO, Ok(payload(200))),
        ]);
        let session = Session::start(source.clone(), options());
        let mut updates = session.subscribe();

        updates.wait_for(|&count| count >= 2).await.unwrap();
        session.read(|state| {
            assert_eq!(state.history().len(), 1);
            assert_eq!(state.last_error(), Some("Endpoint returned status 503"));
        });

        updates.wait_for(|&count| count >= 3).await.unwrap();
        session.read(|state| {
            assert_eq!(state.history().len(), 2);
            assert!(state.last_error().is_none());
            // 100 requests over the 10s between polls 1 and 3.
            assert_eq!(state.rates().total_rps, 10.0);
        });
        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_polling() {
        let source = ScriptedSource::new(vec![]);
        let session = Session::start(source.clone(), options());
        let state = session.state();
        let mut updates = session.subscribe();

        updates.wait_for(|&count| count >= 1).await.unwrap();
        session.stop().await;
        let calls = source.calls();

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(source.calls(), calls);
        assert_eq!(state.read().history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_in_flight_polls() {
        let source = ScriptedSource::new(vec![(Duration::from_secs(3), Ok(payload(100)))]);
        let session = Session::start(source.clone(), options());
        let state = session.state();

        tokio::time::sleep(Duration::from_secs(1)).await;
        session.stop().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(state.read().history().is_empty());
        assert!(state.read().last_error().is_none());
    }
}
