//! Bounded snapshot history and time-range windowing.

use std::collections::vec_deque::{self, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::rates::Rates;
use super::snapshot::Snapshot;

/// Default number of entries kept before the oldest is evicted.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Reference poll cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Headline values of one poll, ready for charting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedScalars {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub rps: f64,
    pub error_rate_percent: f64,
    pub latency_seconds: f64,
}

impl DerivedScalars {
    pub fn new(snapshot: &Snapshot, rates: &Rates) -> Self {
        Self {
            cpu: snapshot.cpu_percent,
            memory: snapshot.memory_gib,
            rps: rates.total_rps,
            error_rate_percent: rates.error_rate_percent,
            latency_seconds: rates.latency_seconds,
        }
    }
}

/// One successful poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Poll sequence number.
    pub seq: u64,
    /// Wall-clock time the poll was issued, in milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// `HH:MM:SS` (UTC) rendering of `timestamp_ms`.
    pub timestamp: String,
    pub snapshot: Snapshot,
    pub scalars: DerivedScalars,
}

impl HistoryEntry {
    pub fn new(seq: u64, timestamp_ms: u64, snapshot: Snapshot, rates: &Rates) -> Self {
        let scalars = DerivedScalars::new(&snapshot, rates);
        Self {
            seq,
            timestamp_ms,
            timestamp: clock_label(timestamp_ms),
            snapshot,
            scalars,
        }
    }
}

/// Format epoch milliseconds as a UTC time of day.
pub fn clock_label(timestamp_ms: u64) -> String {
    let seconds = timestamp_ms / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        (seconds / 3600) % 24,
        (seconds / 60) % 60,
        seconds % 60
    )
}

/// A view window over history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[default]
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
}

impl TimeRange {
    pub const ALL: [TimeRange; 4] = [
        TimeRange::FifteenMinutes,
        TimeRange::OneHour,
        TimeRange::OneDay,
        TimeRange::SevenDays,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TimeRange::FifteenMinutes => "15m",
            TimeRange::OneHour => "1h",
            TimeRange::OneDay => "24h",
            TimeRange::SevenDays => "7d",
        }
    }

    pub fn duration(self) -> Duration {
        const MINUTE: u64 = 60;
        match self {
            TimeRange::FifteenMinutes => Duration::from_secs(15 * MINUTE),
            TimeRange::OneHour => Duration::from_secs(60 * MINUTE),
            TimeRange::OneDay => Duration::from_secs(24 * 60 * MINUTE),
            TimeRange::SevenDays => Duration::from_secs(7 * 24 * 60 * MINUTE),
        }
    }

    /// Number of polls this range spans at the given cadence (at least one).
    pub fn points(self, poll_interval: Duration) -> usize {
        let interval_ms = poll_interval.as_millis().max(1);
        let points = self.duration().as_millis().div_ceil(interval_ms).max(1);
        usize::try_from(points).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeRange::ALL
            .into_iter()
            .find(|range| range.label() == s.trim())
            .ok_or_else(|| format!("Unknown time range: {} (expected 15m, 1h, 24h or 7d)", s))
    }
}

/// Fixed-capacity ring buffer of poll results, oldest first.
///
/// Appends are O(1); once full, each append evicts the oldest entry.
/// Windowing is a read-only view and never changes what is retained.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    poll_interval: Duration,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    /// Create an empty history with the default capacity and cadence.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, DEFAULT_POLL_INTERVAL)
    }

    /// Create an empty history. A zero capacity is raised to one.
    pub fn with_capacity(capacity: usize, poll_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            // Don't preallocate huge buffers up front.
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            poll_interval,
        }
    }

    /// Append an entry, evicting the oldest one when full.
    pub fn append(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// The trailing entries covered by `range`, oldest first.
    ///
    /// Bounded by both the range's point count and what is retained.
    pub fn window(&self, range: TimeRange) -> vec_deque::Iter<'_, HistoryEntry> {
        let points = range.points(self.poll_interval);
        let start = self.entries.len().saturating_sub(points);
        self.entries.range(start..)
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
