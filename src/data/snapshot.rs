//! Parsed metric state at a single poll instant.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

/// Identifies a route by handler path and HTTP method.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RouteKey {
    pub handler: String,
    pub method: String,
}

impl RouteKey {
    pub fn new(handler: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            method: method.into(),
        }
    }
}

/// A route plus the response status it completed with.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StatusKey {
    #[serde(flatten)]
    pub route: RouteKey,
    pub status: String,
}

impl StatusKey {
    pub fn new(
        handler: impl Into<String>,
        method: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            route: RouteKey::new(handler, method),
            status: status.into(),
        }
    }

    /// Whether the status denotes a client or server error (4xx/5xx).
    pub fn is_error(&self) -> bool {
        self.status.starts_with('4') || self.status.starts_with('5')
    }
}

/// Cumulative histogram/summary accumulator for one route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DurationAccumulator {
    /// Sum of observed durations, in seconds.
    pub sum: f64,
    /// Number of observations.
    pub count: f64,
}

/// Process-wide totals. Filled from explicit unlabeled samples when the
/// payload has them, otherwise summed from the keyed maps after parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub requests_total: Option<f64>,
    pub errors_total: Option<f64>,
    pub duration_sum_total: Option<f64>,
    pub duration_count_total: Option<f64>,
}

/// The parsed state of one exposition payload.
///
/// All counters are cumulative since the backend process started; a snapshot
/// never holds rates. Two snapshots are only comparable when they come from
/// the same running process.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub cpu_percent: Option<f64>,
    pub memory_gib: Option<f64>,
    #[serde(serialize_with = "as_entries")]
    pub request_counters: BTreeMap<StatusKey, f64>,
    #[serde(serialize_with = "as_entries")]
    pub error_counters: BTreeMap<RouteKey, f64>,
    #[serde(serialize_with = "as_entries")]
    pub durations: BTreeMap<RouteKey, DurationAccumulator>,
    pub totals: Totals,
}

impl Snapshot {
    /// Parse an exposition payload. See [`crate::data::exposition::parse`].
    pub fn parse(text: &str) -> Self {
        super::exposition::parse(text)
    }

    pub fn requests_total(&self) -> f64 {
        self.totals.requests_total.unwrap_or(0.0)
    }

    pub fn errors_total(&self) -> f64 {
        self.totals.errors_total.unwrap_or(0.0)
    }

    pub fn duration_sum_total(&self) -> f64 {
        self.totals.duration_sum_total.unwrap_or(0.0)
    }

    pub fn duration_count_total(&self) -> f64 {
        self.totals.duration_count_total.unwrap_or(0.0)
    }

    /// Fill every total the payload did not state explicitly from the keyed maps.
    pub(crate) fn fill_totals(&mut self) {
        let totals = &mut self.totals;
        totals
            .requests_total
            .get_or_insert_with(|| self.request_counters.values().sum());
        totals
            .errors_total
            .get_or_insert_with(|| self.error_counters.values().sum());
        totals
            .duration_sum_total
            .get_or_insert_with(|| self.durations.values().map(|d| d.sum).sum());
        totals
            .duration_count_total
            .get_or_insert_with(|| self.durations.values().map(|d| d.count).sum());
    }
}

// JSON object keys must be strings, so keyed maps serialize as a list of
// `{key fields..., value}` records instead.
fn as_entries<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    K: Serialize,
    V: Serialize,
    S: Serializer,
{
    #[derive(Serialize)]
    struct Entry<'a, K, V> {
        #[serde(flatten)]
        key: &'a K,
        value: &'a V,
    }

    serializer.collect_seq(map.iter().map(|(key, value)| Entry { key, value }))
}
