//! Rate derivation by differencing cumulative counters.
//!
//! Counters only ever grow while the backend process lives, so a rate is the
//! delta between two snapshots divided by the time between them. Counter
//! resets are not detected; every delta is clamped at zero instead, so a
//! restart shows up as a quiet interval rather than a negative rate.

use serde::Serialize;

use super::round_to;
use super::snapshot::{RouteKey, Snapshot, StatusKey};

/// One per-route output row of a rate computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedRateRow {
    pub handler: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub value: f64,
}

impl DerivedRateRow {
    fn for_route(route: &RouteKey, value: f64) -> Self {
        Self {
            handler: route.handler.clone(),
            method: route.method.clone(),
            status: None,
            value,
        }
    }

    fn for_status(key: &StatusKey, value: f64) -> Self {
        Self {
            status: Some(key.status.clone()),
            ..Self::for_route(&key.route, value)
        }
    }
}

/// Everything derived from one pair of snapshots.
///
/// Each computation produces a complete replacement; nothing is merged with
/// earlier results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rates {
    /// Requests per second across all routes.
    pub total_rps: f64,
    /// Errors as a percentage of requests across all routes.
    pub error_rate_percent: f64,
    /// Mean request duration across all routes, in seconds.
    pub latency_seconds: f64,
    /// Requests per second, by `(handler, method, status)`.
    pub per_route_rps: Vec<DerivedRateRow>,
    /// Mean duration in seconds, by `(handler, method)`.
    pub per_route_latency: Vec<DerivedRateRow>,
    /// Error percentage, by 4xx/5xx `(handler, method, status)`.
    pub per_route_error_rate: Vec<DerivedRateRow>,
}

/// Compute rates between two chronologically ordered snapshots.
///
/// Keys that only exist in `current` yield no row. A zero, negative or
/// non-finite `elapsed_seconds` makes every per-second rate zero.
///
/// ```
/// use scrapewatch::data::{compute_rates, Snapshot};
///
/// let previous = Snapshot::parse(
///     "http_requests_total{handler=\"/search\",method=\"GET\",status=\"200\"} 100\n",
/// );
/// let current = Snapshot::parse(
///     "http_requests_total{handler=\"/search\",method=\"GET\",status=\"200\"} 150\n",
/// );
///
/// let rates = compute_rates(&previous, &current, 5.0);
/// assert_eq!(rates.total_rps, 10.0);
/// assert_eq!(rates.per_route_rps[0].value, 10.0);
/// ```
pub fn compute_rates(previous: &Snapshot, current: &Snapshot, elapsed_seconds: f64) -> Rates {
    let per_second = |delta: f64| {
        if elapsed_seconds.is_finite() && elapsed_seconds > 0.0 {
            round_to(delta / elapsed_seconds, 2)
        } else {
            0.0
        }
    };

    let per_route_rps = current
        .request_counters
        .iter()
        .filter_map(|(key, &count)| {
            let before = previous.request_counters.get(key)?;
            Some(DerivedRateRow::for_status(
                key,
                per_second(delta(count, *before)),
            ))
        })
        .collect();

    let per_route_latency = current
        .durations
        .iter()
        .filter_map(|(route, now)| {
            let before = previous.durations.get(route)?;
            let latency = mean(delta(now.sum, before.sum), delta(now.count, before.count));
            Some(DerivedRateRow::for_route(route, latency))
        })
        .collect();

    let per_route_error_rate = current
        .request_counters
        .iter()
        .filter(|(key, _)| key.is_error())
        .filter_map(|(key, &count)| {
            let before = previous.request_counters.get(key)?;
            let errors = error_delta(previous, current, &key.route);
            Some(DerivedRateRow::for_status(
                key,
                percentage(errors, delta(count, *before)),
            ))
        })
        .collect();

    Rates {
        total_rps: per_second(delta(current.requests_total(), previous.requests_total())),
        error_rate_percent: percentage(
            delta(current.errors_total(), previous.errors_total()),
            delta(current.requests_total(), previous.requests_total()),
        ),
        latency_seconds: mean(
            delta(current.duration_sum_total(), previous.duration_sum_total()),
            delta(
                current.duration_count_total(),
                previous.duration_count_total(),
            ),
        ),
        per_route_rps,
        per_route_latency,
        per_route_error_rate,
    }
}

/// Growth of a counter, clamped at zero.
fn delta(current: f64, previous: f64) -> f64 {
    (current - previous).max(0.0)
}

// An error counter first seen in `current` was born during the interval, so
// it counts from zero; one missing from `current` contributes nothing.
fn error_delta(previous: &Snapshot, current: &Snapshot, route: &RouteKey) -> f64 {
    match current.error_counters.get(route) {
        Some(&now) => delta(now, previous.error_counters.get(route).copied().unwrap_or(0.0)),
        None => 0.0,
    }
}

fn mean(sum_delta: f64, count_delta: f64) -> f64 {
    if count_delta > 0.0 {
        round_to(sum_delta / count_delta, 3)
    } else {
        0.0
    }
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        round_to(100.0 * (part / whole), 2)
    } else {
        0.0
    }
}
