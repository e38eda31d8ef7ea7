//! Metric data models and processing.
//!
//! This module turns raw exposition text into snapshots, derives rates from
//! pairs of snapshots, and keeps a bounded history for consumers.
//!
//! ## Submodules
//!
//! - [`duration`]: Parsing and formatting of duration strings (e.g., "5s", "500ms")
//! - [`exposition`]: Prometheus text parser producing a [`Snapshot`]
//! - [`history`]: Ring-buffer history of poll results and time-range windows
//! - [`rates`]: Delta-based RPS, latency and error-rate derivation
//! - [`snapshot`]: The parsed per-poll data model
//!
//! ## Data Flow
//!
//! ```text
//! raw exposition text
//!        │
//!        ▼
//! exposition::parse() ──▶ Snapshot
//!        │
//!        ├──▶ compute_rates(previous, current, elapsed) ──▶ Rates
//!        │
//!        └──▶ History::append() (with DerivedScalars from Rates)
//! ```

pub mod duration;
pub mod exposition;
pub mod history;
pub mod rates;
pub mod snapshot;

pub use exposition::{parse, parse_with_report, LineError, ParseReport, SkippedLine};
pub use history::{DerivedScalars, History, HistoryEntry, TimeRange};
pub use rates::{compute_rates, DerivedRateRow, Rates};
pub use snapshot::{DurationAccumulator, RouteKey, Snapshot, StatusKey, Totals};

/// Round to a fixed number of decimal places.
///
/// Non-finite input becomes 0, so derived values are always finite.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scaled = value * 10f64.powi(places);
    if !scaled.is_finite() {
        // Too large to carry a fractional part anyway.
        return value;
    }
    scaled.round() / 10f64.powi(places)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_places() {
        assert_eq!(round_to(3.33333, 2), 3.33);
        assert_eq!(round_to(0.29999999, 3), 0.3);
        assert_eq!(round_to(2.675, 0), 3.0);
    }

    #[test]
    fn round_to_is_always_finite() {
        assert_eq!(round_to(f64::INFINITY, 2), 0.0);
        assert_eq!(round_to(f64::NEG_INFINITY, 2), 0.0);
        assert_eq!(round_to(f64::NAN, 3), 0.0);
        assert_eq!(round_to(f64::MAX, 2), f64::MAX);
    }
}
