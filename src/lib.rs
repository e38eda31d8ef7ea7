//! # scrapewatch
//!
//! Metrics core for the search engine admin console.
//!
//! This crate polls the search service's Prometheus endpoint, parses the raw
//! exposition text into snapshots, keeps a bounded history of them, and
//! derives request rates, mean latencies and error rates by differencing
//! cumulative counters between consecutive snapshots.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Session                            │
//! │  ┌─────────┐    ┌──────────────┐    ┌───────┐    ┌─────────┐ │
//! │  │ source  │───▶│  exposition  │───▶│ rates │───▶│ history │ │
//! │  │ (fetch) │    │   (parse)    │    │(delta)│    │ (ring)  │ │
//! │  └─────────┘    └──────────────┘    └───────┘    └─────────┘ │
//! │       ▲                                               │      │
//! │  HttpSource | FileSource                  window(range)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`source`]**: The [`MetricsSource`] trait with HTTP and file implementations
//! - **[`data`]**: Snapshot model, exposition parser, rate calculator and history
//! - **[`session`]**: The poll loop with its ordering rules and cancellable handle
//! - **[`config`]**: Layered settings (defaults, TOML file, environment)
//!
//! ## Usage
//!
//! ### Pure functions
//!
//! ```
//! use scrapewatch::{compute_rates, Snapshot};
//!
//! let previous = Snapshot::parse(concat!(
//!     "http_request_duration_seconds_sum{handler=\"/search\",method=\"GET\"} 2.0\n",
//!     "http_request_duration_seconds_count{handler=\"/search\",method=\"GET\"} 10\n",
//! ));
//! let current = Snapshot::parse(concat!(
//!     "http_request_duration_seconds_sum{handler=\"/search\",method=\"GET\"} 3.5\n",
//!     "http_request_duration_seconds_count{handler=\"/search\",method=\"GET\"} 15\n",
//! ));
//!
//! let rates = compute_rates(&previous, &current, 5.0);
//! assert_eq!(rates.per_route_latency[0].value, 0.3);
//! ```
//!
//! ### Polling an endpoint
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use scrapewatch::{HttpSource, PollOptions, Session};
//!
//! # tokio_test::block_on(async {
//! let options = PollOptions::default();
//! let source = HttpSource::new("http://localhost:8080/metrics", options.request_timeout).unwrap();
//! let session = Session::start(Arc::new(source), options);
//!
//! tokio::time::sleep(Duration::from_secs(30)).await;
//! session.read(|state| println!("{:.2} rps", state.rates().total_rps));
//! session.stop().await;
//! # });
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod session;
pub mod source;

// Re-export main types for convenience
pub use config::Settings;
pub use data::{
    compute_rates, parse, DerivedRateRow, History, HistoryEntry, Rates, Snapshot, TimeRange,
};
pub use error::ScrapeError;
pub use session::{PollOptions, Session, SessionState};
pub use source::{FileSource, HttpSource, MetricsSource};
