//! Metrics source abstraction.
//!
//! A source hands back the raw exposition text of one scrape. The poller in
//! [`crate::session`] decides when to call it and what to do with the result.

mod file;
mod http;

pub use file::FileSource;
pub use http::HttpSource;

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::ScrapeError;

/// Trait for fetching raw exposition payloads.
///
/// Polls may overlap, so `fetch` takes `&self` and implementations must be
/// safe to call concurrently.
///
/// # Example
///
/// ```no_run
/// use scrapewatch::{FileSource, MetricsSource};
///
/// # tokio_test::block_on(async {
/// let source = FileSource::new("metrics.txt");
/// match source.fetch().await {
///     Ok(text) => println!("Got {} bytes", text.len()),
///     Err(e) => eprintln!("{}: {}", source.description(), e),
/// }
/// # });
/// ```
#[async_trait]
pub trait MetricsSource: Send + Sync + Debug {
    /// Fetch the current payload.
    async fn fetch(&self) -> Result<String, ScrapeError>;

    /// Returns a human-readable description of the source.
    fn description(&self) -> &str;
}
