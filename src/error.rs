//! Error types for fetching metrics.

use thiserror::Error;

/// Errors that can occur when fetching an exposition payload.
///
/// The `Display` text is what consumers show as the poll error message.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The endpoint answered with a non-success status.
    #[error("Endpoint returned status {0}")]
    Status(u16),

    /// Connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Timeout waiting for response.
    #[error("Request timed out")]
    Timeout,

    /// The endpoint URL could not be parsed.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Reading a local payload failed.
    #[error("Read error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ScrapeError::Timeout
        } else if err.is_connect() {
            ScrapeError::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            ScrapeError::Status(status.as_u16())
        } else {
            ScrapeError::Http(err.to_string())
        }
    }
}
