//! HTTP metrics source.
//!
//! Scrapes a Prometheus endpoint such as `http://localhost:8080/metrics`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};

use super::MetricsSource;
use crate::error::ScrapeError;

/// A source that `GET`s an exposition payload over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    endpoint: Url,
    description: String,
}

impl HttpSource {
    /// Create a source for `endpoint`, bounding every request by `timeout`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ScrapeError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ScrapeError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            description: format!("http: {}", endpoint),
            endpoint,
        })
    }

    /// Returns the endpoint being scraped.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl MetricsSource for HttpSource {
    async fn fetch(&self) -> Result<String, ScrapeError> {
        let response = self.client.get(self.endpoint.clone()).send().await?;

        if !response.status().is_success() {
            return Err(ScrapeError::Status(response.status().as_u16()));
        }

        Ok(response.text().await?)
    }

    fn description(&self) -> &str {
        &self.description
    }
}
