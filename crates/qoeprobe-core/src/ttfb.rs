//! Time-to-first-byte probe
//!
//! Fetches the source directly, bypassing caches, and times the arrival of
//! the first body chunk. The response is dropped right after, which aborts
//! the transfer.

use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

/// Measures time to first byte of a URL
#[async_trait]
pub trait FirstByteProbe: Send + Sync {
    async fn measure(&self, url: &Url) -> Result<Duration>;
}

/// TTFB probe over HTTP
pub struct HttpFirstByteProbe {
    client: Client,
}

impl HttpFirstByteProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FirstByteProbe for HttpFirstByteProbe {
    #[instrument(skip(self))]
    async fn measure(&self, url: &Url) -> Result<Duration> {
        let start = Instant::now();

        let mut response = self
            .client
            .get(url.clone())
            .header(CACHE_CONTROL, "no-store")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .map_err(|e| Error::Request {
                url: url.to_string(),
                source: e,
            })?;

        let first = response.chunk().await.map_err(|e| Error::Request {
            url: url.to_string(),
            source: e,
        })?;
        let elapsed = start.elapsed();

        debug!(
            status = response.status().as_u16(),
            first_chunk = first.as_ref().map(|c| c.len()).unwrap_or(0),
            elapsed_ms = elapsed.as_millis(),
            "First byte received"
        );
        drop(response);

        Ok(elapsed)
    }
}
