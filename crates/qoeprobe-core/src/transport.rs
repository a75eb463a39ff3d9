//! Request transport used by the playback engine
//!
//! `ObservedTransport` wraps any transport and reports every request's issue
//! and completion to a `RequestObserver`, forwarding the result unchanged.
//! This is how the collector counts requests for the error rate.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// What a request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Master playlist
    Manifest,
    /// Media playlist of one variant
    Playlist,
    /// Media segment
    Segment,
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: Url,
    pub kind: RequestKind,
}

impl TransportRequest {
    pub fn new(url: Url, kind: RequestKind) -> Self {
        Self { url, kind }
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub url: Url,
    pub status: u16,
    pub body: Bytes,
}

impl TransportResponse {
    /// HTTP status >= 400
    pub fn is_error_status(&self) -> bool {
        self.status >= 400
    }

    /// Turn an error status into `Error::RequestStatus`
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_error_status() {
            Err(Error::RequestStatus {
                url: self.url.to_string(),
                status: self.status,
            })
        } else {
            Ok(self)
        }
    }
}

/// Request function of a playback engine
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a request. HTTP error statuses are returned as responses,
    /// only transport-level failures are errors.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        (**self).send(request).await
    }
}

/// Cumulative transport statistics, shared with whoever reads them
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    media_bytes: Arc<AtomicU64>,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_media_bytes(&self, bytes: u64) {
        self.media_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Media segment bytes received so far
    pub fn media_bytes_transferred(&self) -> u64 {
        self.media_bytes.load(Ordering::Relaxed)
    }
}

/// HTTP transport over reqwest
pub struct HttpTransport {
    client: Client,
    stats: TransportStats,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            stats: TransportStats::new(),
        }
    }

    pub fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let map_err = |e: reqwest::Error| Error::Request {
            url: request.url.to_string(),
            source: e,
        };

        let response = self
            .client
            .get(request.url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_err)?;

        if request.kind == RequestKind::Segment {
            self.stats.add_media_bytes(body.len() as u64);
        }

        debug!(
            url = %request.url,
            kind = ?request.kind,
            status,
            bytes = body.len(),
            "Request completed"
        );

        Ok(TransportResponse {
            url: request.url,
            status,
            body,
        })
    }
}

/// Receives request lifecycle notifications
pub trait RequestObserver: Send + Sync {
    fn request_issued(&self);
    fn request_completed(&self, failed: bool);
}

/// Decorator that reports requests to an observer and forwards results unchanged
pub struct ObservedTransport<T, O> {
    inner: T,
    observer: O,
}

impl<T: Transport, O: RequestObserver> ObservedTransport<T, O> {
    pub fn new(inner: T, observer: O) -> Self {
        Self { inner, observer }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport, O: RequestObserver> Transport for ObservedTransport<T, O> {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let url = request.url.clone();
        self.observer.request_issued();

        let result = self.inner.send(request).await;

        let failed = match &result {
            Ok(response) => response.is_error_status(),
            Err(_) => true,
        };
        if failed {
            warn!(url = %url, "Request failed");
        }
        self.observer.request_completed(failed);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    /// Replies with scripted statuses; status 0 means a transport failure
    struct ScriptedTransport {
        statuses: Mutex<Vec<u16>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
            let status = self.statuses.lock().unwrap().remove(0);
            if status == 0 {
                return Err(Error::ConnectionTimeout);
            }
            Ok(TransportResponse {
                url: request.url,
                status,
                body: Bytes::from_static(b"segment"),
            })
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        issued: AtomicU64,
        failed: AtomicU64,
        completed: AtomicU64,
    }

    impl RequestObserver for Arc<CountingObserver> {
        fn request_issued(&self) {
            self.issued.fetch_add(1, Ordering::SeqCst);
        }

        fn request_completed(&self, failed: bool) {
            self.completed.fetch_add(1, Ordering::SeqCst);
            if failed {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn request() -> TransportRequest {
        TransportRequest::new(
            Url::parse("https://cdn.example.com/seg1.ts").unwrap(),
            RequestKind::Segment,
        )
    }

    #[tokio::test]
    async fn test_observer_counts_and_forwards() {
        let inner = ScriptedTransport {
            statuses: Mutex::new(vec![200, 404, 0, 206, 500]),
        };
        let observer = Arc::new(CountingObserver::default());
        let transport = ObservedTransport::new(inner, observer.clone());

        let ok = assert_ok!(transport.send(request()).await);
        assert_eq!(ok.status, 200);
        assert_eq!(&ok.body[..], b"segment");

        let not_found = assert_ok!(transport.send(request()).await);
        assert_eq!(not_found.status, 404);

        let err = assert_err!(transport.send(request()).await);
        assert!(matches!(err, Error::ConnectionTimeout));

        assert_ok!(transport.send(request()).await);
        assert_ok!(transport.send(request()).await);

        assert_eq!(observer.issued.load(Ordering::SeqCst), 5);
        assert_eq!(observer.completed.load(Ordering::SeqCst), 5);
        assert_eq!(observer.failed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_error_for_status() {
        let response = TransportResponse {
            url: Url::parse("https://cdn.example.com/a.m3u8").unwrap(),
            status: 403,
            body: Bytes::new(),
        };
        let err = response.error_for_status().unwrap_err();
        assert_eq!(err.error_code(), "REQUEST_STATUS");
    }

    #[test]
    fn test_stats_are_shared() {
        let stats = TransportStats::new();
        let reader = stats.clone();
        stats.add_media_bytes(1500);
        stats.add_media_bytes(500);
        assert_eq!(reader.media_bytes_transferred(), 2000);
    }
}
