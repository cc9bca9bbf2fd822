//! One-shot delivery of attendance records to the remote endpoint.
//!
//! The endpoint is fire-and-forget: a request the transport accepted counts
//! as delivered whatever the remote application makes of it. Only failures
//! below HTTP (connect, DNS, TLS, I/O) are reported as failed.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::record::AttendanceRecord;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The endpoint host could not be reached.
    #[error("could not connect: {0}")]
    Connect(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The request failed for any other reason.
    #[error("request failed: {0}")]
    Request(String),
}

impl From<TransportError> for crate::error::Error {
    fn from(err: TransportError) -> Self {
        Self::transport(err.to_string())
    }
}

/// A network transport able to post a record.
///
/// Implementors return `Ok` as soon as the request is accepted; response
/// bodies are never read.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Post `record` as JSON to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be sent.
    async fn post(&self, url: &str, record: &AttendanceRecord) -> Result<(), TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport around an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, record: &AttendanceRecord) -> Result<(), TransportError> {
        match self.client.post(url).json(record).send().await {
            Ok(resp) => {
                debug!(status = %resp.status(), code = %record.code, "Endpoint accepted request");
                Ok(())
            }
            Err(e) if e.is_timeout() => Err(TransportError::Timeout),
            Err(e) if e.is_connect() => Err(TransportError::Connect(e.to_string())),
            Err(e) => Err(TransportError::Request(e.to_string())),
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The transport accepted the request.
    Delivered,
    /// The transport rejected the request.
    Failed {
        /// Why the send failed.
        reason: String,
    },
    /// No endpoint is configured; nothing was attempted.
    NotConfigured,
}

impl DeliveryOutcome {
    /// Check if the record was handed to the endpoint.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Check if the failure is transient and the record should be queued.
    #[must_use]
    pub fn should_queue(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Sends records to the configured endpoint.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    endpoint: Option<String>,
    transport: Arc<dyn Transport>,
}

impl DeliveryClient {
    /// Create a client over HTTP.
    #[must_use]
    pub fn new(endpoint: Option<String>) -> Self {
        Self::with_transport(endpoint, Arc::new(HttpTransport::new()))
    }

    /// Create a client over the given transport.
    #[must_use]
    pub fn with_transport(endpoint: Option<String>, transport: Arc<dyn Transport>) -> Self {
        let endpoint = endpoint.filter(|url| !url.trim().is_empty());
        Self {
            endpoint,
            transport,
        }
    }

    /// The configured endpoint, if any.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Check if an endpoint is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Attempt a single send of `record`.
    pub async fn send(&self, record: &AttendanceRecord) -> DeliveryOutcome {
        let Some(url) = self.endpoint.as_deref() else {
            return DeliveryOutcome::NotConfigured;
        };

        match self.transport.post(url, record).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => {
                warn!(code = %record.code, error = %e, "Delivery failed");
                DeliveryOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
