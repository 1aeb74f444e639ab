use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::address::Endpoint;

const MAX_ERROR_BODY: usize = 256;

/// Failures of a single HTTP exchange with a node.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request, or waiting for a free slot, exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The node could not be reached.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Non-success HTTP status with a truncated body.
    #[error("HTTP error {0}: {1}")]
    Status(u16, String),

    /// The in-flight limiter was shut down.
    #[error("request limiter closed")]
    LimiterClosed,

    /// Any other client-side failure (request building, body decoding).
    #[error("http client error: {0}")]
    Client(#[source] reqwest::Error),
}

/// Limits on requests a client sends to DAPI nodes at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Requests allowed in flight across all nodes. Defaults to `256`.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// How long a request may wait for a free slot, in milliseconds. Defaults to `500`.
    #[serde(default = "default_slot_wait_ms")]
    pub slot_wait_ms: u64,

    /// Shorter wait used once fewer than `busy_threshold` slots are free. Defaults to `200`.
    #[serde(default = "default_busy_slot_wait_ms")]
    pub busy_slot_wait_ms: u64,

    /// Free slot count below which the client counts as busy. Defaults to `16`.
    #[serde(default = "default_busy_threshold")]
    pub busy_threshold: usize,

    /// TCP connect timeout in milliseconds. Defaults to `5000`.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_max_in_flight() -> usize {
    256
}

fn default_slot_wait_ms() -> u64 {
    500
}

fn default_busy_slot_wait_ms() -> u64 {
    200
}

fn default_busy_threshold() -> usize {
    16
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            slot_wait_ms: default_slot_wait_ms(),
            busy_slot_wait_ms: default_busy_slot_wait_ms(),
            busy_threshold: default_busy_threshold(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl HttpClientConfig {
    fn slot_wait(&self, free_slots: usize) -> Duration {
        if free_slots < self.busy_threshold {
            Duration::from_millis(self.busy_slot_wait_ms)
        } else {
            Duration::from_millis(self.slot_wait_ms)
        }
    }
}

/// HTTP client shared by every JSON-RPC call of a transport.
///
/// Nodes configured with self-signed certificates get their own connection pool that skips
/// certificate verification; both pools draw from one in-flight limit. The client never
/// retries on its own; retries belong to the transport.
pub struct HttpClient {
    verified: Client,
    self_signed: Client,
    slots: Arc<Semaphore>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns [`HttpError::Client`] if a connection pool cannot be built.
    pub fn new() -> Result<Self, HttpError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// # Errors
    ///
    /// Returns [`HttpError::Client`] if a connection pool cannot be built.
    pub fn with_config(config: HttpClientConfig) -> Result<Self, HttpError> {
        let verified = pool_builder(&config).build().map_err(|e| {
            tracing::error!(error = %e, "failed to build node http client");
            HttpError::Client(e)
        })?;
        let self_signed =
            pool_builder(&config).danger_accept_invalid_certs(true).build().map_err(|e| {
                tracing::error!(error = %e, "failed to build self-signed node http client");
                HttpError::Client(e)
            })?;

        Ok(Self {
            verified,
            self_signed,
            slots: Arc::new(Semaphore::new(config.max_in_flight)),
            config,
        })
    }

    /// Free request slots.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, HttpError> {
        let wait = self.config.slot_wait(self.free_slots());
        match tokio::time::timeout(wait, Arc::clone(&self.slots).acquire_owned()).await {
            Ok(Ok(slot)) => Ok(slot),
            Ok(Err(_)) => Err(HttpError::LimiterClosed),
            Err(_) => {
                tracing::warn!(free_slots = self.free_slots(), "no free http request slot");
                Err(HttpError::Timeout)
            }
        }
    }

    /// POSTs a JSON body to the node's JSON-RPC endpoint (`http_url` + `/`).
    ///
    /// # Errors
    ///
    /// - [`HttpError::Timeout`] if no slot frees up in time or the request times out
    /// - [`HttpError::Connect`] when the node is unreachable
    /// - [`HttpError::Status`] for non-success HTTP status codes
    /// - [`HttpError::LimiterClosed`] and [`HttpError::Client`] for client-side failures
    pub async fn post_json(
        &self,
        endpoint: &Endpoint,
        body: Bytes,
        timeout: Option<Duration>,
    ) -> Result<Bytes, HttpError> {
        let _slot = self.acquire_slot().await?;

        let client =
            if endpoint.allow_self_signed_certificate { &self.self_signed } else { &self.verified };
        let mut request = client
            .post(format!("{}/", endpoint.http_url()))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::trace!(status = status.as_u16(), "node answered with error status");
            return Err(HttpError::Status(status.as_u16(), truncate_body(text)));
        }

        response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout
            } else {
                HttpError::Client(e)
            }
        })
    }
}

fn pool_builder(config: &HttpClientConfig) -> ClientBuilder {
    ClientBuilder::new()
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30))
        .tcp_nodelay(true)
        .use_rustls_tls()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("dapi-client/", env!("CARGO_PKG_VERSION")))
}

/// Maps a send failure without leaking node URLs into the message.
fn send_error(error: reqwest::Error) -> HttpError {
    if error.is_timeout() {
        HttpError::Timeout
    } else if error.is_connect() {
        HttpError::Connect("connection refused or unreachable".to_string())
    } else if error.is_request() {
        HttpError::Connect("request failed".to_string())
    } else {
        HttpError::Client(error)
    }
}

fn truncate_body(text: String) -> String {
    if text.len() <= MAX_ERROR_BODY {
        return text;
    }
    let cut = (0..=MAX_ERROR_BODY).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
    format!("{}... (truncated)", &text[..cut])
}
