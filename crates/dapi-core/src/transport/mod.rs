//! Request transports sharing one retry contract.
//!
//! Both the gRPC and the JSON-RPC transport delegate address selection, failure
//! classification bookkeeping and retries to a [`RequestExecutor`]:
//!
//! 1. ask the provider (per-call override first) for a live address
//! 2. run one attempt against it
//! 3. on a classified failure, apply the [`BanPolicy`], then either surface the error or
//!    retry on a fresh address while budget and live addresses remain
//!
//! A call with `retries = N` makes at most `N + 1` attempts.

pub mod errors;
pub mod grpc;
pub mod http_client;
pub mod json_rpc;

pub use errors::{ResponseError, ResponseErrorKind, TransportError};
pub use grpc::{GrpcCallError, GrpcStub, GrpcTarget, GrpcTransport};
pub use json_rpc::JsonRpcTransport;

use std::{future::Future, sync::Arc, time::Duration};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn, Instrument};

use crate::{
    address::Address,
    provider::{AddressProvider, AddressProviderKind},
};

/// When a failing address gets banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanPolicy {
    Never,
    /// Ban only on failures that will be retried elsewhere.
    #[default]
    OnRetriableFailure,
    /// Ban on every classified failure, before deciding whether to retry.
    OnAnyFailure,
}

impl BanPolicy {
    fn should_ban(self, error: &ResponseError) -> bool {
        match self {
            Self::Never => false,
            Self::OnRetriableFailure => error.is_retriable(),
            Self::OnAnyFailure => true,
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Retry budget; the transport default applies when unset.
    pub retries: Option<u32>,
    /// Per-attempt deadline; the transport default applies when unset.
    pub timeout: Option<Duration>,
    /// Surface deadline failures at once instead of retrying them.
    pub throw_deadline_exceeded: bool,
    /// Provider to use for this call only.
    pub address_provider: Option<AddressProviderKind>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn throw_deadline_exceeded(mut self) -> Self {
        self.throw_deadline_exceeded = true;
        self
    }

    #[must_use]
    pub fn address_provider(mut self, provider: AddressProviderKind) -> Self {
        self.address_provider = Some(provider);
        self
    }
}

/// Outcome of a single failed attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// A failure carrying a recognizable protocol status.
    Classified(ResponseError),
    /// Anything else; returned to the caller untouched.
    Unclassified(Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Defaults shared by every call made through one transport.
#[derive(Debug, Clone)]
pub struct TransportDefaults {
    pub retries: u32,
    pub timeout: Option<Duration>,
    pub ban_policy: BanPolicy,
}

impl Default for TransportDefaults {
    fn default() -> Self {
        Self {
            retries: 5,
            timeout: Some(Duration::from_secs(10)),
            ban_policy: BanPolicy::default(),
        }
    }
}

/// Drives the retry loop for one transport.
pub struct RequestExecutor {
    provider: AddressProviderKind,
    defaults: TransportDefaults,
    last_used_address: RwLock<Option<Arc<Address>>>,
    span: tracing::Span,
}

impl RequestExecutor {
    #[must_use]
    pub fn new(
        provider: AddressProviderKind,
        defaults: TransportDefaults,
        span: tracing::Span,
    ) -> Self {
        Self { provider, defaults, last_used_address: RwLock::new(None), span }
    }

    #[must_use]
    pub fn defaults(&self) -> &TransportDefaults {
        &self.defaults
    }

    #[must_use]
    pub fn provider(&self) -> &AddressProviderKind {
        &self.provider
    }

    #[must_use]
    pub fn last_used_address(&self) -> Option<Arc<Address>> {
        self.last_used_address.read().clone()
    }

    pub fn set_span(&mut self, span: tracing::Span) {
        self.span = span;
    }

    /// Resolves the deadline for one attempt.
    #[must_use]
    pub fn timeout_for(&self, options: &RequestOptions) -> Option<Duration> {
        options.timeout.or(self.defaults.timeout)
    }

    /// Runs `attempt` against live addresses until it succeeds or the contract says stop.
    ///
    /// # Errors
    ///
    /// See [`TransportError`] for the possible outcomes.
    pub async fn execute<T, F, Fut>(
        &self,
        method: &str,
        options: &RequestOptions,
        attempt: F,
    ) -> Result<T, TransportError>
    where
        F: FnMut(Arc<Address>) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        self.run(method, options, attempt).instrument(self.span.clone()).await
    }

    async fn run<T, F, Fut>(
        &self,
        method: &str,
        options: &RequestOptions,
        mut attempt: F,
    ) -> Result<T, TransportError>
    where
        F: FnMut(Arc<Address>) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let provider = options.address_provider.as_ref().unwrap_or(&self.provider);
        let mut retries_left = options.retries.unwrap_or(self.defaults.retries);

        loop {
            let Some(address) = provider.get_live_address().await? else {
                warn!(method = method, provider = provider.as_str(), "no live address available");
                return Err(TransportError::NoAvailableAddresses);
            };

            *self.last_used_address.write() = Some(Arc::clone(&address));
            debug!(method = method, address = %address, retries_left, "sending request");

            let error = match attempt(Arc::clone(&address)).await {
                Ok(response) => {
                    address.mark_as_live();
                    return Ok(response);
                }
                Err(AttemptError::Unclassified(source)) => {
                    debug!(method, address = %address, error = %source, "unclassified failure");
                    return Err(TransportError::Unclassified(source));
                }
                Err(AttemptError::Classified(error)) => error.with_address(Arc::clone(&address)),
            };

            if self.defaults.ban_policy.should_ban(&error) {
                address.mark_as_banned();
                warn!(
                    method = method,
                    address = %address,
                    ban_count = address.ban_count(),
                    kind = error.kind.as_str(),
                    "address banned"
                );
            }

            if !error.is_retriable() {
                return Err(TransportError::Response(error));
            }

            if options.throw_deadline_exceeded && error.kind == ResponseErrorKind::Timeout {
                return Err(TransportError::Response(error));
            }

            if retries_left == 0 {
                warn!(method = method, error = %error, "max retries reached");
                return Err(TransportError::MaxRetriesReached(error));
            }

            if !provider.has_live_addresses().await? {
                warn!(method = method, error = %error, "no live address left to retry on");
                return Err(TransportError::NoAvailableAddressesForRetry(error));
            }

            retries_left -= 1;
            debug!(method = method, kind = error.kind.as_str(), retries_left, "retrying request");
        }
    }
}
