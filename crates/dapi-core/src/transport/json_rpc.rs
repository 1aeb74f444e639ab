use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use bytes::Bytes;
use serde_json::Value;
use tracing::info_span;

use super::{
    http_client::{HttpClient, HttpError},
    AttemptError, BanPolicy, RequestExecutor, RequestOptions, ResponseError, TransportDefaults,
    TransportError,
};
use crate::{
    address::Address,
    provider::AddressProviderKind,
    types::{JsonRpcRequest, JsonRpcResponse},
};

/// JSON-RPC over HTTP transport with address failover.
///
/// Bans every address that produced a classified failure by default, including
/// non-retriable ones.
pub struct JsonRpcTransport {
    executor: RequestExecutor,
    http: Arc<HttpClient>,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    #[must_use]
    pub fn new(
        provider: AddressProviderKind,
        defaults: TransportDefaults,
        http: Arc<HttpClient>,
    ) -> Self {
        let span = info_span!("dapi_transport", transport = "json_rpc");
        Self {
            executor: RequestExecutor::new(provider, defaults, span),
            http,
            next_id: AtomicU64::new(1),
        }
    }

    /// Transport with the default retry budget and [`BanPolicy::OnAnyFailure`].
    #[must_use]
    pub fn with_provider(provider: AddressProviderKind, http: Arc<HttpClient>) -> Self {
        Self::new(
            provider,
            TransportDefaults { ban_policy: BanPolicy::OnAnyFailure, ..Default::default() },
            http,
        )
    }

    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.executor.set_span(span);
        self
    }

    #[must_use]
    pub fn last_used_address(&self) -> Option<Arc<Address>> {
        self.executor.last_used_address()
    }

    #[must_use]
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Calls `method` with `params` and returns the `result` member of the response.
    ///
    /// A response without a result yields [`Value::Null`].
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] once the retry contract gives up.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        options: &RequestOptions,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_vec(&JsonRpcRequest::new(method, params, id))
            .map(Bytes::from)
            .map_err(|e| TransportError::Unclassified(Box::new(e)))?;
        let timeout = self.executor.timeout_for(options);

        self.executor
            .execute(method, options, |address| {
                let endpoint = address.endpoint();
                let body = body.clone();
                let http = &self.http;

                async move {
                    let raw = http
                        .post_json(&endpoint, body, timeout)
                        .await
                        .map_err(classify_http_error)?;
                    parse_response(&raw)
                }
            })
            .await
    }
}

fn classify_http_error(error: HttpError) -> AttemptError {
    match error {
        HttpError::Timeout => AttemptError::Classified(ResponseError::timeout()),
        HttpError::Connect(message) => {
            AttemptError::Classified(ResponseError::unavailable(message))
        }
        HttpError::Status(status, body) => {
            AttemptError::Classified(ResponseError::from_http_status(status, body))
        }
        other @ (HttpError::LimiterClosed | HttpError::Client(_)) => {
            AttemptError::Unclassified(Box::new(other))
        }
    }
}

fn parse_response(raw: &[u8]) -> Result<Value, AttemptError> {
    let response: JsonRpcResponse = serde_json::from_slice(raw).map_err(|e| {
        tracing::debug!(error = %e, "malformed json-rpc response");
        AttemptError::Classified(ResponseError::unavailable(format!("malformed response: {e}")))
    })?;

    if let Some(error) = response.error {
        return Err(AttemptError::Classified(ResponseError::from_json_rpc_error(&error)));
    }

    Ok(response.result.unwrap_or(Value::Null))
}
