use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tracing::info_span;

use super::{
    AttemptError, BanPolicy, RequestExecutor, RequestOptions, ResponseError, TransportDefaults,
    TransportError,
};
use crate::{address::Address, provider::AddressProviderKind};

/// Where a single gRPC attempt is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcTarget {
    /// `proto://host:grpc_port`
    pub url: String,
    pub allow_self_signed_certificate: bool,
}

impl GrpcTarget {
    #[must_use]
    pub fn from_address(address: &Address) -> Self {
        let endpoint = address.endpoint();
        Self {
            url: endpoint.grpc_url(),
            allow_self_signed_certificate: endpoint.allow_self_signed_certificate,
        }
    }
}

impl fmt::Display for GrpcTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Failure of a generated client call.
#[derive(Debug, thiserror::Error)]
pub enum GrpcCallError {
    /// The server (or the channel) answered with a status.
    #[error("{0}")]
    Status(#[from] tonic::Status),
    /// Anything else, such as a channel that could not be built.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Adapter over a generated gRPC client.
///
/// Implementations connect to `target` (reusing channels as they see fit) and invoke
/// `method` with the prepared request. The request already carries the call deadline.
#[async_trait]
pub trait GrpcStub: Send + Sync {
    type Request: Clone + Send + Sync + 'static;
    type Response: Send + 'static;

    async fn unary(
        &self,
        target: &GrpcTarget,
        method: &str,
        request: tonic::Request<Self::Request>,
    ) -> Result<tonic::Response<Self::Response>, GrpcCallError>;
}

/// gRPC transport with address failover.
///
/// Bans only on retriable failures by default, so a node answering "not found" stays usable.
pub struct GrpcTransport {
    executor: RequestExecutor,
}

impl GrpcTransport {
    #[must_use]
    pub fn new(provider: AddressProviderKind, defaults: TransportDefaults) -> Self {
        let span = info_span!("dapi_transport", transport = "grpc");
        Self { executor: RequestExecutor::new(provider, defaults, span) }
    }

    /// Transport with the default retry budget and [`BanPolicy::OnRetriableFailure`].
    #[must_use]
    pub fn with_provider(provider: AddressProviderKind) -> Self {
        Self::new(
            provider,
            TransportDefaults { ban_policy: BanPolicy::OnRetriableFailure, ..Default::default() },
        )
    }

    /// Replaces the span every request is recorded under.
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

    /// Sends `request` through `stub`, failing over between live addresses.
    ///
    /// # Errors
    ///
    /// Statuses are classified with [`ResponseError::from_grpc_status`]; a deadline hit becomes
    /// a timeout. Non-status failures of the stub are returned as
    /// [`TransportError::Unclassified`].
    pub async fn request<S: GrpcStub>(
        &self,
        stub: &S,
        method: &str,
        request: S::Request,
        options: &RequestOptions,
    ) -> Result<S::Response, TransportError> {
        let timeout = self.executor.timeout_for(options);

        self.executor
            .execute(method, options, |address| {
                let target = GrpcTarget::from_address(&address);
                let mut call = tonic::Request::new(request.clone());
                if let Some(timeout) = timeout {
                    call.set_timeout(timeout);
                }

                async move {
                    let pending = stub.unary(&target, method, call);
                    let result = match timeout {
                        Some(timeout) => tokio::time::timeout(timeout, pending)
                            .await
                            .map_err(|_| AttemptError::Classified(ResponseError::timeout()))?,
                        None => pending.await,
                    };

                    match result {
                        Ok(response) => Ok(response.into_inner()),
                        Err(GrpcCallError::Status(status)) => {
                            tracing::debug!(
                                url = %target,
                                code = ?status.code(),
                                "grpc call failed"
                            );
                            Err(AttemptError::Classified(ResponseError::from_grpc_status(&status)))
                        }
                        Err(GrpcCallError::Other(source)) => {
                            Err(AttemptError::Unclassified(source))
                        }
                    }
                }
            })
            .await
    }
}
