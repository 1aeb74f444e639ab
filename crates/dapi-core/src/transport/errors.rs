use std::{fmt, sync::Arc};

use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;
use tonic::{metadata::KeyAndValueRef, Code, Status};

use crate::{address::Address, provider::ProviderError, types::JsonRpcError};

/// gRPC metadata key carrying a DAPI-specific error code on `UNKNOWN` statuses.
pub const CODE_METADATA_KEY: &str = "code";

/// gRPC metadata key carrying a serialized consensus error.
pub const CONSENSUS_ERROR_METADATA_KEY: &str = "dash-serialized-consensus-error-bin";

/// Range of codes reserved for platform consensus errors.
pub const CONSENSUS_CODE_RANGE: std::ops::Range<i64> = 1000..5000;

/// Classification of a failed response.
///
/// Each kind has a fixed retry eligibility: retriable kinds are attempted again on another
/// live address, non-retriable kinds are returned to the caller immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseErrorKind {
    /// The requested entity does not exist.
    NotFound,
    /// The node did not answer within the call deadline.
    Timeout,
    /// The caller sent something the node rejected.
    InvalidRequest,
    /// The node failed or was unreachable.
    ServerError,
    /// The node failed and reported its own stack trace.
    InternalServerError,
    /// Platform consensus rejected the request.
    ProtocolConsensusError,
}

impl ResponseErrorKind {
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ServerError | Self::InternalServerError)
    }

    /// Returns a static string representation for log fields.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::InvalidRequest => "invalid_request",
            Self::ServerError => "server_error",
            Self::InternalServerError => "internal_server_error",
            Self::ProtocolConsensusError => "protocol_consensus_error",
        }
    }

    /// Maps a gRPC status code onto a kind.
    ///
    /// `INTERNAL` maps to [`Self::ServerError`] here; it only becomes
    /// [`Self::InternalServerError`] when the status carries a remote stack.
    #[must_use]
    pub fn from_grpc_code(code: Code) -> Self {
        match code {
            Code::NotFound => Self::NotFound,
            Code::DeadlineExceeded => Self::Timeout,
            Code::InvalidArgument |
            Code::FailedPrecondition |
            Code::AlreadyExists |
            Code::PermissionDenied |
            Code::Unauthenticated |
            Code::OutOfRange |
            Code::Aborted => Self::InvalidRequest,
            // Not a failure; only reachable through a hand-built status.
            Code::Ok |
            Code::Cancelled |
            Code::Unknown |
            Code::ResourceExhausted |
            Code::Unimplemented |
            Code::Internal |
            Code::Unavailable |
            Code::DataLoss => Self::ServerError,
        }
    }

    /// Maps a JSON-RPC error code onto a kind.
    #[must_use]
    pub fn from_json_rpc_code(code: i64) -> Self {
        match code {
            -32700 | -32602..=-32600 => Self::InvalidRequest,
            -32603 | -32099..=-32000 => Self::ServerError,
            _ => Self::InvalidRequest,
        }
    }

    /// Maps an HTTP status of a failed JSON-RPC exchange onto a kind.
    #[must_use]
    pub fn from_http_status(status: u16) -> Self {
        match status {
            404 => Self::NotFound,
            408 => Self::Timeout,
            429 | 500..=599 => Self::ServerError,
            _ => Self::InvalidRequest,
        }
    }
}

impl fmt::Display for ResponseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure from a single node.
#[derive(Debug, Clone, Error)]
#[error("{kind} (code {code}): {message}")]
pub struct ResponseError {
    pub kind: ResponseErrorKind,
    /// Protocol code as reported by the node (gRPC status, JSON-RPC or HTTP code).
    pub code: i64,
    pub message: String,
    /// Stack trace reported by the node, if any.
    pub stack: Option<String>,
    /// Structured error details (JSON-RPC `data`, or ASCII gRPC metadata).
    pub data: Option<Value>,
    /// Serialized consensus error payload.
    pub raw: Option<Bytes>,
    /// Address the failing attempt was sent to.
    pub address: Option<Arc<Address>>,
}

impl ResponseError {
    #[must_use]
    pub fn new(kind: ResponseErrorKind, code: i64, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            stack: None,
            data: None,
            raw: None,
            address: None,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: Arc<Address>) -> Self {
        self.address = Some(address);
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }

    /// Classifies a gRPC status.
    ///
    /// An `UNKNOWN` status carrying a numeric `code` metadata entry is re-mapped: consensus
    /// codes become [`ResponseErrorKind::ProtocolConsensusError`], standard gRPC codes are
    /// classified as that code (except `0`, which leaves the status `UNKNOWN`), and any
    /// other number is treated as an invalid request.
    #[must_use]
    pub fn from_grpc_status(status: &Status) -> Self {
        let metadata = status.metadata();
        let data = ascii_metadata(status);
        let message = status.message().to_string();

        let stack = metadata
            .get("stack")
            .and_then(|v| v.to_str().ok().map(str::to_string))
            .or_else(|| {
                metadata
                    .get_bin("stack-bin")
                    .and_then(|v| v.to_bytes().ok())
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
            });

        let mut code = status.code();
        if code == Code::Unknown {
            let custom = metadata
                .get(CODE_METADATA_KEY)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok());

            if let Some(custom) = custom {
                if CONSENSUS_CODE_RANGE.contains(&custom) {
                    let raw = metadata
                        .get_bin(CONSENSUS_ERROR_METADATA_KEY)
                        .and_then(|v| v.to_bytes().ok());
                    let mut error =
                        Self::new(ResponseErrorKind::ProtocolConsensusError, custom, message)
                            .with_data(data);
                    error.raw = raw;
                    return error;
                }

                match i32::try_from(custom).ok().filter(|c| (0..=16).contains(c)) {
                    // OK cannot describe a failure; the status stays UNKNOWN.
                    Some(0) => {}
                    Some(remapped) => code = Code::from_i32(remapped),
                    None => {
                        return Self::new(ResponseErrorKind::InvalidRequest, custom, message)
                            .with_data(data)
                    }
                }
            }
        }

        let kind = match (code, &stack) {
            (Code::Internal, Some(_)) => ResponseErrorKind::InternalServerError,
            _ => ResponseErrorKind::from_grpc_code(code),
        };

        let mut error = Self::new(kind, i64::from(code as i32), message).with_data(data);
        error.stack = stack;
        error
    }

    /// Classifies a JSON-RPC error object returned in a response body.
    #[must_use]
    pub fn from_json_rpc_error(error: &JsonRpcError) -> Self {
        let code = i64::from(error.code);
        let stack = error.stack().map(str::to_string);

        let kind = match (code, &stack) {
            (-32603, Some(_)) => ResponseErrorKind::InternalServerError,
            _ => ResponseErrorKind::from_json_rpc_code(code),
        };

        let mut classified =
            Self::new(kind, code, error.message.clone()).with_data(error.data.clone());
        classified.stack = stack;
        classified
    }

    #[must_use]
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        Self::new(ResponseErrorKind::from_http_status(status), i64::from(status), body)
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self::new(ResponseErrorKind::Timeout, i64::from(Code::DeadlineExceeded as i32), "timeout")
    }

    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ResponseErrorKind::ServerError, i64::from(Code::Unavailable as i32), message)
    }
}

fn ascii_metadata(status: &Status) -> Option<Value> {
    let mut map = Map::new();
    for entry in status.metadata().iter() {
        if let KeyAndValueRef::Ascii(key, value) = entry {
            if let Ok(value) = value.to_str() {
                map.insert(key.as_str().to_string(), Value::String(value.to_string()));
            }
        }
    }
    (!map.is_empty()).then_some(Value::Object(map))
}

/// Errors returned by transport requests.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The provider had no live address for the first attempt.
    #[error("no available addresses")]
    NoAvailableAddresses,

    /// A retriable failure occurred but every address is now banned.
    #[error("no available addresses for retry: {0}")]
    NoAvailableAddressesForRetry(#[source] ResponseError),

    /// The retry budget was exhausted.
    #[error("max retries reached: {0}")]
    MaxRetriesReached(#[source] ResponseError),

    /// A non-retriable response, or a deadline surfaced on request.
    #[error("{0}")]
    Response(#[source] ResponseError),

    /// The address provider itself failed.
    #[error("address provider failed: {0}")]
    Provider(#[from] ProviderError),

    /// A failure with no recognizable protocol status, passed through untouched.
    #[error("{0}")]
    Unclassified(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl TransportError {
    /// Returns the classified response error behind this failure, if any.
    #[must_use]
    pub fn response_error(&self) -> Option<&ResponseError> {
        match self {
            Self::NoAvailableAddressesForRetry(e) |
            Self::MaxRetriesReached(e) |
            Self::Response(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> Option<ResponseErrorKind> {
        self.response_error().map(|e| e.kind)
    }

    /// Returns the last address contacted before the failure.
    #[must_use]
    pub fn address(&self) -> Option<&Arc<Address>> {
        self.response_error().and_then(|e| e.address.as_ref())
    }
}
