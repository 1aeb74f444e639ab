//! Node addresses with exponential-backoff ban state.
//!
//! An [`Address`] is shared (`Arc<Address>`) between the pool that owns it and every
//! in-flight request that was routed to it, so ban state and endpoint details live behind
//! interior locks. Banning is purely time based: an address with `ban_count = n > 0` becomes
//! live again once `floor(e^(n-1)) * base_ban_time` has elapsed since it was last banned.
//!
//! # String forms
//!
//! - Rendered: `protocol://host:httpPort:grpcPort` (see [`Display`](std::fmt::Display))
//! - Compact: `host[:port[:flag]]` where `flag` is `no-ssl` (plain http), `self-signed`
//!   (https accepting self-signed certificates) or anything else (https)
//!
//! Both forms are accepted by [`Endpoint::from_str`](std::str::FromStr).

pub mod pool;

pub use pool::AddressPool;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;
use tokio::time::Instant;

/// Port used when an address string does not carry one.
pub const DEFAULT_PORT: u16 = 443;

/// Default base ban period (one minute).
pub const DEFAULT_BASE_BAN_TIME: Duration = Duration::from_millis(60_000);

/// Errors produced while constructing or parsing an address.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Host component is missing or empty.
    #[error("address host must not be empty")]
    EmptyHost,

    /// A port component is not a valid non-zero `u16`.
    #[error("invalid port '{0}'")]
    InvalidPort(String),

    /// Protocol prefix is neither `http` nor `https`.
    #[error("unsupported protocol '{0}'")]
    UnsupportedProtocol(String),

    /// The string has more components than any supported form.
    #[error("malformed address '{0}'")]
    Malformed(String),
}

/// Wire protocol used to reach a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(AddressError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// Network location of a node, without any ban state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub http_port: u16,
    pub grpc_port: u16,
    pub protocol: Protocol,
    pub allow_self_signed_certificate: bool,
}

impl Endpoint {
    /// Creates an https endpoint on [`DEFAULT_PORT`] for both protocols.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::EmptyHost`] if `host` is empty.
    pub fn new(host: impl Into<String>) -> Result<Self, AddressError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(AddressError::EmptyHost);
        }
        Ok(Self {
            host,
            http_port: DEFAULT_PORT,
            grpc_port: DEFAULT_PORT,
            protocol: Protocol::Https,
            allow_self_signed_certificate: false,
        })
    }

    /// Sets both the HTTP and gRPC port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self.grpc_port = port;
        self
    }

    #[must_use]
    pub fn with_grpc_port(mut self, port: u16) -> Self {
        self.grpc_port = port;
        self
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn with_self_signed_certificate(mut self, allow: bool) -> Self {
        self.allow_self_signed_certificate = allow;
        self
    }

    /// Base URL for HTTP (JSON-RPC) requests.
    #[must_use]
    pub fn http_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.http_port)
    }

    /// Base URL for gRPC requests.
    #[must_use]
    pub fn grpc_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.grpc_port)
    }

    fn parse_rendered(protocol: &str, rest: &str, raw: &str) -> Result<Self, AddressError> {
        let protocol = protocol.parse::<Protocol>()?;
        let parts: Vec<&str> = rest.trim_end_matches('/').split(':').collect();
        let endpoint = match parts.as_slice() {
            [host] => Self::new(*host)?,
            [host, port] => Self::new(*host)?.with_port(parse_port(port)?),
            [host, http, grpc] => {
                Self::new(*host)?.with_port(parse_port(http)?).with_grpc_port(parse_port(grpc)?)
            }
            _ => return Err(AddressError::Malformed(raw.to_string())),
        };
        Ok(endpoint.with_protocol(protocol))
    }

    fn parse_compact(raw: &str) -> Result<Self, AddressError> {
        let parts: Vec<&str> = raw.split(':').collect();
        match parts.as_slice() {
            [host] => Self::new(*host),
            [host, port] => Ok(Self::new(*host)?.with_port(parse_port(port)?)),
            [host, port, flag] => {
                let endpoint = Self::new(*host)?.with_port(parse_port(port)?);
                Ok(match *flag {
                    "no-ssl" => endpoint.with_protocol(Protocol::Http),
                    "self-signed" => endpoint.with_self_signed_certificate(true),
                    _ => endpoint,
                })
            }
            _ => Err(AddressError::Malformed(raw.to_string())),
        }
    }
}

fn parse_port(raw: &str) -> Result<u16, AddressError> {
    match raw.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(AddressError::InvalidPort(raw.to_string())),
    }
}

impl FromStr for Endpoint {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        match raw.split_once("://") {
            Some((protocol, rest)) => Self::parse_rendered(protocol, rest, raw),
            None => Self::parse_compact(raw),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}:{}", self.protocol, self.host, self.http_port, self.grpc_port)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct BanState {
    ban_count: u32,
    ban_start_time: Option<Instant>,
}

/// Length of the ban applied after the `ban_count`-th consecutive ban.
///
/// Returns `None` when the period does not fit in a [`Duration`].
#[must_use]
pub fn ban_period(ban_count: u32, base_ban_time: Duration) -> Option<Duration> {
    if ban_count == 0 {
        return Some(Duration::ZERO);
    }
    let coefficient = f64::from(ban_count - 1).exp().floor();
    Duration::try_from_secs_f64(base_ban_time.as_secs_f64() * coefficient).ok()
}

/// A node endpoint plus its ban state and optional masternode identity.
#[derive(Debug)]
pub struct Address {
    endpoint: RwLock<Endpoint>,
    pro_tx_hash: Option<String>,
    ban: RwLock<BanState>,
}

impl Address {
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint: RwLock::new(endpoint), pro_tx_hash: None, ban: RwLock::default() }
    }

    /// Creates an address identified by a masternode registration hash.
    #[must_use]
    pub fn with_pro_tx_hash(endpoint: Endpoint, pro_tx_hash: impl Into<String>) -> Self {
        Self { pro_tx_hash: Some(pro_tx_hash.into()), ..Self::new(endpoint) }
    }

    /// Parses either string form into a fresh, live address.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] if the string is not a valid address.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        raw.parse::<Endpoint>().map(Self::new)
    }

    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.read().clone()
    }

    #[must_use]
    pub fn host(&self) -> String {
        self.endpoint.read().host.clone()
    }

    #[must_use]
    pub fn http_port(&self) -> u16 {
        self.endpoint.read().http_port
    }

    #[must_use]
    pub fn grpc_port(&self) -> u16 {
        self.endpoint.read().grpc_port
    }

    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.endpoint.read().protocol
    }

    #[must_use]
    pub fn allow_self_signed_certificate(&self) -> bool {
        self.endpoint.read().allow_self_signed_certificate
    }

    #[must_use]
    pub fn pro_tx_hash(&self) -> Option<&str> {
        self.pro_tx_hash.as_deref()
    }

    /// Replaces the network location while keeping identity and ban state.
    pub fn update_endpoint(&self, endpoint: Endpoint) {
        *self.endpoint.write() = endpoint;
    }

    #[must_use]
    pub fn ban_count(&self) -> u32 {
        self.ban.read().ban_count
    }

    #[must_use]
    pub fn ban_start_time(&self) -> Option<Instant> {
        self.ban.read().ban_start_time
    }

    /// Records one more consecutive failure and restarts the ban clock.
    pub fn mark_as_banned(&self) {
        let mut ban = self.ban.write();
        ban.ban_count = ban.ban_count.saturating_add(1);
        ban.ban_start_time = Some(Instant::now());
    }

    /// Clears all ban state.
    pub fn mark_as_live(&self) {
        *self.ban.write() = BanState::default();
    }

    /// Returns `true` if the address may be used now.
    #[must_use]
    pub fn is_live(&self, base_ban_time: Duration) -> bool {
        let ban = *self.ban.read();
        if ban.ban_count == 0 {
            return true;
        }
        let Some(started) = ban.ban_start_time else {
            return true;
        };
        match ban_period(ban.ban_count, base_ban_time).and_then(|p| started.checked_add(p)) {
            Some(expires) => Instant::now() > expires,
            None => false,
        }
    }

    #[must_use]
    pub fn is_banned(&self, base_ban_time: Duration) -> bool {
        !self.is_live(base_ban_time)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.endpoint.read().fmt(f)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
