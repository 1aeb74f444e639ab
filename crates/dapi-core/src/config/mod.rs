//! Client configuration with layered loading.
//!
//! Each layer overrides the one before it: `Default` values, then the TOML file named by
//! `DAPI_CLIENT_CONFIG`, then `DAPI__*` environment variables.
//!
//! # Sections
//!
//! - [`TransportConfig`]: retry budget, deadlines, ban policies
//! - [`AddressOptions`]: where nodes come from (static list, seeds or a named network)
//! - [`StreamConfig`]: masternode list subscription reconnection
//! - [`HttpClientConfig`]: JSON-RPC HTTP client concurrency
//! - [`LoggingConfig`]: log level and format
//!
//! # Example
//!
//! ```toml
//! [transport]
//! retries = 3
//! timeout_ms = 5000
//!
//! [addresses]
//! seeds = ["seed-1.testnet.networks.dash.org:1443"]
//! allow_list = ["https://10.0.0.2:443:443"]
//!
//! [stream]
//! max_retries_on_error = -1
//! ```

use crate::{
    address::{AddressError, Endpoint, DEFAULT_PORT},
    provider::{factory::AddressOptions, EndpointTemplate},
    stream::StreamConfig,
    transport::{http_client::HttpClientConfig, BanPolicy, TransportDefaults},
};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use thiserror::Error;

/// Errors raised while loading configuration or building providers from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    #[error("`{0}` cannot be combined with `{1}`")]
    ConflictingOptions(&'static str, &'static str),

    #[error("seed-based discovery requires a diff subscriber")]
    MissingDiffSubscriber,
}

/// Request transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Retries after the first attempt of every call. Defaults to `5`.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Per-attempt deadline in milliseconds. Must be greater than 0. Defaults to `10000`.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Ban length of the first ban in milliseconds. Defaults to `60000`.
    #[serde(default = "default_base_ban_time_ms")]
    pub base_ban_time_ms: u64,

    /// Defaults to `on_any_failure`.
    #[serde(default = "default_json_rpc_ban_policy")]
    pub json_rpc_ban_policy: BanPolicy,

    /// Defaults to `on_retriable_failure`.
    #[serde(default = "default_grpc_ban_policy")]
    pub grpc_ban_policy: BanPolicy,

    /// Port of masternode-derived addresses that advertise none. Defaults to `443`.
    #[serde(default = "default_port")]
    pub default_port: u16,
}

fn default_retries() -> u32 {
    5
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_base_ban_time_ms() -> u64 {
    60_000
}

fn default_json_rpc_ban_policy() -> BanPolicy {
    BanPolicy::OnAnyFailure
}

fn default_grpc_ban_policy() -> BanPolicy {
    BanPolicy::OnRetriableFailure
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            timeout_ms: default_timeout_ms(),
            base_ban_time_ms: default_base_ban_time_ms(),
            json_rpc_ban_policy: default_json_rpc_ban_policy(),
            grpc_ban_policy: default_grpc_ban_policy(),
            default_port: default_port(),
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn base_ban_time(&self) -> Duration {
        Duration::from_millis(self.base_ban_time_ms)
    }

    #[must_use]
    pub fn json_rpc_defaults(&self) -> TransportDefaults {
        self.defaults(self.json_rpc_ban_policy)
    }

    #[must_use]
    pub fn grpc_defaults(&self) -> TransportDefaults {
        self.defaults(self.grpc_ban_policy)
    }

    fn defaults(&self, ban_policy: BanPolicy) -> TransportDefaults {
        TransportDefaults { retries: self.retries, timeout: Some(self.timeout()), ban_policy }
    }

    /// Template for addresses derived from the masternode list.
    #[must_use]
    pub fn endpoint_template(&self) -> EndpointTemplate {
        EndpointTemplate { default_port: self.default_port, ..EndpointTemplate::default() }
    }
}

/// Subscriber settings used by [`crate::logging::init_logging`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level for `dapi_core` events when `RUST_LOG` is unset. Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// Root client configuration containing all subsystem settings.
///
/// Loaded with the `DAPI` prefix for environment overrides using `__` as a separator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub addresses: AddressOptions,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub http: HttpClientConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClientConfig {
    /// Reads `config_path` (missing files are allowed) and applies `DAPI__` overrides.
    ///
    /// Environment variables with the `DAPI__` prefix can override any configuration value.
    /// Use `__` as a separator for nested fields (e.g., `DAPI__TRANSPORT__RETRIES=3`).
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("transport.retries", 5)?
            .set_default("transport.timeout_ms", 10_000)?
            .set_default("transport.base_ban_time_ms", 60_000)?
            .set_default("transport.json_rpc_ban_policy", "on_any_failure")?
            .set_default("transport.grpc_ban_policy", "on_retriable_failure")?
            .set_default("transport.default_port", i64::from(DEFAULT_PORT))?
            .set_default("stream.reconnect_after_ms", 600_000)?
            .set_default("stream.max_retries_on_error", 10)?
            .set_default("stream.retry_on_error_delay_ms", 1_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("DAPI").separator("__"))
            .build()?;

        Ok(config_builder.try_deserialize()?)
    }

    /// Loads configuration from `config/dapi-client.toml` with fallback to defaults.
    ///
    /// The config file path can be overridden using the `DAPI_CLIENT_CONFIG` environment
    /// variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file or an override does not deserialize.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("DAPI_CLIENT_CONFIG")
            .unwrap_or_else(|_| "config/dapi-client.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Rejects settings no client could run with:
    /// - the request timeout is greater than zero
    /// - every address string parses
    /// - address groups are not mixed
    /// - stream retry limits are in range
    /// - logging format is either `"json"` or `"pretty"`
    ///
    /// # Errors
    ///
    /// Returns the first violated rule as a message.
    pub fn validate(&self) -> Result<(), String> {
        if self.transport.timeout_ms == 0 {
            return Err("Transport timeout must be greater than 0".to_string());
        }

        if self.transport.default_port == 0 {
            return Err("Default port must be greater than 0".to_string());
        }

        self.addresses.validate().map_err(|e| e.to_string())?;

        let lists = [&self.addresses.addresses, &self.addresses.seeds, &self.addresses.allow_list];
        for raw in lists.into_iter().flatten().flatten() {
            raw.parse::<Endpoint>().map_err(|e| format!("Invalid address '{raw}': {e}"))?;
        }

        if matches!(&self.addresses.addresses, Some(list) if list.is_empty()) {
            return Err("Address list cannot be empty".to_string());
        }

        if matches!(&self.addresses.seeds, Some(list) if list.is_empty()) {
            return Err("Seed list cannot be empty".to_string());
        }

        self.stream.validate()?;

        if self.http.max_in_flight == 0 {
            return Err("http.max_in_flight must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("logging.format must be \"json\" or \"pretty\"".to_string());
        }

        Ok(())
    }
}
