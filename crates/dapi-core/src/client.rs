//! Entry point wiring configuration, address provider and transports together.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    config::{ClientConfig, ConfigError},
    masternode::{DiffApplier, DiffSubscriber},
    provider::{AddressProvider, AddressProviderKind, ProviderFactory},
    transport::{http_client::HttpClient, GrpcTransport, JsonRpcTransport},
};

/// Errors that can occur during client construction.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// HTTP client initialization failed
    #[error("Failed to initialize HTTP client: {0}")]
    HttpClientInit(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The address options could not be turned into a provider
    #[error(transparent)]
    Provider(#[from] ConfigError),
}

/// Builder for constructing a [`DapiClient`].
///
/// # Examples
///
/// ```no_run
/// # use dapi_core::{client::DapiClientBuilder, config::ClientConfig};
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut config = ClientConfig::default();
/// config.addresses.addresses = Some(vec!["127.0.0.1:3000:no-ssl".to_string()]);
///
/// let client = DapiClientBuilder::new().config(config).build()?;
/// assert_eq!(client.address_provider().as_str(), "list");
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct DapiClientBuilder {
    config: ClientConfig,
    subscriber: Option<Arc<dyn DiffSubscriber>>,
    applier: Option<Arc<dyn DiffApplier>>,
}

impl DapiClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `provider` instead of any configured address group.
    #[must_use]
    pub fn address_provider(mut self, provider: Arc<dyn AddressProvider>) -> Self {
        self.config.addresses.address_provider = Some(provider);
        self
    }

    /// Sets the masternode list diff source used by seed and network options.
    #[must_use]
    pub fn diff_subscriber(mut self, subscriber: Arc<dyn DiffSubscriber>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    /// Replaces the structural diff applier.
    #[must_use]
    pub fn diff_applier(mut self, applier: Arc<dyn DiffApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns `BuilderError::InvalidConfig` if the configuration fails validation.
    /// Returns `BuilderError::Provider` if no address provider can be built from it.
    /// Returns `BuilderError::HttpClientInit` if HTTP client initialization fails.
    pub fn build(self) -> Result<DapiClient, BuilderError> {
        let config = self.config;
        config.validate().map_err(BuilderError::InvalidConfig)?;

        let mut factory = ProviderFactory::new()
            .base_ban_time(config.transport.base_ban_time())
            .stream_config(config.stream.clone())
            .endpoint_template(config.transport.endpoint_template());
        if let Some(subscriber) = self.subscriber {
            factory = factory.diff_subscriber(subscriber);
        }
        if let Some(applier) = self.applier {
            factory = factory.diff_applier(applier);
        }
        let provider = factory.build(&config.addresses)?;

        let http = Arc::new(
            HttpClient::with_config(config.http.clone())
                .map_err(|e| BuilderError::HttpClientInit(e.to_string()))?,
        );

        let json_rpc = JsonRpcTransport::new(
            provider.clone(),
            config.transport.json_rpc_defaults(),
            http,
        );
        let grpc = GrpcTransport::new(provider.clone(), config.transport.grpc_defaults());

        tracing::info!(provider = provider.as_str(), "dapi client ready");

        Ok(DapiClient { config, provider, json_rpc, grpc })
    }
}

/// A configured client: one address provider shared by both transports.
///
/// Clones of [`DapiClient::address_provider`] share the client's masternode list
/// subscription. It keeps running until [`DapiClient::shutdown`] is called or the last
/// holder of the provider is dropped.
pub struct DapiClient {
    config: ClientConfig,
    provider: AddressProviderKind,
    json_rpc: JsonRpcTransport,
    grpc: GrpcTransport,
}

impl DapiClient {
    #[must_use]
    pub fn builder() -> DapiClientBuilder {
        DapiClientBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn address_provider(&self) -> &AddressProviderKind {
        &self.provider
    }

    #[must_use]
    pub fn json_rpc(&self) -> &JsonRpcTransport {
        &self.json_rpc
    }

    #[must_use]
    pub fn grpc(&self) -> &GrpcTransport {
        &self.grpc
    }

    /// Stops the masternode list subscription, if any, for every holder of the provider.
    /// Idempotent.
    pub fn shutdown(&self) {
        if let AddressProviderKind::Dynamic(provider) = &self.provider {
            provider.tracker().stop();
        }
    }
}
