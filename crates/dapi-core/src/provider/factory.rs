//! Turns address options into an [`AddressProviderKind`].
//!
//! The option groups are mutually exclusive:
//!
//! | Group | Result |
//! |---|---|
//! | `address_provider` | [`AddressProviderKind::Custom`] |
//! | `addresses` | [`AddressProviderKind::List`] |
//! | `seeds` (+ `allow_list`) | [`AddressProviderKind::Dynamic`] |
//! | `network` (+ `allow_list`) | the network's built-in bundle |
//!
//! With no group set, the `testnet` bundle is used.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use super::{
    dynamic::{DynamicAddressProvider, EndpointTemplate},
    AddressProvider, AddressProviderKind,
};
use crate::{
    address::{AddressPool, Endpoint, DEFAULT_BASE_BAN_TIME},
    config::ConfigError,
    masternode::{DiffApplier, DiffSubscriber, MasternodeListTracker, StructuralDiffApplier},
    stream::StreamConfig,
};

/// Networks with a built-in address bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Testnet,
    Local,
}

/// Built-in addresses of a [`Network`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkBundle {
    /// Seeds of a masternode list subscription.
    Seeds(&'static [&'static str]),
    /// A fixed set of nodes.
    Addresses(&'static [&'static str]),
}

const MAINNET_SEEDS: &[&str] = &[
    "seed-1.mainnet.networks.dash.org",
    "seed-2.mainnet.networks.dash.org",
    "seed-3.mainnet.networks.dash.org",
    "seed-4.mainnet.networks.dash.org",
];

const TESTNET_SEEDS: &[&str] = &[
    "seed-1.testnet.networks.dash.org:1443",
    "seed-2.testnet.networks.dash.org:1443",
    "seed-3.testnet.networks.dash.org:1443",
    "seed-4.testnet.networks.dash.org:1443",
    "seed-5.testnet.networks.dash.org:1443",
];

const LOCAL_ADDRESSES: &[&str] = &["127.0.0.1:2443:self-signed"];

impl Network {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Local => "local",
        }
    }

    #[must_use]
    pub fn bundle(&self) -> NetworkBundle {
        match self {
            Self::Mainnet => NetworkBundle::Seeds(MAINNET_SEEDS),
            Self::Testnet => NetworkBundle::Seeds(TESTNET_SEEDS),
            Self::Local => NetworkBundle::Addresses(LOCAL_ADDRESSES),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "local" => Ok(Self::Local),
            other => Err(ConfigError::Invalid(format!("unknown network: {other}"))),
        }
    }
}

/// Where a client finds its nodes.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AddressOptions {
    /// Caller-supplied provider. Only settable programmatically.
    #[serde(skip)]
    pub address_provider: Option<Arc<dyn AddressProvider>>,

    /// Fixed node addresses.
    #[serde(default)]
    pub addresses: Option<Vec<String>>,

    /// Seed nodes of the masternode list subscription.
    #[serde(default)]
    pub seeds: Option<Vec<String>>,

    /// Restricts masternode-derived addresses to these. Empty means no restriction, the
    /// same as leaving it unset. Only valid with seeds or a seed-based network.
    #[serde(default)]
    pub allow_list: Option<Vec<String>>,

    #[serde(default)]
    pub network: Option<Network>,
}

impl fmt::Debug for AddressOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressOptions")
            .field("address_provider", &self.address_provider.as_ref().map(|_| "custom"))
            .field("addresses", &self.addresses)
            .field("seeds", &self.seeds)
            .field("allow_list", &self.allow_list)
            .field("network", &self.network)
            .finish()
    }
}

impl AddressOptions {
    /// Rejects combinations of mutually exclusive groups.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ConflictingOptions`] naming the first clashing pair.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let groups = [
            ("address_provider", self.address_provider.is_some()),
            ("addresses", self.addresses.is_some()),
            ("seeds", self.seeds.is_some()),
            ("network", self.network.is_some()),
        ];

        let mut set = groups.iter().filter(|(_, present)| *present).map(|(name, _)| *name);
        if let (Some(first), Some(second)) = (set.next(), set.next()) {
            return Err(ConfigError::ConflictingOptions(first, second));
        }

        if self.allow_list.is_some() {
            if self.address_provider.is_some() {
                return Err(ConfigError::ConflictingOptions("address_provider", "allow_list"));
            }
            if self.addresses.is_some() {
                return Err(ConfigError::ConflictingOptions("addresses", "allow_list"));
            }
            let static_network =
                self.network.is_some_and(|n| matches!(n.bundle(), NetworkBundle::Addresses(_)));
            if static_network {
                return Err(ConfigError::ConflictingOptions("network", "allow_list"));
            }
        }

        Ok(())
    }
}

/// Builds address providers from [`AddressOptions`].
#[derive(Clone)]
pub struct ProviderFactory {
    base_ban_time: Duration,
    subscriber: Option<Arc<dyn DiffSubscriber>>,
    applier: Arc<dyn DiffApplier>,
    stream: StreamConfig,
    template: EndpointTemplate,
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self {
            base_ban_time: DEFAULT_BASE_BAN_TIME,
            subscriber: None,
            applier: Arc::new(StructuralDiffApplier),
            stream: StreamConfig::default(),
            template: EndpointTemplate::default(),
        }
    }
}

impl ProviderFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn base_ban_time(mut self, base_ban_time: Duration) -> Self {
        self.base_ban_time = base_ban_time;
        self
    }

    /// Source of masternode list diffs; required for seed-based options.
    #[must_use]
    pub fn diff_subscriber(mut self, subscriber: Arc<dyn DiffSubscriber>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    #[must_use]
    pub fn diff_applier(mut self, applier: Arc<dyn DiffApplier>) -> Self {
        self.applier = applier;
        self
    }

    #[must_use]
    pub fn stream_config(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub fn endpoint_template(mut self, template: EndpointTemplate) -> Self {
        self.template = template;
        self
    }

    /// Selects and builds the provider described by `options`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ConflictingOptions`] when exclusive groups are combined
    /// - [`ConfigError::Address`] for an unparsable address string
    /// - [`ConfigError::MissingDiffSubscriber`] for seed-based options without a subscriber
    pub fn build(&self, options: &AddressOptions) -> Result<AddressProviderKind, ConfigError> {
        options.validate()?;

        if let Some(provider) = &options.address_provider {
            return Ok(AddressProviderKind::Custom(Arc::clone(provider)));
        }

        if let Some(addresses) = &options.addresses {
            return self.list(addresses);
        }

        let allow_list = options.allow_list.as_deref().unwrap_or_default();
        if let Some(seeds) = &options.seeds {
            return self.dynamic(seeds, allow_list);
        }

        let network = options.network.unwrap_or_default();
        tracing::debug!(network = %network, "using built-in network addresses");
        match network.bundle() {
            NetworkBundle::Seeds(seeds) => self.dynamic(seeds, allow_list),
            NetworkBundle::Addresses(addresses) => self.list(addresses),
        }
    }

    fn list<S: AsRef<str>>(&self, addresses: &[S]) -> Result<AddressProviderKind, ConfigError> {
        let pool = AddressPool::from_strings(addresses, self.base_ban_time)?;
        Ok(AddressProviderKind::List(Arc::new(pool)))
    }

    fn dynamic<S: AsRef<str>>(
        &self,
        seeds: &[S],
        allow_list: &[String],
    ) -> Result<AddressProviderKind, ConfigError> {
        let subscriber = self.subscriber.clone().ok_or(ConfigError::MissingDiffSubscriber)?;
        let seeds = AddressPool::from_strings(seeds, self.base_ban_time)?;

        let allow_list = if allow_list.is_empty() {
            None
        } else {
            let parsed: Result<Vec<Endpoint>, _> = allow_list.iter().map(|a| a.parse()).collect();
            Some(parsed?)
        };

        let tracker = MasternodeListTracker::new(
            subscriber,
            Arc::new(seeds),
            Arc::clone(&self.applier),
            self.stream.clone(),
        );
        let provider = DynamicAddressProvider::new(
            Arc::new(tracker),
            AddressPool::with_base_ban_time(Vec::new(), self.base_ban_time),
            allow_list,
            self.template.clone(),
        );
        Ok(AddressProviderKind::Dynamic(Arc::new(provider)))
    }
}
