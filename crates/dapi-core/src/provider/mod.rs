//! Address providers: where transports get the next node to talk to.
//!
//! Three strategies exist and are fixed when a client is built:
//!
//! - [`AddressProviderKind::List`]: a static [`AddressPool`]
//! - [`AddressProviderKind::Dynamic`]: a pool refreshed from the live masternode list
//! - [`AddressProviderKind::Custom`]: any caller-supplied [`AddressProvider`]

pub mod dynamic;
pub mod factory;

pub use dynamic::{DynamicAddressProvider, EndpointTemplate};
pub use factory::{AddressOptions, Network, ProviderFactory};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    address::{Address, AddressPool},
    masternode::tracker::TrackerError,
};

/// Errors raised while looking up an address.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The masternode list could not be obtained.
    #[error("masternode list unavailable: {0}")]
    Tracker(#[from] TrackerError),

    /// Failure reported by a custom provider.
    #[error("{0}")]
    Custom(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Source of live node addresses.
#[async_trait]
pub trait AddressProvider: Send + Sync {
    /// Returns one live address, or `None` when every known address is banned.
    async fn get_live_address(&self) -> Result<Option<Arc<Address>>, ProviderError>;

    async fn has_live_addresses(&self) -> Result<bool, ProviderError>;
}

#[async_trait]
impl AddressProvider for AddressPool {
    async fn get_live_address(&self) -> Result<Option<Arc<Address>>, ProviderError> {
        Ok(AddressPool::get_live_address(self))
    }

    async fn has_live_addresses(&self) -> Result<bool, ProviderError> {
        Ok(AddressPool::has_live_addresses(self))
    }
}

/// The provider strategy selected for a client.
#[derive(Clone)]
pub enum AddressProviderKind {
    List(Arc<AddressPool>),
    Dynamic(Arc<DynamicAddressProvider>),
    Custom(Arc<dyn AddressProvider>),
}

impl AddressProviderKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List(_) => "list",
            Self::Dynamic(_) => "dynamic",
            Self::Custom(_) => "custom",
        }
    }
}

impl std::fmt::Debug for AddressProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AddressProviderKind").field(&self.as_str()).finish()
    }
}

impl From<AddressPool> for AddressProviderKind {
    fn from(pool: AddressPool) -> Self {
        Self::List(Arc::new(pool))
    }
}

#[async_trait]
impl AddressProvider for AddressProviderKind {
    async fn get_live_address(&self) -> Result<Option<Arc<Address>>, ProviderError> {
        match self {
            Self::List(pool) => Ok(pool.get_live_address()),
            Self::Dynamic(provider) => provider.get_live_address().await,
            Self::Custom(provider) => provider.get_live_address().await,
        }
    }

    async fn has_live_addresses(&self) -> Result<bool, ProviderError> {
        match self {
            Self::List(pool) => Ok(pool.has_live_addresses()),
            Self::Dynamic(provider) => provider.has_live_addresses().await,
            Self::Custom(provider) => provider.has_live_addresses().await,
        }
    }
}
