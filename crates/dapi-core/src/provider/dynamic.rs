use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use super::{AddressProvider, ProviderError};
use crate::{
    address::{Address, AddressPool, Endpoint, Protocol, DEFAULT_PORT},
    masternode::{MasternodeEntry, MasternodeListTracker},
};

/// How masternode entries are turned into node endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTemplate {
    /// Port used when a masternode does not advertise a platform HTTP port.
    pub default_port: u16,
    pub protocol: Protocol,
    pub allow_self_signed_certificate: bool,
}

impl Default for EndpointTemplate {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            protocol: Protocol::Https,
            allow_self_signed_certificate: false,
        }
    }
}

impl EndpointTemplate {
    fn endpoint_for(&self, entry: &MasternodeEntry) -> Option<Endpoint> {
        let endpoint = Endpoint::new(entry.host()?).ok()?;
        Some(
            endpoint
                .with_port(entry.platform_http_port.unwrap_or(self.default_port))
                .with_protocol(self.protocol)
                .with_self_signed_certificate(self.allow_self_signed_certificate),
        )
    }
}

/// Address provider that follows the live masternode list.
///
/// Every lookup refreshes the pool from the tracker. Nodes already known keep their
/// [`Address`] instance, and therefore their ban state, even when their host or port
/// changes; nodes that left the list are dropped.
pub struct DynamicAddressProvider {
    tracker: Arc<MasternodeListTracker>,
    pool: AddressPool,
    allow_list: Option<Vec<Endpoint>>,
    template: EndpointTemplate,
}

impl DynamicAddressProvider {
    /// Creates a provider. When `allow_list` is set only matching endpoints are used.
    #[must_use]
    pub fn new(
        tracker: Arc<MasternodeListTracker>,
        pool: AddressPool,
        allow_list: Option<Vec<Endpoint>>,
        template: EndpointTemplate,
    ) -> Self {
        Self { tracker, pool, allow_list, template }
    }

    #[must_use]
    pub fn pool(&self) -> &AddressPool {
        &self.pool
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<MasternodeListTracker> {
        &self.tracker
    }

    /// Endpoints masternode-derived addresses are restricted to, if any.
    #[must_use]
    pub fn allow_list(&self) -> Option<&[Endpoint]> {
        self.allow_list.as_deref()
    }

    fn is_allowed(&self, endpoint: &Endpoint) -> bool {
        self.allow_list.as_ref().is_none_or(|allowed| {
            let rendered = endpoint.to_string();
            allowed.iter().any(|a| a.to_string() == rendered)
        })
    }

    async fn refresh(&self) -> Result<(), ProviderError> {
        let masternodes = self.tracker.get_valid_masternodes().await?;

        let known: HashMap<String, Arc<Address>> = self
            .pool
            .all_addresses()
            .into_iter()
            .filter_map(|a| a.pro_tx_hash().map(|h| (h.to_string(), Arc::clone(&a))))
            .collect();

        let mut next = Vec::with_capacity(masternodes.len());
        for entry in &masternodes {
            let Some(endpoint) = self.template.endpoint_for(entry) else {
                tracing::debug!(
                    pro_reg_tx_hash = %entry.pro_reg_tx_hash,
                    "skipping masternode without a usable service address"
                );
                continue;
            };
            if !self.is_allowed(&endpoint) {
                continue;
            }

            let address = match known.get(&entry.pro_reg_tx_hash) {
                Some(existing) => {
                    if existing.endpoint() != endpoint {
                        existing.update_endpoint(endpoint);
                    }
                    Arc::clone(existing)
                }
                None => {
                    Arc::new(Address::with_pro_tx_hash(endpoint, entry.pro_reg_tx_hash.clone()))
                }
            };
            next.push(address);
        }

        self.pool.set_addresses(next);
        Ok(())
    }
}

#[async_trait]
impl AddressProvider for DynamicAddressProvider {
    async fn get_live_address(&self) -> Result<Option<Arc<Address>>, ProviderError> {
        self.refresh().await?;
        Ok(self.pool.get_live_address())
    }

    async fn has_live_addresses(&self) -> Result<bool, ProviderError> {
        self.refresh().await?;
        Ok(self.pool.has_live_addresses())
    }
}
