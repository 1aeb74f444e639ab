use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use rand::seq::IndexedRandom;

use super::{Address, AddressError, DEFAULT_BASE_BAN_TIME};

/// Shared pool of node addresses with uniform random selection among live entries.
///
/// Reads are lock-free through `ArcSwap`; replacing the set swaps the whole vector so a
/// concurrent reader always sees either the old or the new list, never a mix. Ban state is
/// kept on the addresses themselves, so an address present in both lists keeps its bans.
pub struct AddressPool {
    addresses: ArcSwap<Vec<Arc<Address>>>,
    base_ban_time: Duration,
}

impl Default for AddressPool {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl AddressPool {
    #[must_use]
    pub fn new(addresses: Vec<Arc<Address>>) -> Self {
        Self::with_base_ban_time(addresses, DEFAULT_BASE_BAN_TIME)
    }

    #[must_use]
    pub fn with_base_ban_time(addresses: Vec<Arc<Address>>, base_ban_time: Duration) -> Self {
        Self { addresses: ArcSwap::from_pointee(addresses), base_ban_time }
    }

    /// Builds a pool from address strings in either supported form.
    ///
    /// # Errors
    ///
    /// Returns the first [`AddressError`] encountered.
    pub fn from_strings<S: AsRef<str>>(
        raw: &[S],
        base_ban_time: Duration,
    ) -> Result<Self, AddressError> {
        let addresses = raw
            .iter()
            .map(|s| Address::parse(s.as_ref()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_base_ban_time(addresses, base_ban_time))
    }

    #[must_use]
    pub fn base_ban_time(&self) -> Duration {
        self.base_ban_time
    }

    /// Picks one live address uniformly at random.
    #[must_use]
    pub fn get_live_address(&self) -> Option<Arc<Address>> {
        let live = self.live_addresses();
        live.choose(&mut rand::rng()).cloned()
    }

    #[must_use]
    pub fn has_live_addresses(&self) -> bool {
        self.addresses.load().iter().any(|a| a.is_live(self.base_ban_time))
    }

    #[must_use]
    pub fn live_addresses(&self) -> Vec<Arc<Address>> {
        self.addresses.load().iter().filter(|a| a.is_live(self.base_ban_time)).cloned().collect()
    }

    #[must_use]
    pub fn banned_addresses(&self) -> Vec<Arc<Address>> {
        self.addresses.load().iter().filter(|a| a.is_banned(self.base_ban_time)).cloned().collect()
    }

    #[must_use]
    pub fn all_addresses(&self) -> Vec<Arc<Address>> {
        self.addresses.load().as_ref().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.load().is_empty()
    }

    pub fn add_address(&self, address: Arc<Address>) {
        self.addresses.rcu(|current| {
            let mut next = (**current).clone();
            next.push(Arc::clone(&address));
            next
        });
    }

    /// Atomically replaces the whole address set.
    pub fn set_addresses(&self, addresses: Vec<Arc<Address>>) {
        tracing::debug!(count = addresses.len(), "replacing address pool contents");
        self.addresses.store(Arc::new(addresses));
    }
}
