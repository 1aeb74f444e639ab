//! Masternode list state and diff application.
//!
//! Nodes stream incremental diffs of the deterministic masternode list. Verifying and
//! applying a diff is a consensus concern handled behind the [`DiffApplier`] seam; the
//! bundled [`StructuralDiffApplier`] only checks hash continuity and replays the
//! additions and removals, which is enough for tests and trusted seed deployments.

pub mod tracker;

pub use tracker::{DiffSubscriber, MasternodeListTracker, TrackerError};

use std::{collections::BTreeMap, net::SocketAddr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Block hash used as the base of a full (non-incremental) diff.
pub const NULL_BLOCK_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Errors raised while decoding or applying a diff.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiffError {
    #[error("failed to decode masternode list diff: {0}")]
    Decode(String),

    /// The diff does not build on the current list.
    #[error("diff base {base} does not match current block {current}")]
    BaseMismatch { base: String, current: String },

    #[error("invalid masternode entry {pro_reg_tx_hash}: {reason}")]
    InvalidEntry { pro_reg_tx_hash: String, reason: String },
}

/// One masternode as advertised in a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasternodeEntry {
    pub pro_reg_tx_hash: String,
    #[serde(default)]
    pub confirmed_hash: String,
    /// `ip:port` of the core P2P service.
    pub service: String,
    #[serde(default)]
    pub pub_key_operator: String,
    #[serde(default)]
    pub voting_address: String,
    pub is_valid: bool,
    #[serde(default, rename = "platformHTTPPort")]
    pub platform_http_port: Option<u16>,
}

impl MasternodeEntry {
    /// Host part of the `service` field.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        if let Ok(addr) = self.service.parse::<SocketAddr>() {
            return Some(addr.ip().to_string());
        }
        let host = match self.service.rsplit_once(':') {
            Some((host, _)) => host,
            None => self.service.as_str(),
        };
        (!host.is_empty()).then(|| host.to_string())
    }
}

/// Incremental update between two block hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasternodeListDiff {
    pub base_block_hash: String,
    pub block_hash: String,
    #[serde(default, rename = "deletedMNs")]
    pub deleted_mns: Vec<String>,
    #[serde(default)]
    pub mn_list: Vec<MasternodeEntry>,
}

/// The masternode list as of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasternodeList {
    block_hash: String,
    entries: BTreeMap<String, MasternodeEntry>,
}

impl Default for MasternodeList {
    fn default() -> Self {
        Self::empty()
    }
}

impl MasternodeList {
    /// The empty list at the canonical base hash.
    #[must_use]
    pub fn empty() -> Self {
        Self { block_hash: NULL_BLOCK_HASH.to_string(), entries: BTreeMap::new() }
    }

    #[must_use]
    pub fn from_entries(
        block_hash: impl Into<String>,
        entries: impl IntoIterator<Item = MasternodeEntry>,
    ) -> Self {
        Self {
            block_hash: block_hash.into(),
            entries: entries.into_iter().map(|e| (e.pro_reg_tx_hash.clone(), e)).collect(),
        }
    }

    #[must_use]
    pub fn block_hash(&self) -> &str {
        &self.block_hash
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &MasternodeEntry> {
        self.entries.values()
    }

    #[must_use]
    pub fn get(&self, pro_reg_tx_hash: &str) -> Option<&MasternodeEntry> {
        self.entries.get(pro_reg_tx_hash)
    }

    /// Entries flagged valid, ordered by registration hash.
    #[must_use]
    pub fn valid_masternodes(&self) -> Vec<MasternodeEntry> {
        self.entries.values().filter(|e| e.is_valid).cloned().collect()
    }
}

/// Decodes and applies diffs to a [`MasternodeList`].
pub trait DiffApplier: Send + Sync {
    /// Decodes a raw diff payload. The default reads the JSON representation.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::Decode`] if the payload is not a valid diff.
    fn decode(&self, payload: &[u8]) -> Result<MasternodeListDiff, DiffError> {
        serde_json::from_slice(payload).map_err(|e| DiffError::Decode(e.to_string()))
    }

    /// Produces the list that results from applying `diff` on top of `list`.
    ///
    /// # Errors
    ///
    /// Returns a [`DiffError`] when the diff cannot be applied.
    fn apply(
        &self,
        list: &MasternodeList,
        diff: &MasternodeListDiff,
    ) -> Result<MasternodeList, DiffError>;
}

/// Applies diffs by hash continuity and set replay only.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralDiffApplier;

impl DiffApplier for StructuralDiffApplier {
    fn apply(
        &self,
        list: &MasternodeList,
        diff: &MasternodeListDiff,
    ) -> Result<MasternodeList, DiffError> {
        let mut next = if diff.base_block_hash == NULL_BLOCK_HASH {
            MasternodeList::empty()
        } else if diff.base_block_hash == list.block_hash {
            list.clone()
        } else {
            return Err(DiffError::BaseMismatch {
                base: diff.base_block_hash.clone(),
                current: list.block_hash.clone(),
            });
        };

        for deleted in &diff.deleted_mns {
            next.entries.remove(deleted);
        }

        for entry in &diff.mn_list {
            if entry.pro_reg_tx_hash.is_empty() {
                return Err(DiffError::InvalidEntry {
                    pro_reg_tx_hash: String::new(),
                    reason: "missing proRegTxHash".to_string(),
                });
            }
            if entry.host().is_none() {
                return Err(DiffError::InvalidEntry {
                    pro_reg_tx_hash: entry.pro_reg_tx_hash.clone(),
                    reason: format!("invalid service '{}'", entry.service),
                });
            }
            next.entries.insert(entry.pro_reg_tx_hash.clone(), entry.clone());
        }

        next.block_hash.clone_from(&diff.block_hash);
        Ok(next)
    }
}
