//! Mock Infrastructure for Testing the DAPI Client Transport Layer
//!
//! This module provides reusable mock types for exercising transports and providers
//! without real DAPI nodes.
//!
//! ## Components
//!
//! - `DapiNodeMock`: Wraps mockito to act as one node's JSON-RPC endpoint
//! - `ScriptedGrpcStub`: Per-target scripted replies for the gRPC transport
//! - `ScriptedDiffSubscriber`: Scripted masternode list diff subscriptions
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::DapiNodeMock;
//!
//! let mut node = DapiNodeMock::new().await;
//! node.mock_result("getBestBlockHash", &json!("00ab"), 1).await;
//!
//! // Use node.address() as a static address
//! ```

pub mod diff_source;
pub mod grpc_stub;

pub use diff_source::{diff, full_diff, masternode, DiffFeed, ScriptedDiffSubscriber};
pub use grpc_stub::{RecordedCall, ScriptedGrpcStub};
pub use node_mock::DapiNodeMock;

use dapi_core::address::AddressPool;
use std::{sync::Arc, time::Duration};

/// Polls `condition` every few milliseconds until it holds or `attempts` run out.
pub async fn eventually(attempts: usize, mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..attempts {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Builds a shared pool from address strings.
///
/// # Panics
///
/// Panics if an address does not parse.
#[must_use]
pub fn pool_of(addresses: &[String], base_ban_time: Duration) -> Arc<AddressPool> {
    Arc::new(AddressPool::from_strings(addresses, base_ban_time).expect("valid test addresses"))
}
