//! Scripted Masternode List Diff Source
//!
//! Every subscription consumes the next scripted connection. Tests push diffs, failures
//! and stream ends through the [`DiffFeed`] of that connection.

use async_trait::async_trait;
use bytes::Bytes;
use dapi_core::{
    address::Address,
    masternode::{DiffSubscriber, NULL_BLOCK_HASH},
    transport::{ResponseError, TransportError},
};
use futures::{stream::BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::mpsc;

type Item = Result<Bytes, TransportError>;

enum Connection {
    Open(mpsc::UnboundedReceiver<Item>),
    Refuse(ResponseError),
}

/// Diff subscriber replaying scripted connections.
#[derive(Default)]
pub struct ScriptedDiffSubscriber {
    connections: Mutex<VecDeque<Connection>>,
    subscribed_to: Mutex<Vec<String>>,
}

/// Sending half of one scripted connection.
#[derive(Clone)]
pub struct DiffFeed {
    tx: mpsc::UnboundedSender<Item>,
}

impl DiffFeed {
    pub fn send_diff(&self, diff: Bytes) {
        let _ = self.tx.send(Ok(diff));
    }

    /// Fails the connection with a retriable error.
    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(Err(TransportError::Response(ResponseError::unavailable(message))));
    }
}

impl ScriptedDiffSubscriber {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a connection that opens successfully and returns its feed.
    ///
    /// Dropping every clone of the feed ends the stream.
    pub fn push_connection(&self) -> DiffFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.lock().push_back(Connection::Open(rx));
        DiffFeed { tx }
    }

    /// Queues a connection attempt that fails to open.
    pub fn push_refusal(&self, message: &str) {
        self.connections.lock().push_back(Connection::Refuse(ResponseError::unavailable(message)));
    }

    /// Hosts subscribed to so far, in order.
    #[must_use]
    pub fn subscribed_hosts(&self) -> Vec<String> {
        self.subscribed_to.lock().clone()
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscribed_to.lock().len()
    }
}

#[async_trait]
impl DiffSubscriber for ScriptedDiffSubscriber {
    async fn subscribe(
        &self,
        address: Arc<Address>,
    ) -> Result<BoxStream<'static, Item>, TransportError> {
        self.subscribed_to.lock().push(address.host());

        let next = self.connections.lock().pop_front();
        match next {
            Some(Connection::Open(rx)) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            Some(Connection::Refuse(error)) => Err(TransportError::Response(error)),
            None => Err(TransportError::Response(ResponseError::unavailable(
                "no scripted connection left",
            ))),
        }
    }
}

/// A masternode list entry as served by DAPI.
#[must_use]
pub fn masternode(pro_reg_tx_hash: &str, ip: &str, is_valid: bool) -> Value {
    json!({
        "proRegTxHash": pro_reg_tx_hash,
        "service": format!("{ip}:9999"),
        "isValid": is_valid,
    })
}

/// Serializes a diff from `base` to `block`.
#[must_use]
pub fn diff(base: &str, block: &str, deleted: &[&str], entries: Vec<Value>) -> Bytes {
    Bytes::from(
        json!({
            "baseBlockHash": base,
            "blockHash": block,
            "deletedMNs": deleted,
            "mnList": entries,
        })
        .to_string(),
    )
}

/// A full diff from the null base hash.
#[must_use]
pub fn full_diff(block: &str, entries: Vec<Value>) -> Bytes {
    diff(NULL_BLOCK_HASH, block, &[], entries)
}
