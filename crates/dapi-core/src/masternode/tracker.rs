//! Keeps a local copy of the masternode list current through a diff subscription.
//!
//! The subscription is opened lazily on the first [`MasternodeListTracker::get_valid_masternodes`]
//! call, which blocks until the first diff has been applied. From then on a single background
//! task applies diffs in arrival order. Whenever the underlying stream reconnects, ends, or
//! delivers a diff that cannot be applied, the list is reset to the empty base and the
//! subscription starts over from the canonical base hash.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use super::{DiffApplier, DiffError, MasternodeEntry, MasternodeList};
use crate::{
    address::{Address, AddressPool},
    stream::{ReconnectReason, ReconnectingStream, StreamConfig, StreamEvent, StreamFactory},
    transport::TransportError,
};

/// Errors surfaced to callers waiting for the masternode list.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("no live seed address for the masternode list subscription")]
    NoSeedAddresses,

    #[error("masternode list subscription failed: {0}")]
    Subscription(String),

    #[error("masternode list tracker stopped")]
    Stopped,
}

/// Opens masternode list diff subscriptions.
#[async_trait]
pub trait DiffSubscriber: Send + Sync + 'static {
    /// Subscribes to diffs from `address`, starting with a full diff from the null base hash.
    async fn subscribe(
        &self,
        address: Arc<Address>,
    ) -> Result<BoxStream<'static, Result<Bytes, TransportError>>, TransportError>;
}

#[derive(Debug, Clone)]
enum FirstList {
    Pending,
    Ready,
    Failed(TrackerError),
}

struct DiffStreamFactory {
    subscriber: Arc<dyn DiffSubscriber>,
    seeds: Arc<AddressPool>,
}

#[async_trait]
impl StreamFactory for DiffStreamFactory {
    type Args = Arc<Address>;
    type Item = Bytes;
    type Error = TransportError;

    async fn open(
        &self,
        address: &Arc<Address>,
    ) -> Result<BoxStream<'static, Result<Bytes, TransportError>>, TransportError> {
        debug!(address = %address, "opening masternode list subscription");
        self.subscriber.subscribe(Arc::clone(address)).await
    }

    async fn before_reconnect(
        &self,
        previous: Arc<Address>,
        reason: ReconnectReason,
    ) -> Result<Arc<Address>, TransportError> {
        if reason == ReconnectReason::Error {
            previous.mark_as_banned();
        }
        self.seeds.get_live_address().ok_or(TransportError::NoAvailableAddresses)
    }

    fn is_cancellation(&self, error: &TransportError) -> bool {
        error.response_error().is_some_and(|e| e.code == i64::from(tonic::Code::Cancelled as i32))
    }
}

struct Session {
    first_list: watch::Receiver<FirstList>,
    task: JoinHandle<()>,
}

struct Shared {
    subscriber: Arc<dyn DiffSubscriber>,
    seeds: Arc<AddressPool>,
    applier: Arc<dyn DiffApplier>,
    config: StreamConfig,
    list: ArcSwap<MasternodeList>,
}

impl Shared {
    fn reset(&self) {
        self.list.store(Arc::new(MasternodeList::empty()));
    }

    fn apply(&self, payload: &[u8]) -> Result<(), DiffError> {
        let diff = self.applier.decode(payload)?;
        let current = self.list.load_full();
        let next = self.applier.apply(&current, &diff)?;
        debug!(
            base = %diff.base_block_hash,
            block = %next.block_hash(),
            masternodes = next.len(),
            "applied masternode list diff"
        );
        self.list.store(Arc::new(next));
        Ok(())
    }
}

/// Lazily subscribed, self-healing view of the masternode list.
pub struct MasternodeListTracker {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl MasternodeListTracker {
    /// Creates a tracker that subscribes through `subscriber` to one of `seeds`.
    ///
    /// The subscription retries without limit; `config` supplies the rotation interval and
    /// the delay between attempts.
    #[must_use]
    pub fn new(
        subscriber: Arc<dyn DiffSubscriber>,
        seeds: Arc<AddressPool>,
        applier: Arc<dyn DiffApplier>,
        config: StreamConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscriber,
                seeds,
                applier,
                config: config.unlimited(),
                list: ArcSwap::from_pointee(MasternodeList::empty()),
            }),
            session: Mutex::new(None),
        }
    }

    /// Returns the currently valid masternodes, subscribing first if needed.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackerError`] if the initial subscription could not be established.
    /// The next call starts a fresh subscription.
    pub async fn get_valid_masternodes(&self) -> Result<Vec<MasternodeEntry>, TrackerError> {
        let mut first = self.ensure_started();

        loop {
            let state = first.borrow_and_update().clone();
            match state {
                FirstList::Ready => break,
                FirstList::Failed(error) => return Err(error),
                FirstList::Pending => {}
            }
            if first.changed().await.is_err() {
                return Err(TrackerError::Stopped);
            }
        }

        Ok(self.shared.list.load().valid_masternodes())
    }

    /// Snapshot of the list as currently applied.
    #[must_use]
    pub fn current_list(&self) -> Arc<MasternodeList> {
        self.shared.list.load_full()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session.lock().as_ref().is_some_and(|s| !s.task.is_finished())
    }

    /// Tears down the subscription and forgets the list. Idempotent.
    pub fn stop(&self) {
        if let Some(session) = self.session.lock().take() {
            session.task.abort();
            info!("masternode list tracker stopped");
        }
        self.shared.reset();
    }

    fn ensure_started(&self) -> watch::Receiver<FirstList> {
        let mut session = self.session.lock();
        if let Some(current) = session.as_ref() {
            let failed = matches!(*current.first_list.borrow(), FirstList::Failed(_));
            if !failed {
                return current.first_list.clone();
            }
        }

        let (first_tx, first_rx) = watch::channel(FirstList::Pending);
        let task = tokio::spawn(run_subscription(Arc::clone(&self.shared), first_tx));
        *session = Some(Session { first_list: first_rx.clone(), task });
        first_rx
    }
}

impl Drop for MasternodeListTracker {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.task.abort();
        }
    }
}

fn is_pending(first: &watch::Sender<FirstList>) -> bool {
    matches!(*first.borrow(), FirstList::Pending)
}

async fn run_subscription(shared: Arc<Shared>, first: watch::Sender<FirstList>) {
    let delay = shared.config.retry_on_error_delay();

    loop {
        let Some(seed) = shared.seeds.get_live_address() else {
            if is_pending(&first) {
                warn!("no live seed address for masternode list subscription");
                first.send_replace(FirstList::Failed(TrackerError::NoSeedAddresses));
                return;
            }
            sleep(delay).await;
            continue;
        };

        let factory = Arc::new(DiffStreamFactory {
            subscriber: Arc::clone(&shared.subscriber),
            seeds: Arc::clone(&shared.seeds),
        });

        let mut stream =
            match ReconnectingStream::connect(factory, Arc::clone(&seed), shared.config.clone())
                .await
            {
                Ok(stream) => stream,
                Err(error) => {
                    seed.mark_as_banned();
                    if is_pending(&first) {
                        warn!(seed = %seed, error = %error, "masternode list subscription failed");
                        first.send_replace(FirstList::Failed(TrackerError::Subscription(
                            error.to_string(),
                        )));
                        return;
                    }
                    warn!(seed = %seed, error = %error, "masternode list resubscription failed");
                    sleep(delay).await;
                    continue;
                }
            };

        info!(seed = %seed, "subscribed to masternode list diffs");

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Data(payload) => match shared.apply(&payload) {
                    Ok(()) => {
                        first.send_if_modified(|state| {
                            let settle = matches!(state, FirstList::Pending);
                            if settle {
                                *state = FirstList::Ready;
                            }
                            settle
                        });
                    }
                    Err(error) => {
                        warn!(error = %error, "discarding masternode list after bad diff");
                        break;
                    }
                },
                StreamEvent::Reconnecting(reason) => {
                    debug!(reason = ?reason, "masternode list stream reconnecting");
                    shared.reset();
                }
                StreamEvent::Error(error) => {
                    warn!(error = %error, "masternode list stream failed");
                    break;
                }
                StreamEvent::End => {
                    info!("masternode list stream ended");
                    break;
                }
            }
        }

        stream.cancel();
        drop(stream);
        shared.reset();
        sleep(delay).await;
    }
}
