//! Long-lived server streams that transparently re-establish themselves.
//!
//! A [`ReconnectingStream`] owns a background task that pumps one underlying stream at a
//! time into a bounded event channel. The task reconnects on two triggers:
//!
//! - a scheduled interval elapses (`reconnect_after_ms`), to rotate long-lived connections
//! - the underlying stream fails, up to `max_retries_on_error` times in a row
//!
//! Before every reconnection the [`StreamFactory::before_reconnect`] hook may rewrite the
//! connection arguments (for example to pick another node). Consumers observe
//! [`StreamEvent::Reconnecting`] markers in-band, so anything derived from the previous
//! connection's data can be discarded in order.

use std::{
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use futures::{stream::BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep, sleep_until, Instant},
};
use tracing::{debug, warn};

const EVENT_BUFFER: usize = 64;

/// Reconnection behaviour of a [`ReconnectingStream`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Interval after which a healthy stream is rotated. `0` disables rotation. Defaults to
    /// `600000` (ten minutes).
    #[serde(default = "default_reconnect_after_ms")]
    pub reconnect_after_ms: u64,

    /// Consecutive failures tolerated before the error is surfaced. `-1` retries forever.
    /// Defaults to `10`.
    #[serde(default = "default_max_retries_on_error")]
    pub max_retries_on_error: i32,

    /// Pause before reconnecting after a failure. Defaults to `1000`.
    #[serde(default = "default_retry_on_error_delay_ms")]
    pub retry_on_error_delay_ms: u64,
}

fn default_reconnect_after_ms() -> u64 {
    600_000
}

fn default_max_retries_on_error() -> i32 {
    10
}

fn default_retry_on_error_delay_ms() -> u64 {
    1_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_after_ms: default_reconnect_after_ms(),
            max_retries_on_error: default_max_retries_on_error(),
            retry_on_error_delay_ms: default_retry_on_error_delay_ms(),
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn reconnect_after(&self) -> Option<Duration> {
        (self.reconnect_after_ms > 0).then(|| Duration::from_millis(self.reconnect_after_ms))
    }

    #[must_use]
    pub fn retry_on_error_delay(&self) -> Duration {
        Duration::from_millis(self.retry_on_error_delay_ms)
    }

    #[must_use]
    pub fn retries_unlimited(&self) -> bool {
        self.max_retries_on_error < 0
    }

    /// Returns a copy that retries forever.
    #[must_use]
    pub fn unlimited(mut self) -> Self {
        self.max_retries_on_error = -1;
        self
    }

    /// # Errors
    ///
    /// Returns a descriptive error string if a value is out of range.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries_on_error < -1 {
            return Err("max_retries_on_error must be -1 (unlimited) or greater".to_string());
        }
        Ok(())
    }
}

/// Why the stream is about to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    Scheduled,
    Error,
}

/// Item produced by a [`ReconnectingStream`].
#[derive(Debug)]
pub enum StreamEvent<T, E> {
    Data(T),
    /// The previous underlying stream is gone; a new one is being opened.
    Reconnecting(ReconnectReason),
    /// Terminal: the retry budget is spent.
    Error(E),
    /// Terminal: the server closed the stream.
    End,
}

/// Opens underlying streams for a [`ReconnectingStream`].
#[async_trait]
pub trait StreamFactory: Send + Sync + 'static {
    type Args: Clone + Send + Sync + 'static;
    type Item: Send + 'static;
    type Error: fmt::Display + Send + 'static;

    async fn open(
        &self,
        args: &Self::Args,
    ) -> Result<BoxStream<'static, Result<Self::Item, Self::Error>>, Self::Error>;

    /// Rewrites the arguments before each reconnection.
    async fn before_reconnect(
        &self,
        args: Self::Args,
        _reason: ReconnectReason,
    ) -> Result<Self::Args, Self::Error> {
        Ok(args)
    }

    /// Errors reporting a deliberate cancellation are dropped instead of retried.
    fn is_cancellation(&self, _error: &Self::Error) -> bool {
        false
    }
}

/// Cloneable handle that cancels a [`ReconnectingStream`].
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    /// Stops the stream. Safe to call any number of times.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// A server stream that reconnects on schedule and on failure.
pub struct ReconnectingStream<T, E> {
    events: mpsc::Receiver<StreamEvent<T, E>>,
    cancel: CancelHandle,
    task: JoinHandle<()>,
}

impl<T, E> ReconnectingStream<T, E>
where
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    /// Opens the first underlying stream and starts pumping it.
    ///
    /// # Errors
    ///
    /// Returns the factory's error if the first stream cannot be opened; no retries are
    /// attempted for the initial connection.
    pub async fn connect<F>(
        factory: Arc<F>,
        args: F::Args,
        config: StreamConfig,
    ) -> Result<Self, E>
    where
        F: StreamFactory<Item = T, Error = E>,
    {
        let stream = factory.open(&args).await?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let worker = Worker {
            factory,
            args,
            config,
            events: events_tx,
            cancelled: cancel_rx,
            retries: 0,
        };
        let task = tokio::spawn(worker.run(stream));

        Ok(Self { events: events_rx, cancel: CancelHandle(Arc::new(cancel_tx)), task })
    }
}

impl<T, E> ReconnectingStream<T, E> {
    /// Stops the scheduled rotation and tears down the live stream. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns `true` once the background task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T, E> Stream for ReconnectingStream<T, E> {
    type Item = StreamEvent<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl<T, E> Drop for ReconnectingStream<T, E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Interrupt<E> {
    Scheduled,
    Failed(E),
    Ended,
    Cancelled,
}

type Underlying<F> =
    BoxStream<'static, Result<<F as StreamFactory>::Item, <F as StreamFactory>::Error>>;

struct Worker<F: StreamFactory> {
    factory: Arc<F>,
    args: F::Args,
    config: StreamConfig,
    events: mpsc::Sender<StreamEvent<F::Item, F::Error>>,
    cancelled: watch::Receiver<bool>,
    retries: u32,
}

impl<F: StreamFactory> Worker<F> {
    async fn run(mut self, mut stream: Underlying<F>) {
        loop {
            let interrupt = self.pump(&mut stream).await;
            drop(stream);

            let reason = match interrupt {
                Interrupt::Cancelled => {
                    debug!("stream cancelled");
                    return;
                }
                Interrupt::Ended => {
                    debug!("stream ended by server");
                    emit(&self.events, &mut self.cancelled, StreamEvent::End).await;
                    return;
                }
                Interrupt::Scheduled => ReconnectReason::Scheduled,
                Interrupt::Failed(error) => {
                    if !self.consume_retry(error).await {
                        return;
                    }
                    ReconnectReason::Error
                }
            };

            stream = match self.reconnect(reason).await {
                Some(next) => next,
                None => return,
            };
        }
    }

    async fn pump(&mut self, stream: &mut Underlying<F>) -> Interrupt<F::Error> {
        let rotate_at = self.config.reconnect_after().map(|d| Instant::now() + d);
        let mut received = false;

        loop {
            tokio::select! {
                biased;
                () = wait_cancelled(&mut self.cancelled) => return Interrupt::Cancelled,
                () = maybe_sleep_until(rotate_at) => return Interrupt::Scheduled,
                item = stream.next() => match item {
                    Some(Ok(item)) => {
                        if !received {
                            received = true;
                            self.retries = 0;
                        }
                        let event = StreamEvent::Data(item);
                        if !emit(&self.events, &mut self.cancelled, event).await {
                            return Interrupt::Cancelled;
                        }
                    }
                    Some(Err(error)) if self.factory.is_cancellation(&error) => {
                        debug!(error = %error, "ignoring cancellation error");
                    }
                    Some(Err(error)) => return Interrupt::Failed(error),
                    None => return Interrupt::Ended,
                },
            }
        }
    }

    /// Spends one retry and waits out the delay. Returns `false` when the stream must stop.
    async fn consume_retry(&mut self, error: F::Error) -> bool {
        let exhausted = !self.config.retries_unlimited() &&
            i64::from(self.retries) >= i64::from(self.config.max_retries_on_error);
        if exhausted {
            warn!(retries = self.retries, error = %error, "stream retries exhausted");
            emit(&self.events, &mut self.cancelled, StreamEvent::Error(error)).await;
            return false;
        }

        self.retries += 1;
        warn!(attempt = self.retries, error = %error, "stream failed, reconnecting");

        tokio::select! {
            biased;
            () = wait_cancelled(&mut self.cancelled) => false,
            () = sleep(self.config.retry_on_error_delay()) => true,
        }
    }

    async fn reconnect(&mut self, mut reason: ReconnectReason) -> Option<Underlying<F>> {
        loop {
            if *self.cancelled.borrow() {
                return None;
            }
            let event = StreamEvent::Reconnecting(reason);
            if !emit(&self.events, &mut self.cancelled, event).await {
                return None;
            }

            let factory = Arc::clone(&self.factory);
            let args = &mut self.args;
            let attempt = async move {
                *args = factory.before_reconnect(args.clone(), reason).await?;
                factory.open(&*args).await
            };

            let result = tokio::select! {
                biased;
                () = wait_cancelled(&mut self.cancelled) => return None,
                result = attempt => result,
            };

            match result {
                Ok(stream) => {
                    debug!(reason = ?reason, "stream reconnected");
                    return Some(stream);
                }
                Err(error) => {
                    if !self.consume_retry(error).await {
                        return None;
                    }
                    reason = ReconnectReason::Error;
                }
            }
        }
    }
}

/// Hands `event` to the consumer unless cancellation comes first. A full buffer must not
/// hold up `cancel()`. Returns `false` when the stream has to stop.
async fn emit<T, E>(
    events: &mpsc::Sender<StreamEvent<T, E>>,
    cancelled: &mut watch::Receiver<bool>,
    event: StreamEvent<T, E>,
) -> bool {
    tokio::select! {
        biased;
        () = wait_cancelled(cancelled) => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

async fn wait_cancelled(cancelled: &mut watch::Receiver<bool>) {
    if *cancelled.borrow_and_update() {
        return;
    }
    // Only `true` is ever sent; a dropped sender also means cancellation.
    let _ = cancelled.changed().await;
}

async fn maybe_sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
