use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures_util::Stream;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::BackoffConfig;
use crate::error::TransportError;
use crate::metrics::RuntimeMetrics;
use crate::schema::RawMessage;

use super::backoff::Backoff;
use super::{ConnectionState, Transport};

/// Lazy, cancellable sequence of messages over a reconnecting transport.
///
/// GUARANTEES:
/// - `next()` yields `None` only after the token is cancelled
/// - connection failures never surface; they lead to `Backoff` and
///   a fresh `connect()`, forever
/// - cancellation is observed while connecting, reading and sleeping
///
/// The backoff resets once a message arrives on a new connection, so
/// a server that accepts and immediately drops keeps backing off.
pub struct MessageStream {
    transport: Box<dyn Transport>,
    backoff: Backoff,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    metrics: Arc<RuntimeMetrics>,
    label: String,
    connected: bool,
    fresh: bool,
    finished: bool,
}

impl MessageStream {
    pub fn new(
        transport: Box<dyn Transport>,
        backoff: BackoffConfig,
        cancel: CancellationToken,
        metrics: Arc<RuntimeMetrics>,
        label: String,
    ) -> (Self, watch::Receiver<ConnectionState>) {
        let (state, rx) = watch::channel(ConnectionState::Disconnected);
        let stream = Self {
            transport,
            backoff: Backoff::new(backoff),
            state,
            cancel,
            metrics,
            label,
            connected: false,
            fresh: false,
            finished: false,
        };
        (stream, rx)
    }

    /// Next message, or `None` once cancelled.
    pub async fn next(&mut self) -> Option<RawMessage> {
        if self.finished {
            return None;
        }
        let msg = self.next_inner().await;
        if msg.is_none() {
            self.finish().await;
        }
        msg
    }

    /// Turns this into a `futures_util::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = RawMessage> + Send {
        futures_util::stream::unfold(self, |mut s| async move {
            let msg = s.next().await?;
            Some((msg, s))
        })
    }

    async fn next_inner(&mut self) -> Option<RawMessage> {
        let cancel = self.cancel.clone();

        loop {
            if cancel.is_cancelled() {
                return None;
            }

            if !self.connected {
                self.set_state(ConnectionState::Connecting);

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    r = self.transport.connect() => r,
                };

                match result {
                    Ok(()) => {
                        self.connected = true;
                        self.fresh = true;
                        self.metrics.ws_connections_active.fetch_add(1, Ordering::Relaxed);
                        self.set_state(ConnectionState::Connected);
                        log::info!("[{}] connected", self.label);
                    }
                    Err(e) => {
                        log::warn!("[{}] connect failed ({}): {}", self.label, e.kind(), e);
                        self.back_off(&e).await?;
                        continue;
                    }
                }
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                r = self.transport.receive() => r,
            };

            match result {
                Ok(msg) => {
                    if self.fresh {
                        self.backoff.reset();
                        self.fresh = false;
                    }
                    return Some(msg);
                }
                Err(e) => {
                    self.mark_disconnected();
                    log::warn!("[{}] connection lost ({}): {}", self.label, e.kind(), e);
                    self.back_off(&e).await?;
                }
            }
        }
    }

    /// Sleeps for the backoff delay; `None` if cancelled meanwhile.
    async fn back_off(&mut self, err: &TransportError) -> Option<()> {
        let delay = self.backoff.delay_for(err);

        if matches!(err, TransportError::RateLimited { .. }) {
            self.metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
        }
        self.metrics.ws_reconnects.fetch_add(1, Ordering::Relaxed);

        self.set_state(ConnectionState::Backoff);
        log::info!(
            "[{}] reconnect attempt {} in {} ms",
            self.label,
            self.backoff.attempt(),
            delay.as_millis()
        );

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            _ = sleep(delay) => Some(()),
        }
    }

    fn mark_disconnected(&mut self) {
        if self.connected {
            self.connected = false;
            self.metrics.ws_connections_active.fetch_sub(1, Ordering::Relaxed);
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn finish(&mut self) {
        self.finished = true;
        self.transport.close().await;
        self.mark_disconnected();
        log::info!("[{}] transport closed", self.label);
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
