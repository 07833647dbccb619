use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::{
    config::SubscriptionConfig,
    error::{CollectorError, DecodeError},
    exchanges::adapter::ExchangeAdapter,
    schema::{CandleData, DecodedRecord, GapData, RawMessage},
    transport::{ConnectionState, stream::MessageStream},
};

use super::{
    CollectorContext, CollectorState, Job,
    candles::CandleAggregator,
    sequence::{Observation, SequenceTracker},
};

/// Runs one task per job until cancelled or until a task faults.
///
/// GUARANTEES:
/// - the first task error cancels every other task
/// - each task drains (finishes its in-flight write, flushes the
///   sink) before this returns
///
/// Returns `Stopped` on a clean shutdown, `Faulted` otherwise.
pub async fn run_collector(
    ctx: CollectorContext,
    adapter: Arc<dyn ExchangeAdapter>,
    jobs: Vec<Job>,
) -> CollectorState {
    let mut tasks = JoinSet::new();

    for job in jobs {
        tasks.spawn(run_subscription(ctx.clone(), adapter.clone(), job));
    }

    let mut state = CollectorState::Stopped;

    while let Some(joined) = tasks.join_next().await {
        let err = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(e) => CollectorError::Task(e.to_string()),
        };

        log::error!("collector fault: {}", err);
        if state != CollectorState::Faulted {
            state = CollectorState::Faulted;
            ctx.cancel.cancel();
        }
    }

    log::info!("collector {} ({})", state, ctx.metrics.summary());
    state
}

/// Drives a single subscription: pull, decode, write.
///
/// Cancellation is observed while waiting for the next message and
/// while pausing between write retries; a write that already started
/// always completes.
pub async fn run_subscription(
    ctx: CollectorContext,
    adapter: Arc<dyn ExchangeAdapter>,
    job: Job,
) -> Result<(), CollectorError> {
    let label = format!("{} {}@{}", adapter.name(), job.sub.symbol, job.sub.channel);

    let mut task = SubscriptionTask::new(ctx.clone(), adapter, job.sub, label.clone());

    let (stream, states) = MessageStream::new(
        job.transport,
        ctx.settings.backoff.clone(),
        ctx.cancel.clone(),
        ctx.metrics.clone(),
        label.clone(),
    );
    tokio::spawn(log_connection_states(label, states));

    ctx.metrics.subscriptions_active.fetch_add(1, Ordering::Relaxed);
    task.set_state(CollectorState::Running);

    let mut messages = Box::pin(stream.into_stream());

    let mut outcome = Ok(());
    while let Some(raw) = messages.next().await {
        if let Err(e) = task.handle(raw).await {
            outcome = Err(e);
            break;
        }
    }

    // releases the transport
    drop(messages);
    ctx.metrics.subscriptions_active.fetch_sub(1, Ordering::Relaxed);

    task.finish(outcome).await
}

async fn log_connection_states(label: String, mut states: watch::Receiver<ConnectionState>) {
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        log::debug!("[{}] connection {}", label, state);
    }
}

/// Per-subscription state owned by one task.
struct SubscriptionTask {
    ctx: CollectorContext,
    adapter: Arc<dyn ExchangeAdapter>,
    sub: SubscriptionConfig,
    label: String,
    state: CollectorState,
    tracker: SequenceTracker,
    candles: CandleAggregator,
}

impl SubscriptionTask {
    fn new(
        ctx: CollectorContext,
        adapter: Arc<dyn ExchangeAdapter>,
        sub: SubscriptionConfig,
        label: String,
    ) -> Self {
        Self {
            ctx,
            adapter,
            sub,
            label,
            state: CollectorState::Starting,
            tracker: SequenceTracker::default(),
            candles: CandleAggregator::default(),
        }
    }

    fn set_state(&mut self, next: CollectorState) {
        log::info!("[{}] {} → {}", self.label, self.state, next);
        self.state = next;
    }

    async fn handle(&mut self, raw: RawMessage) -> Result<(), CollectorError> {
        let metrics = &self.ctx.metrics;
        metrics.messages_received.fetch_add(1, Ordering::Relaxed);

        let records = match self.adapter.decode(&raw) {
            Ok(records) => records,
            Err(e) => {
                let counter = match e {
                    DecodeError::MalformedMessage(_) => &metrics.malformed_messages,
                    DecodeError::UnsupportedChannel(_) => &metrics.unsupported_channel,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "[{} {}] skipping message ({}): {}",
                    raw.channel,
                    self.sub.symbol,
                    e.kind(),
                    e
                );
                return Ok(());
            }
        };

        for record in records {
            self.route(record).await?;
        }
        Ok(())
    }

    async fn route(&mut self, record: DecodedRecord) -> Result<(), CollectorError> {
        match record {
            DecodedRecord::Heartbeat(_) => {
                self.ctx.metrics.heartbeats.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            DecodedRecord::Candle(candle) => match self.candles.push(candle) {
                Some(closed) => {
                    log_candle(&closed);
                    self.ctx.metrics.candles_closed.fetch_add(1, Ordering::Relaxed);
                    self.persist(DecodedRecord::Candle(closed)).await
                }
                None => Ok(()),
            },
            other => self.persist(other).await,
        }
    }

    /// Writes a market record unless already acknowledged, preceded
    /// by a `Gap` marker when sequences went missing.
    async fn persist(&mut self, record: DecodedRecord) -> Result<(), CollectorError> {
        match self.tracker.observe(&record) {
            Observation::Fresh => {}

            Observation::Resync { last } => {
                log::warn!(
                    "[{} {}] book snapshot seq {:?} behind last {}, resetting sequence",
                    record.channel_key(),
                    record.symbol().unwrap_or(&self.sub.symbol),
                    record.sequence(),
                    last
                );
            }

            Observation::Duplicate { last } => {
                self.ctx.metrics.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "[{}] duplicate seq {:?} (last {})",
                    self.label,
                    record.sequence(),
                    last
                );
                return Ok(());
            }

            Observation::Gap { expected, received } => {
                self.ctx.metrics.gaps_detected.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "[{} {}] sequence gap: expected {}, received {}",
                    record.channel_key(),
                    record.symbol().unwrap_or(&self.sub.symbol),
                    expected,
                    received
                );

                let gap = DecodedRecord::Gap(GapData {
                    exchange: record.exchange().to_string(),
                    symbol: record.symbol().unwrap_or(&self.sub.symbol).to_string(),
                    channel: record.channel_key(),
                    expected,
                    received,
                });
                self.write_with_retry(&gap).await?;
            }
        }

        self.write_with_retry(&record).await?;
        self.tracker.commit(&record);
        Ok(())
    }

    /// Retries failed writes up to `write_retries` times.
    ///
    /// Shutdown cuts the pause short: the record gets one immediate
    /// final attempt and is reported as exhausted if that fails too.
    async fn write_with_retry(&self, record: &DecodedRecord) -> Result<(), CollectorError> {
        let settings = &self.ctx.settings;
        let mut failures = 0u32;
        let mut draining = false;

        loop {
            match self.ctx.sink.write(record).await {
                Ok(()) => {
                    self.ctx.metrics.records_written.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) => {
                    failures += 1;
                    self.ctx.metrics.write_errors.fetch_add(1, Ordering::Relaxed);

                    let symbol = record.symbol().unwrap_or(&self.sub.symbol).to_string();
                    if failures > settings.write_retries || draining {
                        return Err(CollectorError::WriteExhausted {
                            channel: record.channel_key(),
                            symbol,
                            attempts: failures,
                            source: e,
                        });
                    }

                    log::warn!(
                        "[{} {}] {} write failed (retry {}/{}): {}",
                        record.channel_key(),
                        symbol,
                        self.ctx.sink.name(),
                        failures,
                        settings.write_retries,
                        e
                    );
                    tokio::select! {
                        biased;
                        _ = self.ctx.cancel.cancelled() => {
                            log::info!(
                                "[{} {}] shutdown during write retry, final attempt",
                                record.channel_key(),
                                symbol
                            );
                            draining = true;
                        }
                        _ = sleep(settings.write_retry_delay) => {}
                    }
                }
            }
        }
    }

    /// Drains after the message loop ended; flushes the sink on every path.
    async fn finish(mut self, outcome: Result<(), CollectorError>) -> Result<(), CollectorError> {
        if let Err(e) = outcome {
            self.set_state(CollectorState::Faulted);
            if let Err(flush) = self.ctx.sink.flush().await {
                log::error!("[{}] flush after fault failed: {}", self.label, flush);
            }
            return Err(e);
        }

        self.set_state(CollectorState::Draining);

        for candle in self.candles.take_open() {
            log::info!(
                "[{}] discarding open candle {} {}",
                self.label,
                candle.interval,
                candle.readable_time()
            );
        }

        match self.ctx.sink.flush().await {
            Ok(()) => {
                self.set_state(CollectorState::Stopped);
                Ok(())
            }
            Err(e) => {
                self.set_state(CollectorState::Faulted);
                Err(CollectorError::Flush(e))
            }
        }
    }
}

fn log_candle(c: &CandleData) {
    log::info!(
        "[{}] {} {} {} O:{} H:{} L:{} C:{} V:{}",
        c.readable_time(),
        c.exchange,
        c.symbol,
        c.interval,
        c.open,
        c.high,
        c.low,
        c.close,
        c.volume
    );
}
