use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Runtime counters shared by every collector task.
///
/// Lock-free; one instance is owned by the `CollectorContext` and
/// handed to each task through an `Arc`.
#[derive(Default, Debug)]
pub struct RuntimeMetrics {
    // Gauges
    pub subscriptions_active: AtomicUsize,
    pub ws_connections_active: AtomicUsize,

    // Throughput
    pub messages_received: AtomicU64,
    pub records_written: AtomicU64,
    pub heartbeats: AtomicU64,
    pub candles_closed: AtomicU64,

    // Decode path
    pub malformed_messages: AtomicU64,
    pub unsupported_channel: AtomicU64,
    pub duplicates_skipped: AtomicU64,
    pub gaps_detected: AtomicU64,

    // Sink path
    pub write_errors: AtomicU64,

    // Transport
    pub ws_reconnects: AtomicU64,
    pub rate_limited: AtomicU64,
}

impl RuntimeMetrics {
    /// One-line summary for periodic logging.
    pub fn summary(&self) -> String {
        format!(
            "subs={} ws={} recv={} written={} hb={} candles={} malformed={} unsupported={} dup={} gaps={} write_err={} reconnects={} rate_limited={}",
            self.subscriptions_active.load(Ordering::Relaxed),
            self.ws_connections_active.load(Ordering::Relaxed),
            self.messages_received.load(Ordering::Relaxed),
            self.records_written.load(Ordering::Relaxed),
            self.heartbeats.load(Ordering::Relaxed),
            self.candles_closed.load(Ordering::Relaxed),
            self.malformed_messages.load(Ordering::Relaxed),
            self.unsupported_channel.load(Ordering::Relaxed),
            self.duplicates_skipped.load(Ordering::Relaxed),
            self.gaps_detected.load(Ordering::Relaxed),
            self.write_errors.load(Ordering::Relaxed),
            self.ws_reconnects.load(Ordering::Relaxed),
            self.rate_limited.load(Ordering::Relaxed),
        )
    }
}

/// Logs `[METRICS] ...` every `every` until cancelled, then once more.
pub fn spawn_reporter(
    metrics: Arc<RuntimeMetrics>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => log::info!("[METRICS] {}", metrics.summary()),
            }
        }

        log::info!("[METRICS] final {}", metrics.summary());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reflects_counters() {
        let m = RuntimeMetrics::default();
        m.records_written.fetch_add(3, Ordering::Relaxed);
        m.gaps_detected.fetch_add(1, Ordering::Relaxed);

        let line = m.summary();
        assert!(line.contains("written=3"));
        assert!(line.contains("gaps=1"));
        assert!(line.contains("malformed=0"));
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let handle = spawn_reporter(
            Arc::new(RuntimeMetrics::default()),
            Duration::from_secs(10),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
