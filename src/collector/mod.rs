/// Collector module
///
/// Orchestration layer between transports, exchange adapters and the
/// sink. One task per subscription drives read → decode → write; the
/// tasks share only what `CollectorContext` holds.
///
/// Exchange-specific logic does not live here.
pub mod candles;
pub mod runner;
pub mod sequence;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{BackoffConfig, Config, SubscriptionConfig};
use crate::metrics::RuntimeMetrics;
use crate::sink::RecordSink;
use crate::transport::Transport;

/// Lifecycle of a collector task and of the collector as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Starting,
    Running,
    Draining,
    Stopped,
    Faulted,
}

impl CollectorState {
    /// Process exit code for a terminal state.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Faulted => 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for CollectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Tunables every collector task reads.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub backoff: BackoffConfig,
    pub write_retries: u32,
    pub write_retry_delay: Duration,
}

impl CollectorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            backoff: cfg.backoff.clone(),
            write_retries: cfg.write_retries,
            write_retry_delay: Duration::from_millis(cfg.write_retry_delay_ms),
        }
    }
}

/// Process-wide state, owned explicitly and cloned into every task.
#[derive(Clone)]
pub struct CollectorContext {
    pub sink: Arc<dyn RecordSink>,
    pub metrics: Arc<RuntimeMetrics>,
    pub cancel: CancellationToken,
    pub settings: CollectorSettings,
}

impl CollectorContext {
    pub fn new(sink: Arc<dyn RecordSink>, settings: CollectorSettings) -> Self {
        Self {
            sink,
            metrics: Arc::new(RuntimeMetrics::default()),
            cancel: CancellationToken::new(),
            settings,
        }
    }
}

/// A subscription paired with the transport that serves it.
pub struct Job {
    pub sub: SubscriptionConfig,
    pub transport: Box<dyn Transport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(CollectorState::Stopped.exit_code(), 0);
        assert_eq!(CollectorState::Faulted.exit_code(), 1);
        assert_eq!(CollectorState::Draining.to_string(), "draining");
    }
}
