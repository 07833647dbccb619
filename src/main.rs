// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// - config:     Configuration loaded from JSON
// - error:      Error taxonomy shared by all layers
// - schema:     Raw messages and decoded market records
// - util:       Time, numeric and compression helpers
// - exchanges:  Exchange adapters and adapter registry
// - transport:  WebSocket / polling clients with reconnect
// - sink:       Record persistence (file, Redis, stdout)
// - collector:  Per-subscription runtime (read → decode → write)
// - metrics:    Runtime counters and periodic reporting
//
mod collector;
mod config;
mod error;
mod exchanges;
mod metrics;
mod schema;
mod sink;
mod transport;
mod util;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use env_logger::Env;
use rustls::crypto::{CryptoProvider, ring};

use collector::{CollectorContext, CollectorSettings, CollectorState, Job, runner::run_collector};
use config::Config;
use error::ConfigError;
use exchanges::get_adapter;
use transport::build_transport;

/// Environment variable naming the config file when no argument is given.
const CONFIG_ENV: &str = "COLLECTOR_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Exit codes:
// - 0  clean shutdown (SIGINT / SIGTERM)
// - 1  a collector task faulted
// - 2  configuration error
//
#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    // rustls >= 0.23 requires an explicit CryptoProvider
    if CryptoProvider::install_default(ring::default_provider()).is_err() {
        log::warn!("rustls crypto provider was already installed");
    }

    match run().await {
        Ok(state) => ExitCode::from(state.exit_code()),
        Err(e) if e.downcast_ref::<ConfigError>().is_some() => {
            log::error!("{:#}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run() -> anyhow::Result<CollectorState> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = Config::load(&path)?;
    log::info!(
        "loaded {} with {} subscription(s) on {}",
        path,
        config.subscriptions.len(),
        config.exchange.name
    );

    let adapter = get_adapter(&config.exchange.name).ok_or_else(|| {
        ConfigError::Invalid(format!("exchange '{}' is not supported", config.exchange.name))
    })?;

    // --------------------------------------------------------
    // Starting: sink, shared context, transports
    // --------------------------------------------------------
    let sink = sink::build_sink(&config.sink)
        .await
        .context("failed to open sink")?;
    log::info!("sink ready: {}", sink.name());

    let ctx = CollectorContext::new(sink, CollectorSettings::from_config(&config));

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build http client")?;

    let jobs: Vec<Job> = config
        .subscriptions
        .iter()
        .map(|sub| Job {
            sub: sub.clone(),
            transport: build_transport(&config, adapter.clone(), sub, &http),
        })
        .collect();

    let reporter = metrics::spawn_reporter(
        ctx.metrics.clone(),
        Duration::from_secs(config.metrics_interval_secs),
        ctx.cancel.clone(),
    );

    tokio::spawn({
        let cancel = ctx.cancel.clone();
        async move {
            shutdown_signal().await;
            log::info!("shutdown requested, draining");
            cancel.cancel();
        }
    });

    // --------------------------------------------------------
    // Running until a signal or a fault
    // --------------------------------------------------------
    let state = run_collector(ctx.clone(), adapter, jobs).await;

    ctx.cancel.cancel();
    if let Err(e) = reporter.await {
        log::warn!("metrics reporter ended abnormally: {}", e);
    }

    Ok(state)
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("cannot listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::error!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => log::info!("SIGINT received"),
        _ = terminate => log::info!("SIGTERM received"),
    }
}
