use std::fs;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::exchanges::{adapter::Channel, get_adapter};

/// Default BingX swap-market WebSocket endpoint.
pub const DEFAULT_WS_URL: &str = "wss://open-api-swap.bingx.com/swap-market";

/// Header used to carry the API key during the handshake.
pub const DEFAULT_CREDENTIALS_HEADER: &str = "X-BX-APIKEY";

/// Environment variable overriding the configured API key.
pub const API_KEY_ENV: &str = "BINGX_API_KEY";

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Loaded from a JSON file, see `Config::load`.
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Exchange endpoint and account settings
    pub exchange: ExchangeConfig,

    /// Streaming or polling transport
    #[serde(default)]
    pub transport: TransportConfig,

    /// Data streams to collect, one task each
    pub subscriptions: Vec<SubscriptionConfig>,

    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Where decoded records are persisted
    pub sink: SinkConfig,

    /// Write attempts after the first failure before the collector gives up
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    #[serde(default = "default_write_retry_delay_ms")]
    pub write_retry_delay_ms: u64,

    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

// ------------------------------------------------------------
// Exchange configuration
// ------------------------------------------------------------
//
// `name` selects the adapter (see `exchanges::get_adapter`).
//
#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    /// Adapter identifier ("bingx", "json")
    pub name: String,

    /// WebSocket endpoint; defaults to the BingX swap-market stream
    pub ws_url: Option<String>,

    /// Account credentials sent with the handshake
    pub credentials: Option<Credentials>,
}

impl ExchangeConfig {
    pub fn ws_url(&self) -> &str {
        self.ws_url.as_deref().unwrap_or(DEFAULT_WS_URL)
    }
}

/// API key and the header carrying it.
///
/// The key must never be committed; prefer `BINGX_API_KEY`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Credentials {
    pub header: Option<String>,
    pub key: Option<String>,
}

impl Credentials {
    /// Returns `(header, key)` when a non-empty key is present.
    pub fn header_pair(&self) -> Option<(&str, &str)> {
        let key = self.key.as_deref().filter(|k| !k.is_empty())?;
        let header = self.header.as_deref().unwrap_or(DEFAULT_CREDENTIALS_HEADER);
        Some((header, key))
    }
}

// ------------------------------------------------------------
// Transport configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Persistent WebSocket stream
    #[default]
    Stream,

    /// Scheduled REST polling
    ///
    /// `url` may contain `{symbol}` and `{channel}` placeholders.
    Poll {
        url: String,
        #[serde(default = "default_poll_interval_ms")]
        interval_ms: u64,
    },
}

/// One data stream: a symbol on a channel.
///
/// Symbols use the exchange format, e.g. "BTC-USDT".
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    pub symbol: String,

    /// "trade", "depth", "depth20", "kline_3m", ...
    pub channel: String,
}

// ------------------------------------------------------------
// Backoff configuration
// ------------------------------------------------------------
//
// delay(n) = min(min_delay * multiplier^n, max_delay) ± jitter
//
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BackoffConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter as a fraction of the delay (0.1 = ±10%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

// ------------------------------------------------------------
// Sink configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Append JSON lines to a local file
    File { path: String },

    /// XADD into a Redis stream
    Redis { url: String, stream: String },

    /// Demo mode: print records to stdout
    Stdout,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Log every raw frame at debug level
    pub log: Option<bool>,
}

fn default_write_retries() -> u32 {
    3
}

fn default_write_retry_delay_ms() -> u64 {
    500
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl Config {
    /// Reads, parses and validates a configuration file.
    ///
    /// `BINGX_API_KEY` overrides `exchange.credentials.key`.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;

        let mut cfg = Self::from_json(path, &data)?;

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            cfg.exchange
                .credentials
                .get_or_insert_with(Credentials::default)
                .key = Some(key);
        }

        Ok(cfg)
    }

    pub fn from_json(path: &str, data: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(data).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects configurations the collector cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(adapter) = get_adapter(&self.exchange.name) else {
            return Err(ConfigError::Invalid(format!(
                "exchange '{}' is not supported",
                self.exchange.name
            )));
        };

        if self.subscriptions.is_empty() {
            return Err(ConfigError::Invalid("no subscriptions configured".into()));
        }

        for sub in &self.subscriptions {
            if sub.symbol.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "empty symbol for channel '{}'",
                    sub.channel
                )));
            }
            match Channel::parse(&sub.channel) {
                Some(channel) if adapter.supports(&channel) => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "channel '{}' for {} is not supported by {}",
                        sub.channel,
                        sub.symbol,
                        adapter.name()
                    )));
                }
            }
        }

        let b = &self.backoff;
        if b.min_delay_ms == 0 || b.min_delay_ms > b.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff requires 0 < min_delay_ms <= max_delay_ms (got {} / {})",
                b.min_delay_ms, b.max_delay_ms
            )));
        }
        if !(b.multiplier >= 1.0 && b.multiplier.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "backoff multiplier must be >= 1.0 (got {})",
                b.multiplier
            )));
        }
        if !(0.0..1.0).contains(&b.jitter) {
            return Err(ConfigError::Invalid(format!(
                "backoff jitter must be in [0, 1) (got {})",
                b.jitter
            )));
        }

        if let TransportConfig::Poll { url, interval_ms } = &self.transport {
            if url.is_empty() || *interval_ms == 0 {
                return Err(ConfigError::Invalid(
                    "poll transport requires a url and interval_ms > 0".into(),
                ));
            }
        }

        if self.metrics_interval_secs == 0 {
            return Err(ConfigError::Invalid("metrics_interval_secs must be > 0".into()));
        }

        Ok(())
    }

    pub fn debug_log(&self) -> bool {
        self.debug
            .as_ref()
            .is_some_and(|d| d.log.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "exchange": { "name": "bingx" },
        "subscriptions": [ { "symbol": "BTC-USDT", "channel": "kline_3m" } ],
        "sink": { "kind": "file", "path": "records.jsonl" }
    }"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = Config::from_json("inline", MINIMAL).unwrap();

        assert_eq!(cfg.exchange.ws_url(), DEFAULT_WS_URL);
        assert!(matches!(cfg.transport, TransportConfig::Stream));
        assert_eq!(cfg.backoff, BackoffConfig::default());
        assert_eq!(cfg.write_retries, 3);
        assert!(!cfg.debug_log());
        assert!(matches!(cfg.sink, SinkConfig::File { ref path } if path == "records.jsonl"));
    }

    #[test]
    fn poll_transport_and_redis_sink_parse() {
        let raw = r#"{
            "exchange": { "name": "json", "credentials": { "key": "abc" } },
            "transport": { "mode": "poll", "url": "http://localhost/{symbol}/{channel}" },
            "subscriptions": [ { "symbol": "ETH-USDT", "channel": "trade" } ],
            "backoff": { "min_delay_ms": 100, "max_delay_ms": 2000, "jitter": 0.2 },
            "sink": { "kind": "redis", "url": "redis://127.0.0.1/", "stream": "md" }
        }"#;
        let cfg = Config::from_json("inline", raw).unwrap();

        assert!(matches!(cfg.transport, TransportConfig::Poll { interval_ms: 1_000, .. }));
        assert_eq!(cfg.backoff.multiplier, 2.0);
        let creds = cfg.exchange.credentials.unwrap();
        assert_eq!(creds.header_pair(), Some((DEFAULT_CREDENTIALS_HEADER, "abc")));
    }

    #[test]
    fn unknown_exchange_is_rejected() {
        let raw = MINIMAL.replace("\"bingx\"", "\"nope\"");
        let err = Config::from_json("inline", &raw).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("nope")));
    }

    #[test]
    fn unsupported_channel_is_rejected() {
        let raw = MINIMAL.replace("kline_3m", "funding");
        assert!(matches!(
            Config::from_json("inline", &raw),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn bingx_rejects_trade_channel() {
        let raw = MINIMAL.replace("kline_3m", "trade");
        assert!(matches!(
            Config::from_json("inline", &raw),
            Err(ConfigError::Invalid(msg)) if msg.contains("bingx")
        ));
    }

    #[test]
    fn inverted_backoff_bounds_are_rejected() {
        let raw = MINIMAL.replace(
            "\"sink\"",
            "\"backoff\": { \"min_delay_ms\": 5000, \"max_delay_ms\": 10 }, \"sink\"",
        );
        assert!(matches!(
            Config::from_json("inline", &raw),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn broken_json_is_a_parse_error() {
        assert!(matches!(
            Config::from_json("inline", "{ not json"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            Config::load("/definitely/not/here.json"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn empty_key_yields_no_header() {
        let creds = Credentials {
            header: None,
            key: Some(String::new()),
        };
        assert_eq!(creds.header_pair(), None);
    }
}
