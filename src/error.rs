use std::time::Duration;

use thiserror::Error;

// ------------------------------------------------------------
// Error taxonomy
// ------------------------------------------------------------
//
// - TransportError: transient, absorbed by the reconnect loop
// - DecodeError:    local, the message is counted and skipped
// - WriteError:     retried a bounded number of times, then fatal
// - ConfigError:    fatal at startup
//

/// Failures raised by a transport while connecting or reading.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established or broke mid-stream.
    #[error("connection error: {0}")]
    Connection(String),

    /// The remote end terminated the stream.
    #[error("stream closed by remote: {0}")]
    StreamClosed(String),

    /// The exchange signalled throttling (HTTP 429 or equivalent).
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
}

impl TransportError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::StreamClosed(_) => "stream_closed",
            Self::RateLimited { .. } => "rate_limited",
        }
    }
}

/// Failures raised by an exchange adapter while decoding a payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unsupported channel: {0}")]
    UnsupportedChannel(String),
}

impl DecodeError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_) => "malformed",
            Self::UnsupportedChannel(_) => "unsupported_channel",
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedMessage(e.to_string())
    }
}

/// Failures raised by a sink while persisting a record.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("sink i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("redis write failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Terminal failure of a collector task.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("[{channel} {symbol}] giving up after {attempts} failed writes: {source}")]
    WriteExhausted {
        channel: String,
        symbol: String,
        attempts: u32,
        source: WriteError,
    },

    #[error("sink flush failed: {0}")]
    Flush(WriteError),

    #[error("collector task aborted: {0}")]
    Task(String),
}
