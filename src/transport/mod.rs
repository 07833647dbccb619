/// Transport layer
///
/// A `Transport` owns one connection to the exchange and hands out
/// `RawMessage`s. It does not retry; reconnection, backoff and
/// cancellation live in `stream::MessageStream`, which wraps any
/// transport into a lazy, cancellable sequence of messages.
pub mod backoff;
pub mod poll;
pub mod stream;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, SubscriptionConfig, TransportConfig};
use crate::error::TransportError;
use crate::exchanges::adapter::ExchangeAdapter;
use crate::schema::RawMessage;

/// Connection lifecycle, owned by the transport stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

#[async_trait::async_trait]
pub trait Transport: Send {
    /// Establishes the underlying connection.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Suspends until the next message arrives.
    ///
    /// Must be cancel-safe: dropping the future loses no message
    /// that was already handed out.
    async fn receive(&mut self) -> Result<RawMessage, TransportError>;

    /// Releases the connection, if any.
    async fn close(&mut self) {}
}

/// Builds the configured transport for one subscription.
pub fn build_transport(
    config: &Config,
    adapter: Arc<dyn ExchangeAdapter>,
    sub: &SubscriptionConfig,
    http: &reqwest::Client,
) -> Box<dyn Transport> {
    let credentials = config
        .exchange
        .credentials
        .as_ref()
        .and_then(|c| c.header_pair())
        .map(|(h, k)| (h.to_string(), k.to_string()));

    match &config.transport {
        TransportConfig::Stream => Box::new(ws::WsTransport::new(
            adapter,
            config.exchange.ws_url().to_string(),
            sub.clone(),
            credentials,
            config.debug_log(),
        )),
        TransportConfig::Poll { url, interval_ms } => Box::new(poll::PollTransport::new(
            http.clone(),
            crate::util::fill_template(url, &sub.symbol, &sub.channel),
            sub.channel.clone(),
            Duration::from_millis(*interval_ms),
            credentials,
        )),
    }
}

/// Parses a `Retry-After` header given in seconds.
///
/// HTTP-date values are not honored; the caller falls back to its
/// exponential policy.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after(Some(" 7 ")), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Backoff.to_string(), "backoff");
    }
}
