use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use tokio::time::{Instant, sleep_until};

use crate::error::TransportError;
use crate::schema::RawMessage;

use super::{Transport, parse_retry_after};

/// Scheduled REST polling presented as a message transport.
///
/// `connect()` performs the first request so that an unreachable
/// endpoint surfaces as `ConnectionError`; its body is delivered by the
/// first `receive()`. Later requests run every `interval`.
pub struct PollTransport {
    client: reqwest::Client,
    url: String,
    channel: String,
    interval: Duration,
    credentials: Option<(String, String)>,
    pending: Option<RawMessage>,
    next_poll: Instant,
}

impl PollTransport {
    pub fn new(
        client: reqwest::Client,
        url: String,
        channel: String,
        interval: Duration,
        credentials: Option<(String, String)>,
    ) -> Self {
        Self {
            client,
            url,
            channel,
            interval,
            credentials,
            pending: None,
            next_poll: Instant::now(),
        }
    }

    async fn fetch(&mut self) -> Result<RawMessage, TransportError> {
        self.next_poll = Instant::now() + self.interval;

        let mut request = self.client.get(&self.url);
        if let Some((header, key)) = &self.credentials {
            request = request.header(header.as_str(), key.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let hint = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok());
            return Err(TransportError::RateLimited {
                retry_after: parse_retry_after(hint),
            });
        }
        if !status.is_success() {
            return Err(TransportError::Connection(format!("HTTP {status} from {}", self.url)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::StreamClosed(e.to_string()))?;

        Ok(RawMessage::new(self.channel.clone(), body.to_vec()))
    }
}

#[async_trait::async_trait]
impl Transport for PollTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let first = self.fetch().await?;
        self.pending = Some(first);
        Ok(())
    }

    async fn receive(&mut self) -> Result<RawMessage, TransportError> {
        if let Some(msg) = self.pending.take() {
            return Ok(msg);
        }
        sleep_until(self.next_poll).await;
        self.fetch().await
    }

    async fn close(&mut self) {
        self.pending = None;
    }
}
