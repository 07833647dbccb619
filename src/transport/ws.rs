use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, StatusCode, header::RETRY_AFTER};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::SubscriptionConfig;
use crate::error::TransportError;
use crate::exchanges::adapter::ExchangeAdapter;
use crate::schema::RawMessage;

use super::{Transport, parse_retry_after};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Persistent WebSocket connection for exactly one subscription.
///
/// On connect:
/// - performs the handshake (with the credentials header, if any)
/// - sends the adapter's subscribe frame
///
/// While reading:
/// - gzip binary frames are inflated through the adapter
/// - application pings are answered with the adapter's reply
/// - protocol pings are answered by tungstenite itself
pub struct WsTransport {
    adapter: Arc<dyn ExchangeAdapter>,
    url: String,
    sub: SubscriptionConfig,
    credentials: Option<(String, String)>,
    debug: bool,
    socket: Option<Socket>,
}

impl WsTransport {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        url: String,
        sub: SubscriptionConfig,
        credentials: Option<(String, String)>,
        debug: bool,
    ) -> Self {
        Self {
            adapter,
            url,
            sub,
            credentials,
            debug,
            socket: None,
        }
    }

    fn label(&self) -> String {
        format!("{} {}@{}", self.adapter.name(), self.sub.symbol, self.sub.channel)
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| TransportError::Connection("not connected".into()))?;

        if let Err(e) = socket.send(Message::Text(text.into())).await {
            self.socket = None;
            return Err(classify(e));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connection(format!("invalid url {}: {e}", self.url)))?;

        if let Some((header, key)) = &self.credentials {
            let name = HeaderName::from_bytes(header.as_bytes())
                .map_err(|e| TransportError::Connection(format!("bad header name: {e}")))?;
            let value = HeaderValue::from_str(key)
                .map_err(|e| TransportError::Connection(format!("bad header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, _) = connect_async(request).await.map_err(classify)?;
        self.socket = Some(socket);

        if let Some(sub) = self.adapter.subscribe_message(&self.sub) {
            self.send_text(sub.to_string()).await?;
            log::info!("[{}] subscribed", self.label());
        }

        Ok(())
    }

    async fn receive(&mut self) -> Result<RawMessage, TransportError> {
        loop {
            let socket = self
                .socket
                .as_mut()
                .ok_or_else(|| TransportError::Connection("not connected".into()))?;

            let next = socket.next().await;
            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.socket = None;
                    return Err(classify(e));
                }
                None => {
                    self.socket = None;
                    return Err(TransportError::StreamClosed("end of stream".into()));
                }
            };

            let text = match frame {
                Message::Text(t) => t.as_str().to_owned(),

                Message::Binary(data) => match self.adapter.frame_text(&data) {
                    Ok(t) => t,
                    Err(e) => {
                        // deliver undecodable frames so the decoder counts them
                        log::debug!("[{}] undecodable frame: {e}", self.label());
                        return Ok(RawMessage::new(self.sub.channel.clone(), data.to_vec()));
                    }
                },

                Message::Close(frame) => {
                    self.socket = None;
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason.as_str()))
                        .unwrap_or_else(|| "close frame".into());
                    return Err(TransportError::StreamClosed(reason));
                }

                // Ping / Pong / raw frames
                _ => continue,
            };

            if self.debug {
                log::debug!("[{}] recv {}", self.label(), text);
            }

            if let Some(reply) = self.adapter.control_reply(&text) {
                self.send_text(reply).await?;
            }

            return Ok(RawMessage::new(self.sub.channel.clone(), text.into_bytes()));
        }
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
        }
    }
}

/// Maps tungstenite failures onto the transport taxonomy.
///
/// HTTP 429 on the handshake is a rate limit, honoring `Retry-After`.
fn classify(e: WsError) -> TransportError {
    match e {
        WsError::Http(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
            let hint = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok());
            TransportError::RateLimited {
                retry_after: parse_retry_after(hint),
            }
        }
        WsError::Http(response) => {
            TransportError::Connection(format!("handshake rejected: HTTP {}", response.status()))
        }
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::StreamClosed("connection closed".into())
        }
        other => TransportError::Connection(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::http::Response;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    use super::*;
    use crate::exchanges::json::JsonAdapter;

    fn rejected(status: u16, retry_after: Option<&str>) -> WsError {
        let mut builder = Response::builder().status(status);
        if let Some(v) = retry_after {
            builder = builder.header(RETRY_AFTER, v);
        }
        WsError::Http(Box::new(builder.body(None).unwrap()))
    }

    #[test]
    fn handshake_429_is_rate_limited() {
        assert!(matches!(
            classify(rejected(429, Some("7"))),
            TransportError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(7)
        ));
        assert!(matches!(
            classify(rejected(429, None)),
            TransportError::RateLimited { retry_after: None }
        ));
    }

    #[test]
    fn other_failures_map_to_connection_or_closed() {
        assert!(matches!(
            classify(rejected(503, None)),
            TransportError::Connection(m) if m.contains("503")
        ));
        assert!(matches!(classify(WsError::ConnectionClosed), TransportError::StreamClosed(_)));
        assert!(matches!(classify(WsError::AlreadyClosed), TransportError::StreamClosed(_)));
    }

    #[tokio::test]
    async fn subscribes_then_close_frame_ends_the_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();

            let subscribe = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text(r#"{"seq":1}"#.into())).await.unwrap();
            ws.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "going away".into(),
            })))
            .await
            .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
            subscribe
        });

        let sub = SubscriptionConfig {
            symbol: "BTC-USDT".into(),
            channel: "trade".into(),
        };
        let mut t = WsTransport::new(Arc::new(JsonAdapter), url, sub, None, false);

        t.connect().await.unwrap();
        let msg = t.receive().await.unwrap();
        assert_eq!(msg.text(), Some(r#"{"seq":1}"#));

        let err = t.receive().await.unwrap_err();
        assert!(
            matches!(&err, TransportError::StreamClosed(reason) if reason == "1001 going away"),
            "unexpected {err:?}"
        );
        assert!(matches!(t.receive().await, Err(TransportError::Connection(_))));

        let Message::Text(subscribe) = server.await.unwrap() else {
            panic!("expected a text subscribe frame");
        };
        let v: serde_json::Value = serde_json::from_str(subscribe.as_str()).unwrap();
        assert_eq!(v["op"], "subscribe");
        assert_eq!(v["symbol"], "BTC-USDT");
    }
}
