use serde_json::Value;

use crate::config::SubscriptionConfig;
use crate::error::DecodeError;
use crate::schema::{DecodedRecord, RawMessage};
use crate::util;

/// Logical data channels understood by the collector.
///
/// Adapters map these to exchange-specific subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// Individual executions
    Trade,

    /// Order book snapshots and deltas ("depth", "depth20", ...)
    Depth,

    /// Candles for one interval ("kline_3m" -> "3m")
    Kline(String),

    /// Keep-alive traffic
    Heartbeat,
}

impl Channel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "trade" | "trades" => Some(Self::Trade),
            "heartbeat" | "ping" => Some(Self::Heartbeat),
            s if s.starts_with("depth") && s["depth".len()..].chars().all(|c| c.is_ascii_digit()) => {
                Some(Self::Depth)
            }
            s => {
                let interval = s.strip_prefix("kline_")?;
                if interval.is_empty() {
                    None
                } else {
                    Some(Self::Kline(interval.to_string()))
                }
            }
        }
    }
}

/// Boundary between the generic collector runtime and an exchange
/// protocol.
///
/// Implementations translate subscriptions into wire messages and
/// wire payloads into `DecodedRecord`s. They perform no I/O and keep
/// no state, so one instance is shared by every task.
pub trait ExchangeAdapter: Send + Sync {
    /// Canonical adapter name, matches `exchange.name` in config.
    fn name(&self) -> &'static str;

    /// Whether this adapter can decode the given channel.
    fn supports(&self, channel: &Channel) -> bool;

    /// Subscription frame sent right after connecting.
    ///
    /// `None` means the endpoint streams without a subscribe request.
    fn subscribe_message(&self, sub: &SubscriptionConfig) -> Option<Value>;

    /// Turn a binary frame into text.
    ///
    /// Gzip frames are inflated; anything else must be UTF-8.
    fn frame_text(&self, data: &[u8]) -> Result<String, DecodeError> {
        if util::is_gzip(data) {
            return util::gunzip(data)
                .map_err(|e| DecodeError::MalformedMessage(format!("gzip: {e}")));
        }
        String::from_utf8(data.to_vec())
            .map_err(|e| DecodeError::MalformedMessage(format!("utf-8: {e}")))
    }

    /// Reply the transport must send for an application-level ping.
    fn control_reply(&self, _text: &str) -> Option<String> {
        None
    }

    /// Decode one payload.
    ///
    /// Returns an empty list for control frames (acks). Must never
    /// panic on arbitrary input.
    fn decode(&self, raw: &RawMessage) -> Result<Vec<DecodedRecord>, DecodeError>;
}

// ------------------------------------------------------------
// Field helpers shared by adapters
// ------------------------------------------------------------

pub(crate) fn parse_json(raw: &RawMessage) -> Result<Value, DecodeError> {
    let text = raw
        .text()
        .ok_or_else(|| DecodeError::MalformedMessage("payload is not utf-8".into()))?;
    Ok(serde_json::from_str(text)?)
}

pub(crate) fn field<'a>(v: &'a Value, name: &str) -> Result<&'a Value, DecodeError> {
    match v.get(name) {
        Some(Value::Null) | None => Err(missing(name)),
        Some(f) => Ok(f),
    }
}

pub(crate) fn str_field<'a>(v: &'a Value, name: &str) -> Result<&'a str, DecodeError> {
    field(v, name)?.as_str().ok_or_else(|| invalid(name))
}

pub(crate) fn decimal_field(v: &Value, name: &str) -> Result<rust_decimal::Decimal, DecodeError> {
    util::decimal_from_value(field(v, name)?).ok_or_else(|| invalid(name))
}

pub(crate) fn i64_field(v: &Value, name: &str) -> Result<i64, DecodeError> {
    util::i64_from_value(field(v, name)?).ok_or_else(|| invalid(name))
}

pub(crate) fn u64_field(v: &Value, name: &str) -> Result<u64, DecodeError> {
    let n = i64_field(v, name)?;
    u64::try_from(n).map_err(|_| invalid(name))
}

fn missing(name: &str) -> DecodeError {
    DecodeError::MalformedMessage(format!("missing field '{name}'"))
}

fn invalid(name: &str) -> DecodeError {
    DecodeError::MalformedMessage(format!("invalid field '{name}'"))
}
