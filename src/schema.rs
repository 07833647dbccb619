use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::util;

// ------------------------------------------------------------
// Raw message
// ------------------------------------------------------------
//
// Unparsed payload as delivered by a transport. Gzip frames are
// already inflated. Created on receipt, dropped after decode.
//
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Local receive time in milliseconds since Unix epoch
    pub received_at: i64,

    /// Channel of the subscription that produced this payload
    pub channel: String,

    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            received_at: util::now_ms(),
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Payload as UTF-8 text, if valid.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Central record enum written to every sink.
///
/// The `type` field is added by serde and is used for routing
/// downstream ("trade", "book", "candle", "heartbeat", "gap").
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DecodedRecord {
    Trade(TradeData),
    Book(BookData),
    Candle(CandleData),
    Heartbeat(HeartbeatData),
    Gap(GapData),
}

impl DecodedRecord {
    pub fn exchange(&self) -> &str {
        match self {
            Self::Trade(t) => &t.exchange,
            Self::Book(b) => &b.exchange,
            Self::Candle(c) => &c.exchange,
            Self::Heartbeat(h) => &h.exchange,
            Self::Gap(g) => &g.exchange,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Trade(t) => Some(&t.symbol),
            Self::Book(b) => Some(&b.symbol),
            Self::Candle(c) => Some(&c.symbol),
            Self::Gap(g) => Some(&g.symbol),
            Self::Heartbeat(_) => None,
        }
    }

    /// Same value as the serialized `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Trade(_) => "trade",
            Self::Book(_) => "book",
            Self::Candle(_) => "candle",
            Self::Heartbeat(_) => "heartbeat",
            Self::Gap(_) => "gap",
        }
    }

    /// Exchange-assigned sequence; candles use their open time.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Trade(t) => Some(t.seq),
            Self::Book(b) => Some(b.seq),
            Self::Candle(c) => u64::try_from(c.open_time).ok(),
            Self::Gap(g) => Some(g.received),
            Self::Heartbeat(_) => None,
        }
    }

    /// Channel component of the natural key.
    pub fn channel_key(&self) -> String {
        match self {
            Self::Trade(_) => "trade".to_string(),
            Self::Book(_) => "depth".to_string(),
            Self::Candle(c) => format!("kline_{}", c.interval),
            Self::Heartbeat(_) => "heartbeat".to_string(),
            Self::Gap(g) => g.channel.clone(),
        }
    }

    /// `exchange:channel:symbol:seq`, used downstream for deduplication.
    ///
    /// Heartbeats carry no key and are never persisted.
    pub fn natural_key(&self) -> Option<String> {
        let symbol = self.symbol()?;
        let seq = self.sequence()?;
        let key = match self {
            Self::Gap(g) => format!(
                "{}:{}:{}:gap-{}-{}",
                g.exchange, g.channel, symbol, g.expected, g.received
            ),
            _ => format!("{}:{}:{}:{}", self.exchange(), self.channel_key(), symbol, seq),
        };
        Some(key)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

// ------------------------------------------------------------
// Trade
// ------------------------------------------------------------
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TradeData {
    pub exchange: String,

    /// Exchange symbol, e.g. "BTC-USDT"
    pub symbol: String,

    pub seq: u64,

    /// Milliseconds since Unix epoch
    pub timestamp: i64,

    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,

    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
}

// ------------------------------------------------------------
// Order book update
// ------------------------------------------------------------
//
// `snapshot = true` replaces the book; otherwise the levels are a
// delta on top of the previous sequence.
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BookData {
    pub exchange: String,
    pub symbol: String,
    pub seq: u64,
    pub timestamp: i64,
    pub snapshot: bool,

    /// Descending by price (best bid first)
    pub bids: Vec<Level>,

    /// Ascending by price (best ask first)
    pub asks: Vec<Level>,
}

/// A `[price, qty]` book level.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Level(
    #[serde(with = "rust_decimal::serde::str")] pub Decimal,
    #[serde(with = "rust_decimal::serde::str")] pub Decimal,
);

// ------------------------------------------------------------
// Candle (kline)
// ------------------------------------------------------------
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CandleData {
    pub exchange: String,
    pub symbol: String,

    /// Kline interval, e.g. "3m"
    pub interval: String,

    /// Candle open time in milliseconds
    pub open_time: i64,

    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

impl CandleData {
    pub fn readable_time(&self) -> String {
        util::readable_time(self.open_time)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HeartbeatData {
    pub exchange: String,
    pub timestamp: i64,
}

/// Marks sequences that were never received on a contiguous channel.
///
/// Covers `expected..received` (exclusive of `received`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GapData {
    pub exchange: String,
    pub symbol: String,
    pub channel: String,
    pub expected: u64,
    pub received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn trade() -> DecodedRecord {
        DecodedRecord::Trade(TradeData {
            exchange: "json".into(),
            symbol: "BTC-USDT".into(),
            seq: 42,
            timestamp: 1_700_000_000_000,
            price: Decimal::from_str("65000.10").unwrap(),
            qty: Decimal::from_str("0.01").unwrap(),
            side: Some(Side::Buy),
        })
    }

    #[test]
    fn trade_serializes_decimals_as_exact_strings() {
        let v = serde_json::to_value(trade()).unwrap();
        assert_eq!(v["type"], "trade");
        assert_eq!(v["price"], "65000.10");
        assert_eq!(v["qty"], "0.01");
        assert_eq!(v["side"], "buy");
    }

    #[test]
    fn natural_keys() {
        assert_eq!(trade().natural_key().as_deref(), Some("json:trade:BTC-USDT:42"));

        let gap = DecodedRecord::Gap(GapData {
            exchange: "json".into(),
            symbol: "BTC-USDT".into(),
            channel: "trade".into(),
            expected: 43,
            received: 45,
        });
        assert_eq!(gap.natural_key().as_deref(), Some("json:trade:BTC-USDT:gap-43-45"));

        let hb = DecodedRecord::Heartbeat(HeartbeatData {
            exchange: "bingx".into(),
            timestamp: 1,
        });
        assert_eq!(hb.natural_key(), None);
    }

    #[test]
    fn book_levels_serialize_as_pairs() {
        let book = DecodedRecord::Book(BookData {
            exchange: "json".into(),
            symbol: "ETH-USDT".into(),
            seq: 7,
            timestamp: 0,
            snapshot: true,
            bids: vec![Level(Decimal::from_str("3000.5").unwrap(), Decimal::ONE)],
            asks: vec![],
        });
        let v = serde_json::to_value(&book).unwrap();
        assert_eq!(v["bids"][0][0], "3000.5");
        assert_eq!(v["bids"][0][1], "1");

        let back: DecodedRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back, book);
    }
}
