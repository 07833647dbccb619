use serde_json::{Value, json};

use crate::{
    config::SubscriptionConfig,
    error::DecodeError,
    schema::{BookData, CandleData, DecodedRecord, HeartbeatData, Level, RawMessage, Side, TradeData},
    util,
};

use super::adapter::{
    Channel, ExchangeAdapter, decimal_field, i64_field, parse_json, str_field, u64_field,
};

/// Generic channel-tagged JSON adapter
///
/// Every payload names its channel:
///
/// ```json
/// {"channel":"trade","symbol":"BTC-USDT","price":"65000.10","qty":"0.01","seq":42}
/// {"channel":"depth","symbol":"BTC-USDT","seq":7,"snapshot":true,"bids":[["1","2"]],"asks":[]}
/// {"channel":"kline_1m","symbol":"BTC-USDT","t":60000,"o":"1","h":"2","l":"1","c":"2","v":"5"}
/// {"channel":"heartbeat","ts":1700000000000}
/// ```
///
/// Payloads without a `channel` fall back to the subscription channel,
/// except `{"event": ..}` frames which are control traffic.
pub struct JsonAdapter;

impl ExchangeAdapter for JsonAdapter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn supports(&self, _channel: &Channel) -> bool {
        true
    }

    fn subscribe_message(&self, sub: &SubscriptionConfig) -> Option<Value> {
        Some(json!({
            "op": "subscribe",
            "channel": sub.channel,
            "symbol": sub.symbol,
        }))
    }

    fn decode(&self, raw: &RawMessage) -> Result<Vec<DecodedRecord>, DecodeError> {
        let v = parse_json(raw)?;

        let channel_name = match v.get("channel").and_then(Value::as_str) {
            Some(c) => c,
            None if v.get("event").is_some() => return Ok(Vec::new()),
            None => raw.channel.as_str(),
        };

        let channel = Channel::parse(channel_name)
            .ok_or_else(|| DecodeError::UnsupportedChannel(channel_name.to_string()))?;

        let timestamp = v
            .get("ts")
            .and_then(util::i64_from_value)
            .unwrap_or(raw.received_at);
        let exchange = self.name().to_string();

        let record = match channel {
            Channel::Trade => DecodedRecord::Trade(TradeData {
                exchange,
                symbol: str_field(&v, "symbol")?.to_string(),
                seq: u64_field(&v, "seq")?,
                timestamp,
                price: decimal_field(&v, "price")?,
                qty: decimal_field(&v, "qty")?,
                side: parse_side(v.get("side"))?,
            }),

            Channel::Depth => DecodedRecord::Book(BookData {
                exchange,
                symbol: str_field(&v, "symbol")?.to_string(),
                seq: u64_field(&v, "seq")?,
                timestamp,
                snapshot: v.get("snapshot").and_then(Value::as_bool).unwrap_or(false),
                bids: parse_levels(&v, "bids")?,
                asks: parse_levels(&v, "asks")?,
            }),

            Channel::Kline(interval) => DecodedRecord::Candle(CandleData {
                exchange,
                symbol: str_field(&v, "symbol")?.to_string(),
                interval,
                open_time: i64_field(&v, "t")?,
                open: decimal_field(&v, "o")?,
                high: decimal_field(&v, "h")?,
                low: decimal_field(&v, "l")?,
                close: decimal_field(&v, "c")?,
                volume: decimal_field(&v, "v")?,
            }),

            Channel::Heartbeat => DecodedRecord::Heartbeat(HeartbeatData { exchange, timestamp }),
        };

        Ok(vec![record])
    }
}

fn parse_side(v: Option<&Value>) -> Result<Option<Side>, DecodeError> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "buy" | "b" | "bid" => Ok(Some(Side::Buy)),
            "sell" | "s" | "ask" => Ok(Some(Side::Sell)),
            other => Err(DecodeError::MalformedMessage(format!("unknown side '{other}'"))),
        },
        Some(_) => Err(DecodeError::MalformedMessage("invalid field 'side'".into())),
    }
}

fn parse_levels(v: &Value, name: &str) -> Result<Vec<Level>, DecodeError> {
    let Some(levels) = v.get(name) else {
        return Ok(Vec::new());
    };
    let levels = levels
        .as_array()
        .ok_or_else(|| DecodeError::MalformedMessage(format!("invalid field '{name}'")))?;

    levels
        .iter()
        .map(|lvl| {
            let price = lvl.get(0).and_then(util::decimal_from_value);
            let qty = lvl.get(1).and_then(util::decimal_from_value);
            match (price, qty) {
                (Some(p), Some(q)) => Ok(Level(p, q)),
                _ => Err(DecodeError::MalformedMessage(format!("invalid level in '{name}'"))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRADE: &str =
        r#"{"channel":"trade","symbol":"BTC-USDT","price":"65000.10","qty":"0.01","seq":42}"#;

    fn raw(channel: &str, text: &str) -> RawMessage {
        RawMessage::new(channel, text.as_bytes().to_vec())
    }

    #[test]
    fn trade_example_decodes() {
        let out = JsonAdapter.decode(&raw("trade", TRADE)).unwrap();
        let [DecodedRecord::Trade(t)] = &out[..] else {
            panic!("expected a single trade, got {out:?}");
        };
        assert_eq!(t.symbol, "BTC-USDT");
        assert_eq!(t.price.to_string(), "65000.10");
        assert_eq!(t.qty.to_string(), "0.01");
        assert_eq!(t.seq, 42);
        assert_eq!(t.side, None);
    }

    #[test]
    fn re_serialization_keeps_key_and_numerics() {
        let out = JsonAdapter.decode(&raw("trade", TRADE)).unwrap();
        let record = &out[0];
        let v = serde_json::to_value(record).unwrap();

        assert_eq!(v["symbol"], "BTC-USDT");
        assert_eq!(v["price"], "65000.10");
        assert_eq!(v["qty"], "0.01");
        assert_eq!(v["seq"], 42);

        let back: DecodedRecord = serde_json::from_value(v).unwrap();
        assert_eq!(&back, record);
        assert_eq!(back.natural_key(), record.natural_key());
    }

    #[test]
    fn numeric_prices_keep_their_scale() {
        let text = r#"{"channel":"trade","symbol":"BTC-USDT","price":65000.10,"qty":0.010,"seq":43}"#;
        let out = JsonAdapter.decode(&raw("trade", text)).unwrap();
        let DecodedRecord::Trade(t) = &out[0] else {
            panic!("expected trade");
        };
        assert_eq!(t.price.to_string(), "65000.10");
        assert_eq!(t.price.scale(), 2);
        assert_eq!(t.qty.to_string(), "0.010");

        let v = serde_json::to_value(&out[0]).unwrap();
        assert_eq!(v["price"], "65000.10");
    }

    #[test]
    fn depth_decodes_levels() {
        let text = r#"{"channel":"depth20","symbol":"ETH-USDT","seq":"9","snapshot":true,
                       "bids":[["3000.10","1.5"],[2999.9,"2"]],"asks":[["3000.20","0.3"]],"ts":5}"#;
        let out = JsonAdapter.decode(&raw("depth20", text)).unwrap();
        let DecodedRecord::Book(b) = &out[0] else {
            panic!("expected book");
        };
        assert!(b.snapshot);
        assert_eq!(b.seq, 9);
        assert_eq!(b.timestamp, 5);
        assert_eq!(b.bids.len(), 2);
        assert_eq!(b.bids[0].0.to_string(), "3000.10");
        assert_eq!(b.asks[0].1.to_string(), "0.3");
    }

    #[test]
    fn channel_falls_back_to_subscription() {
        let text = r#"{"symbol":"BTC-USDT","price":"1","qty":"2","seq":1,"side":"sell"}"#;
        let out = JsonAdapter.decode(&raw("trade", text)).unwrap();
        assert!(matches!(&out[0], DecodedRecord::Trade(t) if t.side == Some(Side::Sell)));
    }

    #[test]
    fn event_frames_are_control() {
        let out = JsonAdapter.decode(&raw("trade", r#"{"event":"subscribed"}"#)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn malformed_payloads() {
        for text in [
            "not json",
            r#"{"channel":"trade","symbol":"BTC-USDT","price":"abc","qty":"1","seq":1}"#,
            r#"{"channel":"trade","symbol":"BTC-USDT","price":"1","qty":"1"}"#,
            r#"{"channel":"trade","symbol":"BTC-USDT","price":"1","qty":"1","seq":-1}"#,
            r#"{"channel":"depth","symbol":"BTC-USDT","seq":1,"bids":[["1"]]}"#,
            r#"{"channel":"trade","symbol":"BTC-USDT","price":"1","qty":"1","seq":1,"side":"up"}"#,
        ] {
            assert!(
                matches!(JsonAdapter.decode(&raw("trade", text)), Err(DecodeError::MalformedMessage(_))),
                "expected malformed: {text}"
            );
        }
    }

    #[test]
    fn unknown_channel_is_unsupported() {
        let text = r#"{"channel":"funding","symbol":"BTC-USDT"}"#;
        assert!(matches!(
            JsonAdapter.decode(&raw("trade", text)),
            Err(DecodeError::UnsupportedChannel(c)) if c == "funding"
        ));
    }

    #[test]
    fn heartbeat_and_kline() {
        let hb = JsonAdapter.decode(&raw("heartbeat", r#"{"channel":"heartbeat","ts":11}"#)).unwrap();
        assert!(matches!(&hb[0], DecodedRecord::Heartbeat(h) if h.timestamp == 11));

        let text = r#"{"channel":"kline_1m","symbol":"BTC-USDT","t":60000,"o":"1","h":"2","l":"0.5","c":"1.5","v":"5"}"#;
        let k = JsonAdapter.decode(&raw("kline_1m", text)).unwrap();
        assert!(matches!(&k[0], DecodedRecord::Candle(c) if c.interval == "1m" && c.open_time == 60_000));
    }
}
