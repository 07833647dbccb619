use serde_json::{Value, json};

use crate::{
    config::SubscriptionConfig,
    error::DecodeError,
    schema::{CandleData, DecodedRecord, HeartbeatData, RawMessage},
    util,
};

use super::adapter::{Channel, ExchangeAdapter, decimal_field, parse_json};

/// BingX swap-market WebSocket adapter
///
/// Frames arrive gzip-compressed. Keep-alive is an application ping
/// (`{"ping": x}`) which must be answered with `{"pong": x}`.
///
/// Subscriptions use `dataType = "<SYMBOL>@<channel>"`, e.g.
/// `BTC-USDT@kline_3m`. Only kline pushes are decoded.
pub struct BingxAdapter;

impl ExchangeAdapter for BingxAdapter {
    fn name(&self) -> &'static str {
        "bingx"
    }

    fn supports(&self, channel: &Channel) -> bool {
        matches!(channel, Channel::Kline(_) | Channel::Heartbeat)
    }

    fn subscribe_message(&self, sub: &SubscriptionConfig) -> Option<Value> {
        Some(json!({
            "id": util::now_ms().to_string(),
            "reqType": "sub",
            "dataType": format!("{}@{}", sub.symbol, sub.channel),
        }))
    }

    fn control_reply(&self, text: &str) -> Option<String> {
        if !text.contains("ping") {
            return None;
        }
        let v: Value = serde_json::from_str(text).ok()?;
        let ping = v.get("ping")?;
        Some(json!({ "pong": ping }).to_string())
    }

    fn decode(&self, raw: &RawMessage) -> Result<Vec<DecodedRecord>, DecodeError> {
        let v = parse_json(raw)?;
        if !v.is_object() {
            return Err(DecodeError::MalformedMessage(format!(
                "expected a JSON object, got {v}"
            )));
        }

        if v.get("ping").is_some() {
            let timestamp = v
                .get("time")
                .and_then(util::i64_from_value)
                .unwrap_or(raw.received_at);
            return Ok(vec![DecodedRecord::Heartbeat(HeartbeatData {
                exchange: self.name().to_string(),
                timestamp,
            })]);
        }

        if let Some(code) = v.get("code").and_then(Value::as_i64) {
            if code != 0 {
                let msg = v.get("msg").and_then(Value::as_str).unwrap_or("");
                return Err(DecodeError::MalformedMessage(format!(
                    "exchange error code {code}: {msg}"
                )));
            }
        }

        // Subscribe acknowledgements: {"id":..,"code":0,"msg":"","dataType":"","data":null}
        let is_ack = v.get("id").is_some() || v.get("code").is_some();

        let data_type = match v.get("dataType").and_then(Value::as_str) {
            Some(dt) if !dt.is_empty() => dt,
            _ if is_ack => return Ok(Vec::new()),
            _ => return Err(DecodeError::MalformedMessage("frame without dataType".into())),
        };

        let data = match v.get("data") {
            Some(Value::Null) | None if is_ack => return Ok(Vec::new()),
            Some(Value::Null) | None => {
                return Err(DecodeError::MalformedMessage(format!(
                    "{data_type} push without data"
                )));
            }
            Some(d) => d,
        };

        let (symbol, channel_name) = data_type.split_once('@').ok_or_else(|| {
            DecodeError::MalformedMessage(format!("dataType without channel: {data_type}"))
        })?;

        let interval = match Channel::parse(channel_name) {
            Some(Channel::Kline(iv)) => iv,
            _ => return Err(DecodeError::UnsupportedChannel(channel_name.to_string())),
        };

        let items: Vec<&Value> = match data {
            Value::Array(list) => list.iter().collect(),
            other => vec![other],
        };

        items
            .into_iter()
            .map(|item| self.parse_candle(symbol, &interval, item))
            .collect()
    }
}

impl BingxAdapter {
    fn parse_candle(
        &self,
        symbol: &str,
        interval: &str,
        item: &Value,
    ) -> Result<DecodedRecord, DecodeError> {
        let k = item.get("kline").unwrap_or(item);

        // Open time is pushed as "t" or "T" depending on the stream
        let open_time = ["t", "T"]
            .iter()
            .find_map(|name| k.get(*name).and_then(util::i64_from_value))
            .ok_or_else(|| DecodeError::MalformedMessage("kline without open time".into()))?;

        Ok(DecodedRecord::Candle(CandleData {
            exchange: self.name().to_string(),
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            open_time,
            open: decimal_field(k, "o")?,
            high: decimal_field(k, "h")?,
            low: decimal_field(k, "l")?,
            close: decimal_field(k, "c")?,
            volume: decimal_field(k, "v")?,
        }))
    }
}
