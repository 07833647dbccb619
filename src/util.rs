/// Utility helpers shared by adapters, transports and sinks.
///
/// No exchange-specific business logic lives here.

use std::io::Read;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use rust_decimal::Decimal;
use serde_json::Value;

/// Returns the current Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Formats a millisecond timestamp as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn readable_time(ts_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

/// Decode a JSON string or number into a fixed-precision decimal.
///
/// Strings keep their exact scale ("65000.10" stays "65000.10").
/// Numbers keep theirs too: serde_json is built with
/// `arbitrary_precision`, so `Number::to_string()` returns the
/// literal as it appeared on the wire.
pub fn decimal_from_value(v: &Value) -> Option<Decimal> {
    match v {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        _ => None,
    }
}

/// Decode a JSON string or number into an integer.
pub fn i64_from_value(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Inflate a gzip-compressed frame into UTF-8 text.
pub fn gunzip(data: &[u8]) -> std::io::Result<String> {
    let mut out = String::new();
    GzDecoder::new(data).read_to_string(&mut out)?;
    Ok(out)
}

/// Returns true when the buffer starts with the gzip magic bytes.
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&[0x1f, 0x8b])
}

/// Fill `{symbol}` and `{channel}` placeholders of a URL template.
pub fn fill_template(template: &str, symbol: &str, channel: &str) -> String {
    template
        .replace("{symbol}", symbol)
        .replace("{channel}", channel)
}
