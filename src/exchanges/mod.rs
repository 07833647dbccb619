//! Exchange adapter registry and factory
//!
//! All protocol-specific logic lives in adapter modules. The rest of
//! the collector talks to exchanges only through `ExchangeAdapter`.

pub mod adapter;
pub mod bingx;
pub mod json;

use std::sync::Arc;
use adapter::ExchangeAdapter;

/// Returns an exchange adapter instance by name.
///
/// CONTRACT:
/// - `name` must match the `exchange.name` field in the config file
/// - The same adapter instance is shared across collector tasks
pub fn get_adapter(name: &str) -> Option<Arc<dyn ExchangeAdapter>> {
    match name {
        "bingx" => Some(Arc::new(bingx::BingxAdapter)),
        "json" => Some(Arc::new(json::JsonAdapter)),
        _ => None,
    }
}
