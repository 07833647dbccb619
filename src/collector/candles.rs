use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::schema::CandleData;

/// Coalesces kline pushes into completed candles.
///
/// The exchange pushes the in-progress candle repeatedly while it is
/// open. A candle counts as closed once a later open time arrives for
/// the same symbol and interval; only then is it handed out.
#[derive(Debug, Default)]
pub struct CandleAggregator {
    open: HashMap<(String, String), CandleData>,
}

impl CandleAggregator {
    /// Feeds one update; returns the candle it closed, if any.
    pub fn push(&mut self, candle: CandleData) -> Option<CandleData> {
        let key = (candle.symbol.clone(), candle.interval.clone());

        match self.open.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(candle);
                None
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get_mut();
                if candle.open_time == current.open_time {
                    *current = candle;
                    None
                } else if candle.open_time < current.open_time {
                    log::debug!(
                        "stale kline {} {} at {}",
                        candle.symbol,
                        candle.interval,
                        candle.open_time
                    );
                    None
                } else {
                    Some(std::mem::replace(current, candle))
                }
            }
        }
    }

    /// Removes and returns every in-progress candle.
    pub fn take_open(&mut self) -> Vec<CandleData> {
        self.open.drain().map(|(_, c)| c).collect()
    }
}
