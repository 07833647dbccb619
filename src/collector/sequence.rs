use std::collections::HashMap;

use crate::schema::DecodedRecord;

/// What the tracker makes of an incoming record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Not seen before; write it
    Fresh,
    /// At or behind the last acknowledged sequence; skip it
    Duplicate { last: u64 },
    /// Sequences `expected..received` never arrived
    Gap { expected: u64, received: u64 },
    /// Book snapshot behind `last`: the exchange restarted its
    /// sequence. Write it; committing resets the tracker.
    Resync { last: u64 },
}

/// Last sequence acknowledged by the sink, per (channel, symbol).
///
/// Lives in the collector task, so it survives reconnects of the
/// underlying transport. `observe` never mutates; the tracker only
/// advances through `commit`, after the sink accepted the record.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: HashMap<(String, String), u64>,
}

impl SequenceTracker {
    pub fn observe(&self, record: &DecodedRecord) -> Observation {
        let Some((key, seq)) = Self::key(record) else {
            return Observation::Fresh;
        };
        let Some(&last) = self.last.get(&key) else {
            return Observation::Fresh;
        };

        let snapshot = matches!(record, DecodedRecord::Book(b) if b.snapshot);

        if snapshot && seq < last {
            return Observation::Resync { last };
        }
        if seq <= last {
            return Observation::Duplicate { last };
        }

        let contiguous = match record {
            DecodedRecord::Trade(_) => true,
            DecodedRecord::Book(_) => !snapshot,
            _ => false,
        };

        if contiguous && seq > last + 1 {
            Observation::Gap {
                expected: last + 1,
                received: seq,
            }
        } else {
            Observation::Fresh
        }
    }

    /// A book snapshot replaces the stored sequence; anything else
    /// only moves it forward.
    pub fn commit(&mut self, record: &DecodedRecord) {
        let Some((key, seq)) = Self::key(record) else {
            return;
        };
        let last = self.last.entry(key).or_insert(seq);
        match record {
            DecodedRecord::Book(b) if b.snapshot => *last = seq,
            _ => *last = (*last).max(seq),
        }
    }

    fn key(record: &DecodedRecord) -> Option<((String, String), u64)> {
        if matches!(record, DecodedRecord::Gap(_) | DecodedRecord::Heartbeat(_)) {
            return None;
        }
        let symbol = record.symbol()?.to_string();
        let seq = record.sequence()?;
        Some(((record.channel_key(), symbol), seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BookData, CandleData, GapData, TradeData};
    use rust_decimal::Decimal;

    fn trade(seq: u64) -> DecodedRecord {
        DecodedRecord::Trade(TradeData {
            exchange: "json".into(),
            symbol: "BTC-USDT".into(),
            seq,
            timestamp: 0,
            price: Decimal::ONE,
            qty: Decimal::ONE,
            side: None,
        })
    }

    fn book(seq: u64, snapshot: bool) -> DecodedRecord {
        DecodedRecord::Book(BookData {
            exchange: "json".into(),
            symbol: "BTC-USDT".into(),
            seq,
            timestamp: 0,
            snapshot,
            bids: vec![],
            asks: vec![],
        })
    }

    fn last(t: &SequenceTracker) -> Option<u64> {
        last_of(t, "trade")
    }

    fn last_of(t: &SequenceTracker, channel: &str) -> Option<u64> {
        t.last
            .get(&(channel.to_string(), "BTC-USDT".to_string()))
            .copied()
    }

    #[test]
    fn only_commit_advances() {
        let mut t = SequenceTracker::default();
        assert_eq!(t.observe(&trade(1)), Observation::Fresh);
        assert_eq!(t.observe(&trade(1)), Observation::Fresh);

        t.commit(&trade(1));
        assert_eq!(t.observe(&trade(1)), Observation::Duplicate { last: 1 });
        assert_eq!(t.observe(&trade(2)), Observation::Fresh);
        assert_eq!(last(&t), Some(1));
    }

    #[test]
    fn forward_jump_on_trades_is_a_gap() {
        let mut t = SequenceTracker::default();
        t.commit(&trade(10));
        assert_eq!(
            t.observe(&trade(13)),
            Observation::Gap {
                expected: 11,
                received: 13
            }
        );
        assert_eq!(t.observe(&trade(9)), Observation::Duplicate { last: 10 });
    }

    #[test]
    fn book_snapshot_resyncs_but_delta_gaps() {
        let mut t = SequenceTracker::default();
        t.commit(&book(5, true));
        assert!(matches!(t.observe(&book(8, false)), Observation::Gap { .. }));
        assert_eq!(t.observe(&book(8, true)), Observation::Fresh);
        assert_eq!(t.observe(&book(5, true)), Observation::Duplicate { last: 5 });
        assert_eq!(t.observe(&book(5, false)), Observation::Duplicate { last: 5 });
    }

    #[test]
    fn restarted_book_sequence_resyncs_on_snapshot() {
        let mut t = SequenceTracker::default();
        t.commit(&book(1_000, true));
        t.commit(&book(1_001, false));

        // exchange restarted its counter: deltas stay duplicates
        assert_eq!(t.observe(&book(3, false)), Observation::Duplicate { last: 1_001 });
        assert_eq!(t.observe(&book(3, true)), Observation::Resync { last: 1_001 });

        t.commit(&book(3, true));
        assert_eq!(last_of(&t, "depth"), Some(3));
        assert_eq!(t.observe(&book(4, false)), Observation::Fresh);
        assert_eq!(
            t.observe(&book(6, false)),
            Observation::Gap {
                expected: 4,
                received: 6
            }
        );
    }

    #[test]
    fn candles_never_gap_and_gaps_are_untracked() {
        let candle = |t: i64| {
            DecodedRecord::Candle(CandleData {
                exchange: "bingx".into(),
                symbol: "BTC-USDT".into(),
                interval: "1m".into(),
                open_time: t,
                open: Decimal::ONE,
                high: Decimal::ONE,
                low: Decimal::ONE,
                close: Decimal::ONE,
                volume: Decimal::ONE,
            })
        };
        let mut t = SequenceTracker::default();
        t.commit(&candle(60_000));
        assert_eq!(t.observe(&candle(180_000)), Observation::Fresh);

        let gap = DecodedRecord::Gap(GapData {
            exchange: "json".into(),
            symbol: "BTC-USDT".into(),
            channel: "trade".into(),
            expected: 1,
            received: 3,
        });
        t.commit(&gap);
        assert_eq!(last(&t), None);
    }

    #[test]
    fn symbols_are_tracked_independently() {
        let mut t = SequenceTracker::default();
        t.commit(&trade(100));

        let DecodedRecord::Trade(mut other) = trade(1) else {
            unreachable!()
        };
        other.symbol = "ETH-USDT".into();
        assert_eq!(t.observe(&DecodedRecord::Trade(other)), Observation::Fresh);
    }
}
