/// Sink layer
///
/// A sink persists `DecodedRecord`s. Every persisted record is wrapped
/// in a `PersistedRecord` carrying its natural key, so consumers can
/// deduplicate redeliveries after a crash or reconnect.
///
/// Sinks never drop a record silently: a failed write returns
/// `WriteError` and the collector decides whether to retry.
pub mod file;
pub mod redis_stream;
pub mod stdout;

use std::sync::Arc;

use serde::Serialize;

use crate::config::SinkConfig;
use crate::error::WriteError;
use crate::schema::DecodedRecord;

#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    /// Short identifier for logs ("file", "redis", "stdout").
    fn name(&self) -> &'static str;

    async fn write(&self, record: &DecodedRecord) -> Result<(), WriteError>;

    /// Flush buffered output. Called when draining.
    async fn flush(&self) -> Result<(), WriteError> {
        Ok(())
    }
}

/// On-disk / on-wire envelope: `{"key": .., "record": {..}}`.
#[derive(Debug, Serialize)]
pub struct PersistedRecord<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub record: &'a DecodedRecord,
}

impl<'a> PersistedRecord<'a> {
    pub fn new(record: &'a DecodedRecord) -> Self {
        Self {
            key: record.natural_key(),
            record,
        }
    }

    pub fn to_json(&self) -> Result<String, WriteError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Opens the configured sink.
pub async fn build_sink(cfg: &SinkConfig) -> Result<Arc<dyn RecordSink>, WriteError> {
    let sink: Arc<dyn RecordSink> = match cfg {
        SinkConfig::File { path } => Arc::new(file::FileSink::open(path).await?),
        SinkConfig::Redis { url, stream } => {
            Arc::new(redis_stream::RedisSink::connect(url, stream).await?)
        }
        SinkConfig::Stdout => {
            log::warn!("sink running in DEMO mode (stdout)");
            Arc::new(stdout::StdoutSink)
        }
    };
    Ok(sink)
}

#[cfg(test)]
pub mod testing {
    //! In-memory sink with injectable failures.

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    pub struct MemorySink {
        records: Mutex<Vec<DecodedRecord>>,
        /// Number of upcoming writes that fail
        pub fail_next: AtomicU32,
        pub attempts: AtomicUsize,
        pub flushes: AtomicUsize,
    }

    impl MemorySink {
        pub fn failing(times: u32) -> Self {
            let sink = Self::default();
            sink.fail_next.store(times, Ordering::SeqCst);
            sink
        }

        pub fn records(&self) -> Vec<DecodedRecord> {
            self.records.lock().unwrap().clone()
        }

        pub fn keys(&self) -> Vec<String> {
            self.records()
                .iter()
                .filter_map(DecodedRecord::natural_key)
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl RecordSink for MemorySink {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn write(&self, record: &DecodedRecord) -> Result<(), WriteError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(WriteError::Unavailable("injected failure".into()));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn flush(&self) -> Result<(), WriteError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::HeartbeatData;

    #[test]
    fn envelope_omits_missing_key() {
        let hb = DecodedRecord::Heartbeat(HeartbeatData {
            exchange: "bingx".into(),
            timestamp: 1,
        });
        let json = PersistedRecord::new(&hb).to_json().unwrap();
        assert_eq!(json, r#"{"record":{"type":"heartbeat","exchange":"bingx","timestamp":1}}"#);
    }
}
