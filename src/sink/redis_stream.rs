use redis::aio::MultiplexedConnection;

use crate::error::WriteError;
use crate::schema::DecodedRecord;

use super::{PersistedRecord, RecordSink};

/// Appends records to a Redis stream with `XADD`.
///
/// Entry fields:
/// - `key`    natural key (omitted for keyless records)
/// - `type`   record type tag
/// - `record` JSON body
///
/// The multiplexed connection reconnects lazily; a failed command
/// surfaces as `WriteError::Redis` and is retried by the collector.
pub struct RedisSink {
    conn: MultiplexedConnection,
    stream: String,
}

impl RedisSink {
    pub async fn connect(url: &str, stream: &str) -> Result<Self, WriteError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        log::info!("redis sink connected, stream={}", stream);

        Ok(Self {
            conn,
            stream: stream.to_string(),
        })
    }
}

fn xadd_fields(record: &DecodedRecord) -> Result<Vec<(&'static str, String)>, WriteError> {
    let envelope = PersistedRecord::new(record);
    let mut fields = Vec::with_capacity(3);

    if let Some(key) = envelope.key.clone() {
        fields.push(("key", key));
    }
    fields.push(("type", record.type_name().to_string()));
    fields.push(("record", serde_json::to_string(record)?));

    Ok(fields)
}

#[async_trait::async_trait]
impl RecordSink for RedisSink {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn write(&self, record: &DecodedRecord) -> Result<(), WriteError> {
        let fields = xadd_fields(record)?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream).arg("*");
        for (name, value) in &fields {
            cmd.arg(*name).arg(value);
        }

        let mut conn = self.conn.clone();
        let _id: String = cmd.query_async(&mut conn).await?;
        Ok(())
    }
}
