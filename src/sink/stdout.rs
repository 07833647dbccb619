use tokio::io::{AsyncWriteExt, stdout};

use crate::error::WriteError;
use crate::schema::DecodedRecord;

use super::{PersistedRecord, RecordSink};

/// Demo sink: prints every record instead of persisting it.
pub struct StdoutSink;

#[async_trait::async_trait]
impl RecordSink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn write(&self, record: &DecodedRecord) -> Result<(), WriteError> {
        let line = format!("DEMO → {}\n", PersistedRecord::new(record).to_json()?);
        stdout().write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), WriteError> {
        stdout().flush().await?;
        Ok(())
    }
}
