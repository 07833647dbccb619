use std::path::PathBuf;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::error::WriteError;
use crate::schema::DecodedRecord;

use super::{PersistedRecord, RecordSink};

/// Append-only JSON-lines file.
///
/// One `PersistedRecord` per line. Each write is flushed before it is
/// acknowledged; `flush()` additionally syncs file data to disk.
pub struct FileSink {
    writer: Mutex<BufWriter<File>>,
}

impl FileSink {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, WriteError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        log::info!("file sink writing to {}", path.display());

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

#[async_trait::async_trait]
impl RecordSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn write(&self, record: &DecodedRecord) -> Result<(), WriteError> {
        let mut line = PersistedRecord::new(record).to_json()?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), WriteError> {
        let mut writer = self.writer.lock().await;
        writer.flush().await?;
        writer.get_ref().sync_data().await?;
        Ok(())
    }
}
