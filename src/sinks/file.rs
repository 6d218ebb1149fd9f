use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::{Record, Sink};

/// Appends CSV rows and keeps a JSON array file in sync.
///
/// The JSON file is rewritten in full on every record, so it is meant for
/// runs of a few thousand rows at most.
pub struct FileSink {
    csv_path: PathBuf,
    json_path: PathBuf,
    lock: Mutex<()>,
}

impl FileSink {
    /// Writes `<dir>/<stem>-results.csv` and `<dir>/<stem>-results.json`.
    pub fn new(dir: impl AsRef<Path>, stem: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            csv_path: dir.join(format!("{}-results.csv", stem)),
            json_path: dir.join(format!("{}-results.json", stem)),
            lock: Mutex::new(()),
        }
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn json_path(&self) -> &Path {
        &self.json_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.csv_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(())
    }

    async fn append_csv<T: Record>(&self, record: &T) -> Result<()> {
        let is_new = match tokio::fs::metadata(&self.csv_path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if is_new {
            writer.write_record(T::csv_header())?;
        }
        writer.write_record(record.csv_row())?;
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush CSV row: {}", e))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)
            .await
            .with_context(|| format!("Failed to open {}", self.csv_path.display()))?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Rows already in the JSON file. A file that does not hold a JSON
    /// array is moved aside to `<name>.corrupt` and a fresh array started.
    async fn load_json(&self) -> Result<Vec<Value>> {
        let raw = match tokio::fs::read_to_string(&self.json_path).await {
            Ok(raw) if !raw.trim().is_empty() => raw,
            _ => return Ok(Vec::new()),
        };
        match serde_json::from_str(&raw) {
            Ok(rows) => Ok(rows),
            Err(e) => {
                let aside = self.json_path.with_extension("json.corrupt");
                warn!(
                    "⚠️ {} is not a JSON array ({}), moved to {} and starting fresh",
                    self.json_path.display(),
                    e,
                    aside.display()
                );
                tokio::fs::rename(&self.json_path, &aside)
                    .await
                    .with_context(|| format!("Failed to move {} aside", self.json_path.display()))?;
                Ok(Vec::new())
            }
        }
    }

    async fn write_json<T: Record>(&self, mut rows: Vec<Value>, record: &T) -> Result<()> {
        rows.push(serde_json::to_value(record)?);

        let body = serde_json::to_string_pretty(&rows)?;
        tokio::fs::write(&self.json_path, body)
            .await
            .with_context(|| format!("Failed to write {}", self.json_path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl<T: Record> Sink<T> for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn prepare(&self) -> Result<()> {
        self.ensure_dir().await
    }

    async fn persist(&self, record: &T) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.ensure_dir().await?;
        let rows = self.load_json().await?;
        self.append_csv(record).await?;
        self.write_json(rows, record).await
    }
}
