pub mod file;
pub mod warehouse;
pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::models::RecordOutcome;

pub use file::FileSink;
pub use warehouse::{FieldSchema, TableSpec, WarehouseSink};
pub use webhook::WebhookSink;

/// A scrape result that every sink knows how to write
pub trait Record: Serialize + Send + Sync + 'static {
    /// Column names of the CSV file, in row order
    fn csv_header() -> &'static [&'static str];

    fn csv_row(&self) -> Vec<String>;

    /// Flat object posted to the webhook
    fn webhook_body(&self) -> Value;

    /// Row inserted into the warehouse table
    fn warehouse_row(&self) -> Value;

    fn email(&self) -> Option<&str> {
        None
    }

    /// Short human label for logs
    fn describe(&self) -> String;

    fn outcome(&self) -> RecordOutcome;

    fn count(&self) -> Option<u64> {
        None
    }
}

/// Persistence target for scrape results
#[async_trait]
pub trait Sink<T: Record>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs once before scraping starts
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn persist(&self, record: &T) -> Result<()>;
}

/// Fans each record out to every configured sink
pub struct SinkSet<T: Record> {
    sinks: Vec<Box<dyn Sink<T>>>,
}

impl<T: Record> Default for SinkSet<T> {
    fn default() -> Self {
        Self { sinks: Vec::new() }
    }
}

impl<T: Record> SinkSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl Sink<T> + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn Sink<T>>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Prepare every sink. Failures here abort the run.
    pub async fn prepare(&self) -> Result<()> {
        for sink in &self.sinks {
            sink.prepare().await?;
        }
        Ok(())
    }

    /// Write to every sink, returning how many accepted the record.
    pub async fn persist(&self, record: &T) -> usize {
        let mut written = 0;
        for sink in &self.sinks {
            match sink.persist(record).await {
                Ok(()) => written += 1,
                Err(e) => error!(
                    "❌ {} sink failed for {}: {:#}",
                    sink.name(),
                    record.describe(),
                    e
                ),
            }
        }
        written
    }
}
