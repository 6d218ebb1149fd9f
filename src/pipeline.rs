use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::models::RecordOutcome;
use crate::scheduler::BatchScheduler;
use crate::scrapers::extract::EmailBlacklist;
use crate::scrapers::ScraperTrait;
use crate::sinks::{Record, SinkSet};

/// Totals for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub unmatched: usize,
    pub failed: usize,
    /// Dropped because of a blacklisted email, never persisted
    pub filtered: usize,
    pub groups: Vec<usize>,
    /// Sum of counts over records that carry one
    pub properties_total: u64,
}

impl RunSummary {
    fn tally<T: Record>(&mut self, record: &T, filtered: bool) {
        self.total += 1;
        if filtered {
            self.filtered += 1;
            return;
        }
        match record.outcome() {
            RecordOutcome::Succeeded => self.succeeded += 1,
            RecordOutcome::Unmatched => self.unmatched += 1,
            RecordOutcome::Failed => self.failed += 1,
        }
        self.properties_total += record.count().unwrap_or(0);
    }
}

/// Scraper, scheduler, blacklist and sinks wired together for one job
pub struct Pipeline<S: ScraperTrait> {
    scraper: S,
    scheduler: BatchScheduler,
    sinks: SinkSet<S::Output>,
    blacklist: EmailBlacklist,
}

impl<S: ScraperTrait> Pipeline<S> {
    pub fn new(scraper: S, scheduler: BatchScheduler, sinks: SinkSet<S::Output>) -> Self {
        Self {
            scraper,
            scheduler,
            sinks,
            blacklist: EmailBlacklist::default(),
        }
    }

    pub fn with_blacklist(mut self, blacklist: EmailBlacklist) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    fn is_blacklisted(&self, record: &S::Output) -> bool {
        record
            .email()
            .map(|email| self.blacklist.contains(email))
            .unwrap_or(false)
    }

    /// Scrape every item and persist the results. Only sink preparation
    /// can fail the run; per-item problems end up in the records.
    pub async fn run(&self, items: Vec<S::Item>) -> Result<RunSummary> {
        self.sinks
            .prepare()
            .await
            .context("Failed to prepare sinks")?;

        info!(
            "🔎 {}: {} item(s), sinks: {}",
            self.scraper.source_name(),
            items.len(),
            self.sinks.names().join(", ")
        );

        let report = self
            .scheduler
            .run(items, |item| async move {
                let record = self.scraper.scrape(item).await;
                let filtered = self.is_blacklisted(&record);
                if filtered {
                    warn!(
                        "🚫 Skipping {}: blacklisted email {}",
                        record.describe(),
                        record.email().unwrap_or_default()
                    );
                } else {
                    self.sinks.persist(&record).await;
                }
                (record, filtered)
            })
            .await;

        let mut summary = RunSummary {
            groups: report.group_sizes,
            ..RunSummary::default()
        };
        info!("📋 Results for {}:", self.scraper.source_name());
        for (record, filtered) in &report.results {
            summary.tally(record, *filtered);
            let count = record
                .count()
                .map(|c| format!(" ({})", c))
                .unwrap_or_default();
            let state = if *filtered {
                "filtered".to_string()
            } else {
                format!("{:?}", record.outcome()).to_lowercase()
            };
            info!("  {} → {}{}", record.describe(), state, count);
        }

        info!(
            "✨ Done: {} total, {} succeeded, {} unmatched, {} failed, {} filtered, {} properties",
            summary.total,
            summary.succeeded,
            summary.unmatched,
            summary.failed,
            summary.filtered,
            summary.properties_total
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LegalInfo;
    use crate::scheduler::BatchDelay;
    use crate::sinks::Sink;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct FakeLegal;

    #[async_trait]
    impl ScraperTrait for FakeLegal {
        type Item = (String, Option<String>);
        type Output = LegalInfo;

        async fn scrape(&self, (url, email): Self::Item) -> LegalInfo {
            match email {
                Some(email) => LegalInfo {
                    url,
                    email: Some(email),
                    ..LegalInfo::default()
                },
                None => LegalInfo::failed(url, "page load timed out"),
            }
        }

        fn source_name(&self) -> &'static str {
            "fake-legal"
        }
    }

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Sink<LegalInfo> for Collect {
        fn name(&self) -> &'static str {
            "collect"
        }

        async fn persist(&self, record: &LegalInfo) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(record.url.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn blacklisted_emails_are_never_persisted() {
        let sink = Collect::default();
        let pipeline = Pipeline::new(
            FakeLegal,
            BatchScheduler::new(2, BatchDelay::None),
            SinkSet::new().with(sink.clone()),
        )
        .with_blacklist(EmailBlacklist::new(["spam@agency.com"]));

        let items = vec![
            ("https://h/1".to_string(), Some("owner@hotel.fr".to_string())),
            ("https://h/2".to_string(), Some("  SPAM@Agency.com".to_string())),
            ("https://h/3".to_string(), None),
        ];
        let summary = pipeline.run(items).await.unwrap();

        assert_eq!(*sink.0.lock().unwrap(), vec!["https://h/1", "https://h/3"]);
        assert_eq!(
            summary,
            RunSummary {
                total: 3,
                succeeded: 1,
                unmatched: 0,
                failed: 1,
                filtered: 1,
                groups: vec![2, 1],
                properties_total: 0,
            }
        );
    }
}
