use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::TempDir;

use hotel_scout::models::{StayDates, WorkItem};
use hotel_scout::retry::{Backoff, RetryPolicy};
use hotel_scout::scheduler::{BatchDelay, BatchScheduler, SchedulerState};
use hotel_scout::scrapers::traits::{PageRequest, PageSnapshot};
use hotel_scout::scrapers::types::SearchDefaults;
use hotel_scout::scrapers::{CountScraper, PageFetcher, ScrapeContext};
use hotel_scout::sinks::{FileSink, SinkSet};
use hotel_scout::{Pipeline, ScrapeError};

/// Serves a results page whose count depends on the region, except for
/// region 4 which always times out.
struct FakeResultsSite {
    calls: AtomicUsize,
}

#[async_trait]
impl PageFetcher for FakeResultsSite {
    async fn fetch(&self, request: &PageRequest) -> Result<PageSnapshot, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let region: u32 = url::Url::parse(&request.url)
            .ok()
            .and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "dest_id")
                    .and_then(|(_, v)| v.parse().ok())
            })
            .ok_or_else(|| ScrapeError::InvalidInput(request.url.clone()))?;

        if region == 4 {
            return Err(ScrapeError::PageLoadTimeout("h1".to_string()));
        }
        Ok(PageSnapshot {
            final_url: request.url.clone(),
            html: format!(
                "<html><body><h1>Paris: {} properties found</h1></body></html>",
                region * 100
            ),
            marker: Some("h1".to_string()),
        })
    }
}

#[tokio::test]
async fn counts_job_writes_every_region_to_file() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(FakeResultsSite {
        calls: AtomicUsize::new(0),
    });
    let ctx = ScrapeContext {
        fetcher: site.clone(),
        defaults: SearchDefaults::default(),
        retry: RetryPolicy::new(2, Backoff::Fixed(Duration::ZERO)),
        settle: Duration::ZERO,
        marker_timeout: Duration::from_secs(1),
    };

    let stay = StayDates::new(
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
    );
    let items = WorkItem::grid(1..=7, &[stay]);

    let sink = FileSink::new(dir.path(), "counts");
    let csv_path = sink.csv_path().to_path_buf();
    let json_path = sink.json_path().to_path_buf();

    let pipeline = Pipeline::new(
        CountScraper::new(ctx),
        BatchScheduler::new(3, BatchDelay::Fixed(Duration::from_millis(1))),
        SinkSet::new().with(sink),
    );
    let summary = pipeline.run(items).await.unwrap();

    assert_eq!(summary.total, 7);
    assert_eq!(summary.succeeded, 6);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.groups, vec![3, 3, 1]);
    assert_eq!(summary.properties_total, (100 + 200 + 300 + 500 + 600 + 700) as u64);
    assert_eq!(pipeline.scheduler().state(), SchedulerState::Done);
    // region 4 is retried once
    assert_eq!(site.calls.load(Ordering::SeqCst), 8);

    let csv = std::fs::read_to_string(csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 8);
    assert_eq!(lines.iter().filter(|l| l.starts_with("ObservationDate")).count(), 1);
    assert!(lines
        .iter()
        .any(|l| l.contains(",1,2025-01-01,2025-01-02,100,matched,")));
    let failed = lines.iter().find(|l| l.contains(",4,")).unwrap();
    assert!(failed.contains(",,error,"));
    assert!(failed.contains("page load timed out"));

    let json: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
    assert_eq!(json.len(), 7);
    let mut regions: Vec<u64> = json
        .iter()
        .map(|r| r["regionId"].as_u64().unwrap())
        .collect();
    regions.sort_unstable();
    assert_eq!(regions, vec![1, 2, 3, 4, 5, 6, 7]);
}
