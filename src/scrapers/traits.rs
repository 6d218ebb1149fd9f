use std::time::Duration;

use async_trait::async_trait;

use crate::error::ScrapeError;
use crate::sinks::Record;

/// A step run on the page between navigation and marker detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    /// Click the first selector present on the page. When `required` is set
    /// and none is present, the fetch fails with `MissingElement`.
    ClickFirst {
        selectors: Vec<String>,
        required: bool,
        settle: Duration,
    },
    /// Wait until `selector` appears, failing with `MissingElement`.
    WaitFor { selector: String, timeout: Duration },
    /// Scroll down in `step` pixel increments to trigger lazy loading.
    Scroll {
        step: u32,
        total: u32,
        pause: Duration,
    },
    Pause(Duration),
}

impl PageAction {
    pub fn click_optional(selectors: &[&str], settle: Duration) -> Self {
        PageAction::ClickFirst {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            required: false,
            settle,
        }
    }

    pub fn click_required(selector: &str, settle: Duration) -> Self {
        PageAction::ClickFirst {
            selectors: vec![selector.to_string()],
            required: true,
            settle,
        }
    }

    pub fn wait_for(selector: &str, timeout: Duration) -> Self {
        PageAction::WaitFor {
            selector: selector.to_string(),
            timeout,
        }
    }
}

/// What to load and what to wait for
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub url: String,
    /// Pause after navigation, before any action
    pub settle: Duration,
    pub actions: Vec<PageAction>,
    /// Candidate selectors in priority order; the first one present wins
    pub markers: Vec<String>,
    pub marker_timeout: Duration,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            settle: Duration::ZERO,
            actions: Vec::new(),
            markers: Vec::new(),
            marker_timeout: Duration::from_secs(30),
        }
    }

    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn action(mut self, action: PageAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn markers(mut self, markers: &[&str], timeout: Duration) -> Self {
        self.markers = markers.iter().map(|m| m.to_string()).collect();
        self.marker_timeout = timeout;
        self
    }
}

/// Rendered page as seen once a marker appeared
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub final_url: String,
    pub html: String,
    /// The marker selector that matched, if markers were requested
    pub marker: Option<String>,
}

/// Loads rendered pages
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: &PageRequest) -> Result<PageSnapshot, ScrapeError>;
}

/// Common trait for all booking-site scrapers.
///
/// `scrape` never fails: fetch and extraction errors are folded into the
/// returned record so a single bad page cannot abort a batch.
#[async_trait]
pub trait ScraperTrait: Send + Sync {
    type Item: Send + 'static;
    type Output: Record;

    async fn scrape(&self, item: Self::Item) -> Self::Output;

    /// Get the name of the scraper source
    fn source_name(&self) -> &'static str;
}
