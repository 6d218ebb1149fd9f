use std::ffi::OsStr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Network;
use headless_chrome::util::Timeout;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use crate::config::{BrowserSettings, ScrapingSettings};
use crate::error::ScrapeError;
use crate::scrapers::extract::{detect_block, visible_text};
use crate::scrapers::traits::{PageAction, PageFetcher, PageRequest, PageSnapshot};

const MARKER_POLL: Duration = Duration::from_millis(250);
const REQUIRED_CLICK_WAIT: Duration = Duration::from_secs(10);

/// Headless Chrome page fetcher. Every call gets its own browser process
/// with fresh cookies and cache.
#[derive(Debug, Clone)]
pub struct ChromeFetcher {
    browser: BrowserSettings,
    navigation_timeout: Duration,
}

impl ChromeFetcher {
    pub fn new(browser: BrowserSettings, scraping: &ScrapingSettings) -> Self {
        Self {
            browser,
            navigation_timeout: scraping.navigation_timeout(),
        }
    }

    fn launch(&self, request: &PageRequest) -> Result<Browser, ScrapeError> {
        let args: Vec<&OsStr> = self.browser.extra_args.iter().map(OsStr::new).collect();
        let idle = self.navigation_timeout + request.marker_timeout + Duration::from_secs(60);
        let options = LaunchOptions::default_builder()
            .headless(self.browser.headless)
            .sandbox(false)
            .window_size(Some((self.browser.window_width, self.browser.window_height)))
            .idle_browser_timeout(idle)
            .args(args)
            .build()
            .map_err(|e| ScrapeError::Browser(format!("invalid launch options: {}", e)))?;

        Browser::new(options).map_err(|e| ScrapeError::Browser(format!("failed to launch Chrome: {:#}", e)))
    }

    fn open_tab(&self, browser: &Browser) -> Result<Arc<Tab>, ScrapeError> {
        let tab = browser.new_tab().map_err(browser_error)?;
        tab.set_default_timeout(self.navigation_timeout);
        tab.set_user_agent(&self.browser.user_agent, Some("en-GB,en;q=0.9,fr;q=0.8"), None)
            .map_err(browser_error)?;
        tab.call_method(Network::ClearBrowserCookies(None))
            .map_err(browser_error)?;
        tab.call_method(Network::ClearBrowserCache(None))
            .map_err(browser_error)?;
        Ok(tab)
    }

    /// Blocking body of `fetch`, run on the blocking pool.
    fn fetch_blocking(&self, request: &PageRequest) -> Result<PageSnapshot, ScrapeError> {
        let browser = self.launch(request)?;
        let tab = self.open_tab(&browser)?;

        info!("🌐 Loading {}", request.url);
        tab.navigate_to(&request.url)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| match browser_error(e) {
                ScrapeError::Browser(msg) => ScrapeError::Browser(format!("navigation failed: {}", msg)),
                other => other,
            })?;

        if !request.settle.is_zero() {
            thread::sleep(request.settle);
        }

        for action in &request.actions {
            run_action(&tab, action)?;
        }

        let marker = if request.markers.is_empty() {
            None
        } else {
            Some(wait_for_marker(&tab, request)?)
        };

        let html = tab.get_content().map_err(browser_error)?;
        Ok(PageSnapshot {
            final_url: tab.get_url(),
            html,
            marker,
        })
    }
}

#[async_trait]
impl PageFetcher for ChromeFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<PageSnapshot, ScrapeError> {
        let fetcher = self.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || fetcher.fetch_blocking(&request)).await?
    }
}

/// Map a browser failure, keeping timeouts distinguishable.
fn browser_error(err: anyhow::Error) -> ScrapeError {
    let message = format!("{:#}", err);
    let lower = message.to_lowercase();
    if err.is::<Timeout>() || lower.contains("timed out") || lower.contains("timeout") {
        ScrapeError::PageLoadTimeout(message)
    } else {
        ScrapeError::Browser(message)
    }
}

fn run_action(tab: &Arc<Tab>, action: &PageAction) -> Result<(), ScrapeError> {
    match action {
        PageAction::ClickFirst {
            selectors,
            required,
            settle,
        } => {
            let found = selectors.iter().find_map(|selector| {
                let element = if *required {
                    tab.wait_for_element_with_custom_timeout(selector, REQUIRED_CLICK_WAIT)
                } else {
                    tab.find_element(selector)
                };
                element.ok().map(|el| (selector, el))
            });
            match found {
                Some((selector, element)) => {
                    debug!("🖱️ Clicking {}", selector);
                    element.click().map_err(browser_error)?;
                    thread::sleep(*settle);
                }
                None if *required => {
                    return Err(ScrapeError::MissingElement(selectors.join(", ")));
                }
                None => debug!("No element to click among {:?}", selectors),
            }
        }
        PageAction::WaitFor { selector, timeout } => {
            tab.wait_for_element_with_custom_timeout(selector, *timeout)
                .map_err(|_| ScrapeError::MissingElement(selector.clone()))?;
        }
        PageAction::Scroll { step, total, pause } => {
            let step = (*step).max(1);
            let mut offset = step;
            while offset <= *total {
                tab.evaluate(&format!("window.scrollTo(0, {});", offset), false)
                    .map_err(browser_error)?;
                thread::sleep(*pause);
                offset += step;
            }
        }
        PageAction::Pause(duration) => thread::sleep(*duration),
    }
    Ok(())
}

/// Poll the markers in priority order until one is present.
fn wait_for_marker(tab: &Arc<Tab>, request: &PageRequest) -> Result<String, ScrapeError> {
    let deadline = Instant::now() + request.marker_timeout;
    loop {
        if let Some(marker) = request
            .markers
            .iter()
            .find(|selector| tab.find_element(selector).is_ok())
        {
            debug!("✅ Found marker {}", marker);
            return Ok(marker.clone());
        }
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(MARKER_POLL);
    }

    let text = tab.get_content().map(|html| visible_text(&html)).unwrap_or_default();
    if let Some(keyword) = detect_block(&text) {
        warn!("🤖 Anti-bot page detected at {} ({})", request.url, keyword);
        return Err(ScrapeError::BlockedByTarget {
            keyword: keyword.to_string(),
        });
    }
    Err(ScrapeError::PageLoadTimeout(format!(
        "none of [{}] appeared within {:.0}s",
        request.markers.join(", "),
        request.marker_timeout.as_secs_f64()
    )))
}
