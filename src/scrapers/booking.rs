use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::ScrapeError;
use crate::models::{
    CancellationPolicy, CountObservation, ExtractionStatus, LegalInfo, RoomPolicy, RoomStatus,
    RoomWorkItem, WorkItem,
};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::scrapers::extract::{
    detect_block, legal_details, property_count, visible_text, Extraction, TRADER_MODAL,
};
use crate::scrapers::rooms::{find_room, RoomLookup, ROOM_TABLE_MARKERS};
use crate::scrapers::traits::{PageAction, PageFetcher, PageRequest, PageSnapshot, ScraperTrait};
use crate::scrapers::types::{stay_url, SearchDefaults, SearchParams};

const COOKIE_BUTTONS: &[&str] = &[
    r#"[data-testid="accept-cookie-notification"]"#,
    "#onetrust-accept-btn-handler",
    r#"button[aria-label*="Accept" i]"#,
    r#"button[aria-label*="accepter" i]"#,
];

/// Any of these means the results page rendered
const RESULTS_MARKERS: &[&str] = &[
    "h1",
    r#"[data-testid="property-card"]"#,
    ".sr_property_block",
    r#"[data-testid="title-link"]"#,
];

const TRADER_BUTTON: &str = r#"[data-testid="trader-information-modal-button"]"#;
const HOST_DETAILS_BUTTON: &str = r#"[data-testid="show-host-detail-button"]"#;
const HOST_EMAIL: &str = r#"[data-testid="host-details-email"]"#;

const AVAILABILITY_BUTTONS: &[&str] = &[
    r#"a[data-testid="availability-cta"]"#,
    r#"button[data-testid="availability-cta"]"#,
    r#"a[aria-label*="availability" i]"#,
    r#"button[aria-label*="availability" i]"#,
];
const EXPAND_ROOM_BUTTONS: &[&str] = &[
    r#"[data-testid="show-rooms"]"#,
    r#"[data-testid="availability-rooms-cta"]"#,
];

/// Shared by every booking-site scraper
#[derive(Clone)]
pub struct ScrapeContext {
    pub fetcher: Arc<dyn PageFetcher>,
    pub defaults: SearchDefaults,
    pub retry: RetryPolicy,
    /// Pause after navigation
    pub settle: Duration,
    pub marker_timeout: Duration,
}

impl ScrapeContext {
    pub fn new(settings: &Settings, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            defaults: SearchDefaults::from(&settings.search),
            retry: RetryPolicy::from(&settings.scraping),
            settle: settings.scraping.page_settle(),
            marker_timeout: settings.scraping.marker_timeout(),
        }
    }

    fn page(&self, url: String) -> PageRequest {
        PageRequest::new(url)
            .settle(self.settle)
            .action(PageAction::click_optional(COOKIE_BUTTONS, Duration::from_millis(300)))
    }
}

fn check_url(raw: &str) -> Result<(), ScrapeError> {
    match url::Url::parse(raw) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Ok(()),
        _ => Err(ScrapeError::InvalidInput(format!("not a hotel page URL: {}", raw))),
    }
}

/// Anti-bot interstitials usually carry an `h1`, so a matched marker does
/// not rule them out. Only consulted once extraction has come up empty.
fn blocked(page: &PageSnapshot) -> Option<ScrapeError> {
    detect_block(&visible_text(&page.html)).map(|keyword| {
        warn!("🤖 Anti-bot page detected at {} ({})", page.final_url, keyword);
        ScrapeError::BlockedByTarget {
            keyword: keyword.to_string(),
        }
    })
}

/// Counts the hotels listed for a region, optionally for a given stay
pub struct CountScraper {
    ctx: ScrapeContext,
}

impl CountScraper {
    pub fn new(ctx: ScrapeContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ScraperTrait for CountScraper {
    type Item = WorkItem;
    type Output = CountObservation;

    async fn scrape(&self, item: WorkItem) -> CountObservation {
        let url = SearchParams::from(&item).to_url(&self.ctx.defaults);
        let request = self
            .ctx
            .page(url.clone())
            .markers(RESULTS_MARKERS, self.ctx.marker_timeout);
        let label = match item.stay {
            Some(stay) => format!("region {} ({} → {})", item.region_id, stay.checkin, stay.checkout),
            None => format!("region {}", item.region_id),
        };

        let fetcher = &self.ctx.fetcher;
        let request = &request;
        let outcome = self
            .ctx
            .retry
            .run(&label, |_| async move {
                let page = fetcher.fetch(request).await?;
                match property_count(&page.html) {
                    Extraction::Matched { pattern, value } => Ok((pattern, value)),
                    Extraction::Unmatched => {
                        Err(blocked(&page).unwrap_or(ScrapeError::Unmatched))
                    }
                }
            })
            .await;

        let mut observation = CountObservation {
            region_id: item.region_id,
            checkin: item.stay.map(|s| s.checkin),
            checkout: item.stay.map(|s| s.checkout),
            observed_at: Utc::now(),
            properties_count: None,
            extraction: ExtractionStatus::Unmatched,
            url,
            error: None,
        };
        match outcome {
            RetryOutcome::Success { value: (pattern, count), .. } => {
                info!("🏨 {}: {} properties ({})", label, count, pattern);
                observation.properties_count = Some(count);
                observation.extraction = ExtractionStatus::Matched {
                    pattern: pattern.to_string(),
                };
            }
            RetryOutcome::Exhausted {
                error: ScrapeError::Unmatched,
                attempts,
            } => {
                warn!("⚠️ {}: no count found after {} attempt(s)", label, attempts);
            }
            RetryOutcome::Exhausted { error, attempts } => {
                warn!("❌ {}: failed after {} attempt(s): {}", label, attempts, error);
                observation.error = Some(error.to_string());
            }
        }
        observation
    }

    fn source_name(&self) -> &'static str {
        "booking-counts"
    }
}

/// Reads the trader (business) details published on a hotel page
pub struct LegalScraper {
    ctx: ScrapeContext,
}

impl LegalScraper {
    pub fn new(ctx: ScrapeContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ScraperTrait for LegalScraper {
    type Item = String;
    type Output = LegalInfo;

    async fn scrape(&self, url: String) -> LegalInfo {
        if let Err(e) = check_url(&url) {
            warn!("❌ {}", e);
            return LegalInfo::failed(url, e.to_string());
        }
        let step = Duration::from_secs(2);
        let request = self
            .ctx
            .page(url.clone())
            .action(PageAction::click_required(TRADER_BUTTON, Duration::from_millis(500)))
            .action(PageAction::wait_for(TRADER_MODAL, Duration::from_secs(10)))
            .action(PageAction::Pause(step))
            .action(PageAction::click_required(HOST_DETAILS_BUTTON, step))
            .markers(&[HOST_EMAIL, TRADER_MODAL], self.ctx.marker_timeout);

        let fetcher = &self.ctx.fetcher;
        let request = &request;
        let outcome = self
            .ctx
            .retry
            .run(&url, |_| async move {
                let page = fetcher.fetch(request).await?;
                legal_details(&page.html).ok_or_else(|| {
                    blocked(&page)
                        .unwrap_or_else(|| ScrapeError::MissingElement(TRADER_MODAL.to_string()))
                })
            })
            .await;

        match outcome.into_result() {
            Ok(details) => {
                info!(
                    "📇 {}: {} / {}",
                    url,
                    details.business_name.as_deref().unwrap_or("-"),
                    details.email.as_deref().unwrap_or("-")
                );
                LegalInfo {
                    url,
                    business_name: details.business_name,
                    address: details.address,
                    email: details.email,
                    phone: details.phone,
                    registration_number: details.registration_number,
                    scraped_at: Utc::now(),
                    error: None,
                }
            }
            Err(error) => {
                warn!("❌ {}: {}", url, error);
                LegalInfo::failed(url, error.to_string())
            }
        }
    }

    fn source_name(&self) -> &'static str {
        "booking-legal"
    }
}

/// Finds the cancellation terms and price of a target room for one stay
pub struct RoomPolicyScraper {
    ctx: ScrapeContext,
}

impl RoomPolicyScraper {
    pub fn new(ctx: ScrapeContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ScraperTrait for RoomPolicyScraper {
    type Item = RoomWorkItem;
    type Output = RoomPolicy;

    async fn scrape(&self, item: RoomWorkItem) -> RoomPolicy {
        let checked = check_url(&item.target.url);
        let full_url = stay_url(&item.target.url, &item.stay, &self.ctx.defaults);
        let request = self
            .ctx
            .page(full_url.clone())
            .action(PageAction::click_optional(AVAILABILITY_BUTTONS, Duration::from_millis(1200)))
            .action(PageAction::click_optional(EXPAND_ROOM_BUTTONS, Duration::from_millis(1000)))
            .action(PageAction::Scroll {
                step: 600,
                total: 4000,
                pause: Duration::from_millis(150),
            })
            .action(PageAction::Pause(Duration::from_millis(500)))
            .markers(ROOM_TABLE_MARKERS, self.ctx.marker_timeout);

        let label = format!("{} ({} → {})", item.target.url, item.stay.checkin, item.stay.checkout);
        let fetcher = &self.ctx.fetcher;
        let request = &request;
        let room_types = &item.target.room_types;
        let outcome = match checked {
            Ok(()) => self
                .ctx
                .retry
                .run(&label, |_| async move {
                    let page = fetcher.fetch(request).await?;
                    match find_room(&page.html, room_types) {
                        RoomLookup::NoTargetRoomFound => match blocked(&page) {
                            Some(error) => Err(error),
                            None => Ok(RoomLookup::NoTargetRoomFound),
                        },
                        lookup => Ok(lookup),
                    }
                })
                .await
                .into_result(),
            Err(e) => Err(e),
        };

        let mut policy = RoomPolicy {
            hotel_url: item.target.url.clone(),
            full_url,
            room_types: item.target.room_types.clone(),
            checkin: item.stay.checkin,
            checkout: item.stay.checkout,
            room_name: None,
            price: None,
            cancellation: CancellationPolicy::NotAvailable,
            status: RoomStatus::RuntimeError,
            scraped_at: Utc::now(),
            error: None,
        };

        match outcome {
            Ok(lookup) => match lookup {
                RoomLookup::Found(offer) => {
                    info!(
                        "🛏️ {}: {} / {} / {}",
                        label,
                        offer.name,
                        offer.cancellation.as_str(),
                        offer.price.as_deref().unwrap_or("-")
                    );
                    policy.status = RoomStatus::Available;
                    policy.room_name = Some(offer.name);
                    policy.price = offer.price;
                    policy.cancellation = offer.cancellation;
                }
                RoomLookup::Unavailable { room_name } => {
                    info!("🚫 {}: no availability", label);
                    policy.status = RoomStatus::Unavailable;
                    policy.room_name = room_name;
                }
                RoomLookup::NoTargetRoomFound => {
                    warn!("⚠️ {}: none of {:?} listed", label, item.target.room_types);
                    policy.status = RoomStatus::NoTargetRoomFound;
                }
            },
            Err(error @ (ScrapeError::PageLoadTimeout(_) | ScrapeError::MissingElement(_))) => {
                warn!("⚠️ {}: room table not found: {}", label, error);
                policy.status = RoomStatus::StructureMismatch;
                policy.error = Some(error.to_string());
            }
            Err(error) => {
                warn!("❌ {}: {}", label, error);
                policy.error = Some(error.to_string());
            }
        }
        policy
    }

    fn source_name(&self) -> &'static str {
        "booking-rooms"
    }
}
