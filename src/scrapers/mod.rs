pub mod booking;
pub mod browser;
pub mod extract;
pub mod rooms;
pub mod traits;
pub mod types;

pub use booking::{CountScraper, LegalScraper, RoomPolicyScraper, ScrapeContext};
pub use browser::ChromeFetcher;
pub use traits::{PageFetcher, ScraperTrait};
