use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Environment variable pointing at a service-account key file.
pub const CREDENTIALS_PATH_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";
/// Inline service-account JSON, used by CI runners.
pub const INLINE_CREDENTIALS_VAR: &str = "BIGQUERY_CREDENTIALS";

const DEFAULT_CONFIG_FILE: &str = "config/hotel-scout";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

const DEFAULT_EMAIL_BLACKLIST: &[&str] = &[
    "info@accommodators.net",
    "jbrecknell@urban-creation.com",
    "julian.foster@rgroup.co.uk",
    "info@mantalli.com",
    "brandon@artsyproperties.com",
    "ali@hydeparksuites.com",
    "ms.msari@gmail.com",
    "enquiries@nativeplaces.com",
    "iperinvestment@gmail.com",
    "eprelocationltd@gmail.com",
    "sales@condokeeper.co.uk",
    "adaerltd@gmail.com",
];

/// Everything a run needs, resolved once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub scraping: ScrapingSettings,
    pub search: SearchSettings,
    pub browser: BrowserSettings,
    pub output: OutputSettings,
    pub webhook: WebhookSettings,
    pub warehouse: WarehouseSettings,
    pub filters: FilterSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapingSettings {
    pub concurrency: usize,
    pub batch_delay_min_ms: u64,
    pub batch_delay_max_ms: u64,
    pub retry_attempts: u32,
    pub retry_min_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub navigation_timeout_ms: u64,
    pub marker_timeout_ms: u64,
    pub page_settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSettings {
    pub base_url: String,
    /// `{region}` is replaced with the region id
    pub region_label: String,
    pub dest_type: String,
    pub group_adults: u32,
    pub group_children: u32,
    pub no_rooms: u32,
    pub lang: String,
    pub currency: String,
    pub hotels_only: bool,
    pub min_region: u32,
    pub max_region: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSettings {
    pub headless: bool,
    pub user_agent: String,
    pub window_width: u32,
    pub window_height: u32,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    pub url: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseSettings {
    /// Overrides the project from the service-account key
    pub project_id: Option<String>,
    pub dataset_id: String,
    pub api_base_url: String,
    pub token_url: Option<String>,
    pub tables: WarehouseTables,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseTables {
    pub counts: String,
    pub ranged_counts: String,
    pub legal: String,
    pub rooms: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterSettings {
    pub email_blacklist: Vec<String>,
}

impl Settings {
    /// Load defaults, then the optional config file, then `HOTEL_SCOUT__*`
    /// environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("scraping.concurrency", 3)?
            .set_default("scraping.batch_delay_min_ms", 5000)?
            .set_default("scraping.batch_delay_max_ms", 5000)?
            .set_default("scraping.retry_attempts", 3)?
            .set_default("scraping.retry_min_delay_ms", 5000)?
            .set_default("scraping.retry_max_delay_ms", 10000)?
            .set_default("scraping.navigation_timeout_ms", 60000)?
            .set_default("scraping.marker_timeout_ms", 30000)?
            .set_default("scraping.page_settle_ms", 5000)?
            .set_default("search.base_url", "https://www.booking.com/searchresults.en-gb.html")?
            .set_default("search.region_label", "{region}e arr., Paris, Ile de France, France")?
            .set_default("search.dest_type", "district")?
            .set_default("search.group_adults", 2)?
            .set_default("search.group_children", 0)?
            .set_default("search.no_rooms", 1)?
            .set_default("search.lang", "en-gb")?
            .set_default("search.currency", "EUR")?
            .set_default("search.hotels_only", true)?
            .set_default("search.min_region", 1)?
            .set_default("search.max_region", 20)?
            .set_default("browser.headless", true)?
            .set_default("browser.user_agent", DEFAULT_USER_AGENT)?
            .set_default("browser.window_width", 1920)?
            .set_default("browser.window_height", 1080)?
            .set_default("browser.extra_args", Vec::<String>::new())?
            .set_default("output.directory", "data")?
            .set_default("webhook.timeout_ms", 30000)?
            .set_default("warehouse.dataset_id", "MarketData")?
            .set_default("warehouse.api_base_url", "https://bigquery.googleapis.com/bigquery/v2")?
            .set_default("warehouse.tables.counts", "ArrondissementSummary")?
            .set_default("warehouse.tables.ranged_counts", "Arrondissement")?
            .set_default("warehouse.tables.legal", "LegalInfo")?
            .set_default("warehouse.tables.rooms", "RoomPolicies")?
            .set_default(
                "filters.email_blacklist",
                DEFAULT_EMAIL_BLACKLIST
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>(),
            )?;

        builder = match config_file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("HOTEL_SCOUT")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("browser.extra_args")
                    .with_list_parse_key("filters.email_blacklist")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.scraping.concurrency == 0 {
            bail!("scraping.concurrency must be at least 1");
        }
        if self.scraping.retry_attempts == 0 {
            bail!("scraping.retry_attempts must be at least 1");
        }
        if self.scraping.batch_delay_min_ms > self.scraping.batch_delay_max_ms {
            bail!("scraping.batch_delay_min_ms is greater than batch_delay_max_ms");
        }
        if self.scraping.retry_min_delay_ms > self.scraping.retry_max_delay_ms {
            bail!("scraping.retry_min_delay_ms is greater than retry_max_delay_ms");
        }
        if self.search.min_region > self.search.max_region {
            bail!("search.min_region is greater than search.max_region");
        }
        url::Url::parse(&self.search.base_url)
            .with_context(|| format!("search.base_url is not a URL: {}", self.search.base_url))?;
        if let Some(webhook) = &self.webhook.url {
            url::Url::parse(webhook)
                .with_context(|| format!("webhook.url is not a URL: {}", webhook))?;
        }
        Ok(())
    }
}

impl ScrapingSettings {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn marker_timeout(&self) -> Duration {
        Duration::from_millis(self.marker_timeout_ms)
    }

    pub fn page_settle(&self) -> Duration {
        Duration::from_millis(self.page_settle_ms)
    }
}

/// Service-account key used to authenticate against the warehouse
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub project_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Resolve credentials from the environment. Inline JSON wins over the
    /// key file path, matching how the CI runner injects secrets.
    pub fn from_env() -> Result<Self> {
        if let Ok(inline) = std::env::var(INLINE_CREDENTIALS_VAR) {
            if !inline.trim().is_empty() {
                return Self::parse(&inline)
                    .with_context(|| format!("Invalid credentials in {}", INLINE_CREDENTIALS_VAR));
            }
        }
        match std::env::var(CREDENTIALS_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(&path)),
            _ => bail!(
                "No warehouse credentials found. Set either {} or {}",
                CREDENTIALS_PATH_VAR,
                INLINE_CREDENTIALS_VAR
            ),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid credentials file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let creds: Credentials =
            serde_json::from_str(raw).context("Credentials are not a service-account JSON key")?;
        creds.validate()?;
        Ok(creds)
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("project_id", &self.project_id),
            ("private_key", &self.private_key),
            ("client_email", &self.client_email),
        ] {
            if value.trim().is_empty() {
                bail!("Missing {} in credentials", field);
            }
        }
        Ok(())
    }
}
