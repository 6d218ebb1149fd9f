use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hotel_scout::config::{Credentials, Settings};
use hotel_scout::inputs::{read_hotel_targets, read_url_list};
use hotel_scout::models::{RoomWorkItem, StayDates, WorkItem};
use hotel_scout::scheduler::{BatchDelay, BatchScheduler};
use hotel_scout::scrapers::extract::EmailBlacklist;
use hotel_scout::scrapers::types::date_ranges;
use hotel_scout::scrapers::{
    ChromeFetcher, CountScraper, LegalScraper, RoomPolicyScraper, ScrapeContext, ScraperTrait,
};
use hotel_scout::sinks::warehouse::{
    FieldSchema, COUNT_SUMMARY_SCHEMA, DATED_COUNT_SCHEMA, LEGAL_SCHEMA, ROOM_SCHEMA,
};
use hotel_scout::sinks::{FileSink, Record, SinkSet, WarehouseSink, WebhookSink};
use hotel_scout::{Pipeline, RunSummary};

#[derive(Debug, Parser)]
#[command(
    name = "hotel-scout",
    version,
    about = "Scrape hotel counts, trader details and room policies from a booking site"
)]
struct Cli {
    /// Settings file (defaults to config/hotel-scout.toml when present)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Where to write results; repeat for several. Defaults to file.
    #[arg(long = "sink", value_enum, global = true)]
    sinks: Vec<SinkKind>,

    /// Pages loaded at the same time
    #[arg(long, value_name = "K", global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    job: Job,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    File,
    Webhook,
    Warehouse,
}

#[derive(Debug, Args)]
struct StayArgs {
    /// Number of consecutive stays to generate
    #[arg(long, value_name = "N")]
    days: Option<u32>,

    /// Days between today and the first check-in
    #[arg(long, value_name = "N", default_value_t = 0)]
    start_offset: u32,

    #[arg(long, value_name = "N", default_value_t = 1)]
    nights: u32,

    /// Keep only the first N stays (0 keeps all)
    #[arg(long, value_name = "N", default_value_t = 0)]
    dates_limit: usize,
}

impl StayArgs {
    fn stays(&self, default_days: u32) -> Vec<StayDates> {
        let today = Utc::now().date_naive();
        date_ranges(
            today,
            self.days.unwrap_or(default_days),
            self.start_offset,
            self.nights,
            self.dates_limit,
        )
    }
}

#[derive(Debug, Subcommand)]
enum Job {
    /// Count listed hotels per region
    Counts {
        #[arg(long, value_name = "REGION")]
        from: Option<u32>,

        #[arg(long, value_name = "REGION")]
        to: Option<u32>,

        #[arg(long, value_name = "YYYY-MM-DD", requires = "checkout", conflicts_with = "days")]
        checkin: Option<NaiveDate>,

        #[arg(long, value_name = "YYYY-MM-DD", requires = "checkin")]
        checkout: Option<NaiveDate>,

        #[command(flatten)]
        stays: StayArgs,
    },
    /// Read trader details from a list of hotel pages
    Legal {
        /// One hotel URL per line
        #[arg(long, value_name = "FILE")]
        urls: PathBuf,

        #[arg(long, value_name = "N", default_value_t = 0)]
        limit: usize,
    },
    /// Look up room cancellation policies and prices
    Rooms {
        /// Semicolon CSV: hotel URL followed by room type names
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        #[arg(long, value_name = "N", default_value_t = 0)]
        limit: usize,

        #[command(flatten)]
        stays: StayArgs,
    },
}

const ROOM_DAYS: u32 = 180;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(concurrency) = cli.concurrency {
        settings.scraping.concurrency = concurrency;
        settings.validate()?;
    }
    let sinks = if cli.sinks.is_empty() {
        vec![SinkKind::File]
    } else {
        cli.sinks.clone()
    };

    info!("🏨 Hotel Scout");
    info!("==============");

    let fetcher = Arc::new(ChromeFetcher::new(settings.browser.clone(), &settings.scraping));
    let ctx = ScrapeContext::new(&settings, fetcher);

    let summary = match cli.job {
        Job::Counts {
            from,
            to,
            checkin,
            checkout,
            stays,
        } => {
            let from = from.unwrap_or(settings.search.min_region);
            let to = to.unwrap_or(settings.search.max_region);
            if from > to {
                bail!("--from {} is greater than --to {}", from, to);
            }
            let stays = match (checkin, checkout) {
                (Some(checkin), Some(checkout)) => vec![StayDates::new(checkin, checkout)],
                _ if stays.days.is_some() => stays.stays(0),
                _ => Vec::new(),
            };
            let items = WorkItem::grid(from..=to, &stays);
            let (table, schema) = if stays.is_empty() {
                (&settings.warehouse.tables.counts, COUNT_SUMMARY_SCHEMA)
            } else {
                (&settings.warehouse.tables.ranged_counts, DATED_COUNT_SCHEMA)
            };
            let sink_set = build_sinks(&sinks, &settings, "counts", table, schema)?;
            run(CountScraper::new(ctx), items, sink_set, &settings).await?
        }
        Job::Legal { urls, limit } => {
            let items = read_url_list(&urls, limit)?;
            if items.is_empty() {
                bail!("{} contains no URLs", urls.display());
            }
            let sink_set = build_sinks(
                &sinks,
                &settings,
                "legal",
                &settings.warehouse.tables.legal,
                LEGAL_SCHEMA,
            )?;
            run(LegalScraper::new(ctx), items, sink_set, &settings).await?
        }
        Job::Rooms {
            input,
            limit,
            stays,
        } => {
            let targets = read_hotel_targets(&input, limit)?;
            if targets.is_empty() {
                bail!("{} contains no hotels with room types", input.display());
            }
            let stays = stays.stays(ROOM_DAYS);
            let items: Vec<RoomWorkItem> = targets
                .iter()
                .flat_map(|target| {
                    stays.iter().map(move |stay| RoomWorkItem {
                        target: target.clone(),
                        stay: *stay,
                    })
                })
                .collect();
            info!("🏨 {} hotel(s) × {} stay(s)", targets.len(), stays.len());
            let sink_set = build_sinks(
                &sinks,
                &settings,
                "rooms",
                &settings.warehouse.tables.rooms,
                ROOM_SCHEMA,
            )?;
            run(RoomPolicyScraper::new(ctx), items, sink_set, &settings).await?
        }
    };

    info!(
        "🏁 Finished {} item(s) in {} batch(es)",
        summary.total,
        summary.groups.len()
    );
    Ok(())
}

async fn run<S: ScraperTrait>(
    scraper: S,
    items: Vec<S::Item>,
    sinks: SinkSet<S::Output>,
    settings: &Settings,
) -> Result<RunSummary> {
    let scheduler = BatchScheduler::new(
        settings.scraping.concurrency,
        BatchDelay::from(&settings.scraping),
    );
    Pipeline::new(scraper, scheduler, sinks)
        .with_blacklist(EmailBlacklist::new(&settings.filters.email_blacklist))
        .run(items)
        .await
}

fn build_sinks<T: Record>(
    kinds: &[SinkKind],
    settings: &Settings,
    stem: &str,
    table: &str,
    schema: &'static [FieldSchema],
) -> Result<SinkSet<T>> {
    let mut sinks = SinkSet::new();
    for kind in kinds {
        match kind {
            SinkKind::File => {
                sinks.push(Box::new(FileSink::new(&settings.output.directory, stem)));
            }
            SinkKind::Webhook => {
                sinks.push(Box::new(WebhookSink::from_settings(&settings.webhook)?));
            }
            SinkKind::Warehouse => {
                let credentials =
                    Credentials::from_env().context("Warehouse sink needs credentials")?;
                info!(
                    "🔐 Warehouse credentials for {} ({})",
                    credentials.client_email, credentials.project_id
                );
                sinks.push(Box::new(WarehouseSink::from_settings(
                    &settings.warehouse,
                    credentials,
                    table,
                    schema,
                )?));
            }
        }
    }
    Ok(sinks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "hotel-scout",
            "counts",
            "--from",
            "3",
            "--to",
            "5",
            "--checkin",
            "2025-01-01",
            "--checkout",
            "2025-01-02",
            "--sink",
            "file",
            "--sink",
            "webhook",
            "--concurrency",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.sinks, vec![SinkKind::File, SinkKind::Webhook]);
        assert_eq!(cli.concurrency, Some(4));
        assert!(matches!(cli.job, Job::Counts { from: Some(3), to: Some(5), .. }));
    }

    #[test]
    fn checkin_requires_checkout() {
        assert!(Cli::try_parse_from(["hotel-scout", "counts", "--checkin", "2025-01-01"]).is_err());
    }

    #[test]
    fn rooms_job_takes_stay_options() {
        let cli = Cli::try_parse_from([
            "hotel-scout",
            "rooms",
            "--input",
            "hotels.csv",
            "--days",
            "7",
            "--nights",
            "2",
        ])
        .unwrap();
        match cli.job {
            Job::Rooms { stays, .. } => {
                assert_eq!(stays.stays(ROOM_DAYS).len(), 7);
                let first = stays.stays(ROOM_DAYS)[0];
                assert_eq!((first.checkout - first.checkin).num_days(), 2);
            }
            other => panic!("unexpected job {:?}", other),
        }
    }

    #[test]
    fn webhook_sink_requires_url() {
        let settings = Settings::load(None).unwrap();
        let result = build_sinks::<hotel_scout::models::LegalInfo>(
            &[SinkKind::Webhook],
            &settings,
            "legal",
            "LegalInfo",
            LEGAL_SCHEMA,
        );
        assert!(result.is_err());
    }
}
