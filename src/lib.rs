pub mod config;
pub mod error;
pub mod inputs;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod scrapers;
pub mod sinks;

pub use error::ScrapeError;
pub use pipeline::{Pipeline, RunSummary};
