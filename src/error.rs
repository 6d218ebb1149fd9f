use thiserror::Error;

/// Failures a single scrape task can run into.
///
/// These never escape a task: each job folds them into the `error` field of
/// its result record so the rest of the batch keeps going.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("page load timed out: {0}")]
    PageLoadTimeout(String),

    #[error("blocked by target (matched anti-bot keyword \"{keyword}\")")]
    BlockedByTarget { keyword: String },

    #[error("element not found: {0}")]
    MissingElement(String),

    #[error("no extraction pattern matched")]
    Unmatched,

    #[error("browser error: {0}")]
    Browser(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ScrapeError {
    /// Whether a fresh attempt (new browser, cleared cookies) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::PageLoadTimeout(_)
                | ScrapeError::BlockedByTarget { .. }
                | ScrapeError::Browser(_)
                | ScrapeError::Unmatched
        )
    }
}

impl From<tokio::task::JoinError> for ScrapeError {
    fn from(err: tokio::task::JoinError) -> Self {
        ScrapeError::Browser(format!("browser task did not complete: {}", err))
    }
}
