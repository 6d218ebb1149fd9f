use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ScrapingSettings;
use crate::error::ScrapeError;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Uniformly distributed in `[min, max]`
    Jittered { min: Duration, max: Duration },
    /// `base * 2^(attempt - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after failed attempt number `attempt` (1-based).
    /// `jitter` is a sample in `[0, 1)` and only affects `Jittered`.
    pub fn delay_for(&self, attempt: u32, jitter: f64) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Jittered { min, max } => {
                let span = max.saturating_sub(min);
                min + span.mul_f64(jitter.clamp(0.0, 1.0))
            }
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// How a retried operation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Success { value: T, attempts: u32 },
    Exhausted { error: ScrapeError, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_result(self) -> Result<T, ScrapeError> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Exhausted { error, .. } => Err(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Jittered {
                min: Duration::from_secs(5),
                max: Duration::from_secs(10),
            },
        }
    }
}

impl From<&ScrapingSettings> for RetryPolicy {
    fn from(s: &ScrapingSettings) -> Self {
        Self {
            max_attempts: s.retry_attempts.max(1),
            backoff: Backoff::Jittered {
                min: Duration::from_millis(s.retry_min_delay_ms),
                max: Duration::from_millis(s.retry_max_delay_ms),
            },
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("✅ {} succeeded on attempt {}", label, attempt);
                    }
                    return RetryOutcome::Success {
                        value,
                        attempts: attempt,
                    };
                }
                Err(error) if !error.is_retryable() || attempt >= self.max_attempts => {
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    let delay = self.backoff.delay_for(attempt, rand::random::<f64>());
                    warn!(
                        "🔁 {} attempt {}/{} failed: {}. Retrying in {:.1}s",
                        label,
                        attempt,
                        self.max_attempts,
                        error,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Backoff::Fixed(Duration::ZERO))
    }

    #[test]
    fn delay_schedules() {
        let jittered = Backoff::Jittered {
            min: Duration::from_secs(5),
            max: Duration::from_secs(10),
        };
        assert_eq!(jittered.delay_for(1, 0.0), Duration::from_secs(5));
        assert_eq!(jittered.delay_for(1, 0.5), Duration::from_millis(7500));

        let exponential = Backoff::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5),
        };
        assert_eq!(exponential.delay_for(1, 0.3), Duration::from_secs(1));
        assert_eq!(exponential.delay_for(3, 0.3), Duration::from_secs(4));
        assert_eq!(exponential.delay_for(10, 0.3), Duration::from_secs(5));

        assert_eq!(Backoff::Fixed(Duration::from_secs(2)).delay_for(7, 0.9), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let outcome = instant(3)
            .run("region 4", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(ScrapeError::Unmatched)
                    } else {
                        Ok(n * 10)
                    }
                }
            })
            .await;
        assert_eq!(
            outcome,
            RetryOutcome::Success {
                value: 30,
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn exhausts_the_attempt_budget() {
        let outcome: RetryOutcome<()> = instant(3)
            .run("region 4", |_| async {
                Err(ScrapeError::PageLoadTimeout("h1".into()))
            })
            .await;
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(
            outcome.into_result(),
            Err(ScrapeError::PageLoadTimeout("h1".into()))
        );
    }

    #[tokio::test]
    async fn non_retryable_errors_stop_immediately() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = instant(5)
            .run("legal", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ScrapeError::MissingElement("modal".into())) }
            })
            .await;
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
