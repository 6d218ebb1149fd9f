use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio::sync::watch;
use tracing::info;

use crate::config::ScrapingSettings;

/// Pause between two consecutive groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDelay {
    None,
    Fixed(Duration),
    /// Uniformly random in `[min, max]`
    Random { min: Duration, max: Duration },
}

impl BatchDelay {
    fn sample(&self) -> Duration {
        match *self {
            BatchDelay::None => Duration::ZERO,
            BatchDelay::Fixed(delay) => delay,
            BatchDelay::Random { min, max } if max > min => {
                rand::thread_rng().gen_range(min..=max)
            }
            BatchDelay::Random { min, .. } => min,
        }
    }
}

impl From<&ScrapingSettings> for BatchDelay {
    fn from(s: &ScrapingSettings) -> Self {
        let min = Duration::from_millis(s.batch_delay_min_ms);
        let max = Duration::from_millis(s.batch_delay_max_ms);
        if max.is_zero() {
            BatchDelay::None
        } else if max <= min {
            BatchDelay::Fixed(min)
        } else {
            BatchDelay::Random { min, max }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running { batch_index: usize },
    Waiting { delay: Duration },
    Done,
}

/// Results of a full run, in input order
#[derive(Debug)]
pub struct BatchReport<R> {
    pub results: Vec<R>,
    pub group_sizes: Vec<usize>,
}

/// Runs work items in fixed-size concurrent groups with a pause in between.
pub struct BatchScheduler {
    concurrency: usize,
    delay: BatchDelay,
    state: watch::Sender<SchedulerState>,
}

impl BatchScheduler {
    pub fn new(concurrency: usize, delay: BatchDelay) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            concurrency: concurrency.max(1),
            delay,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Run `handler` once per item. A group must fully settle before the
    /// next one starts; there is no pause after the last group.
    pub async fn run<I, R, F, Fut>(&self, items: Vec<I>, handler: F) -> BatchReport<R>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = R>,
    {
        let total = items.len();
        let group_count = total.div_ceil(self.concurrency);
        let mut results = Vec::with_capacity(total);
        let mut group_sizes = Vec::with_capacity(group_count);
        let mut remaining = items.into_iter().peekable();
        let mut batch_index = 0;

        while remaining.peek().is_some() {
            let group: Vec<I> = remaining.by_ref().take(self.concurrency).collect();
            self.state.send_replace(SchedulerState::Running { batch_index });
            info!(
                "🚀 Batch {}/{}: {} item(s)",
                batch_index + 1,
                group_count,
                group.len()
            );

            group_sizes.push(group.len());
            results.extend(join_all(group.into_iter().map(&handler)).await);

            if remaining.peek().is_some() {
                let delay = self.delay.sample();
                self.state.send_replace(SchedulerState::Waiting { delay });
                if !delay.is_zero() {
                    info!("⏳ Waiting {:.1}s before next batch", delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                }
            }
            batch_index += 1;
        }

        self.state.send_replace(SchedulerState::Done);
        BatchReport {
            results,
            group_sizes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn seven_items_in_groups_of_three() {
        let scheduler = BatchScheduler::new(3, BatchDelay::None);
        let calls = AtomicUsize::new(0);
        let report = scheduler
            .run((1..=7).collect(), |n: u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { n * 2 }
            })
            .await;

        assert_eq!(report.group_sizes, vec![3, 3, 1]);
        assert_eq!(report.results, vec![2, 4, 6, 8, 10, 12, 14]);
        assert_eq!(calls.load(Ordering::SeqCst), 7);
        assert_eq!(scheduler.state(), SchedulerState::Done);
    }

    #[tokio::test]
    async fn failures_stay_inside_their_item() {
        let scheduler = BatchScheduler::new(2, BatchDelay::None);
        let report = scheduler
            .run(vec![1, 0, 3], |n: u32| async move {
                if n == 0 {
                    Err("boom")
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(report.results, vec![Ok(1), Err("boom"), Ok(3)]);
    }

    #[tokio::test]
    async fn groups_never_overlap() {
        let scheduler = BatchScheduler::new(2, BatchDelay::Fixed(Duration::from_millis(5)));
        let log = Arc::new(Mutex::new(Vec::new()));
        scheduler
            .run((0..5).collect(), |n: usize| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(("start", n / 2));
                    tokio::time::sleep(Duration::from_millis(10 * (n as u64 % 2 + 1))).await;
                    log.lock().unwrap().push(("end", n / 2));
                }
            })
            .await;

        let log = log.lock().unwrap();
        for (i, (event, group)) in log.iter().enumerate() {
            if *event == "start" {
                let earlier_ends = log[..i].iter().filter(|(e, g)| *e == "end" && g < group).count();
                assert_eq!(earlier_ends, group * 2, "group {} started too early", group);
            }
        }
    }

    #[tokio::test]
    async fn state_is_observable() {
        let scheduler = BatchScheduler::new(1, BatchDelay::None);
        let rx = scheduler.subscribe();
        assert_eq!(*rx.borrow(), SchedulerState::Idle);
        let report = scheduler.run(Vec::<u8>::new(), |n| async move { n }).await;
        assert!(report.results.is_empty());
        assert_eq!(*rx.borrow(), SchedulerState::Done);
    }
}
