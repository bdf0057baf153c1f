use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::config::PassSettings;

#[derive(Debug, thiserror::Error)]
pub enum TaskFailure {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("{0:#}")]
    Failed(anyhow::Error),
}

/// Race `task` against `deadline`. On expiry the task future is dropped,
/// which cancels it at its current await point.
pub async fn run_with_deadline<T, F>(deadline: Duration, task: F) -> Result<T, TaskFailure>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TaskFailure::Failed(e)),
        Err(_) => Err(TaskFailure::TimedOut(deadline)),
    }
}

/// What a single attempt produced.
#[derive(Debug)]
pub enum Attempt<O> {
    Done(O),
    /// The page is reachable but does not hold what we need. Not retried.
    Skip(String),
}

/// One browser-driven enrichment step. `attempt` runs under the deadline,
/// `commit` runs after it, so a timeout never interrupts a store write.
/// `commit` returns false when the guarded write found nothing to fill.
#[async_trait(?Send)]
pub trait EnrichTask {
    type Item: fmt::Display;
    type Output;

    async fn attempt(&mut self, item: &Self::Item) -> anyhow::Result<Attempt<Self::Output>>;

    fn commit(&mut self, item: &Self::Item, output: Self::Output) -> anyhow::Result<bool>;
}

#[derive(Debug)]
pub struct DeferredItem<I> {
    pub item: I,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DeadlinePolicy {
    pub deadline: Duration,
    pub retry_factor: u32,
}

impl From<&PassSettings> for DeadlinePolicy {
    fn from(s: &PassSettings) -> Self {
        DeadlinePolicy {
            deadline: s.deadline(),
            retry_factor: s.retry_factor.max(1),
        }
    }
}

impl DeadlinePolicy {
    pub fn retry_deadline(&self) -> Duration {
        self.deadline * self.retry_factor
    }

    /// Element waits get at most half the primary deadline, so a missing
    /// element is reported before the attempt itself times out.
    pub fn element_wait(&self, configured: Duration) -> Duration {
        configured.min(self.deadline / 2)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub selected: usize,
    /// Committed on the first attempt.
    pub updated: usize,
    pub skipped: usize,
    pub deferred: usize,
    /// Committed on the retry pass.
    pub recovered: usize,
    pub failed: usize,
}

impl PassSummary {
    pub fn print(&self, name: &str) {
        println!(
            "{}: {} selected, {} updated, {} skipped, {} deferred ({} recovered, {} failed).",
            name, self.selected, self.updated, self.skipped, self.deferred, self.recovered, self.failed,
        );
    }
}

enum Outcome {
    Committed,
    Skipped,
    Deferred(String),
}

async fn attempt_once<T: EnrichTask>(task: &mut T, item: &T::Item, deadline: Duration) -> Outcome {
    match run_with_deadline(deadline, task.attempt(item)).await {
        Ok(Attempt::Done(output)) => match task.commit(item, output) {
            Ok(true) => Outcome::Committed,
            Ok(false) => Outcome::Skipped,
            Err(e) => {
                error!("Failed to save {}: {:#}", item, e);
                Outcome::Skipped
            }
        },
        Ok(Attempt::Skip(reason)) => {
            warn!("Skipping {}: {}", item, reason);
            Outcome::Skipped
        }
        Err(failure) => Outcome::Deferred(failure.to_string()),
    }
}

/// Primary pass over `items`, then exactly one retry pass over whatever was
/// deferred, with the longer deadline. Items that fail twice are only
/// logged; the store still shows them as pending for the next run.
pub async fn run_pass<T: EnrichTask>(
    name: &str,
    task: &mut T,
    items: Vec<T::Item>,
    policy: &DeadlinePolicy,
) -> PassSummary {
    let mut summary = PassSummary {
        selected: items.len(),
        ..Default::default()
    };
    let mut queue: Vec<DeferredItem<T::Item>> = Vec::new();

    let pb = progress_bar(items.len());
    for item in items {
        info!("{}: processing {}", name, item);
        match attempt_once(task, &item, policy.deadline).await {
            Outcome::Committed => summary.updated += 1,
            Outcome::Skipped => summary.skipped += 1,
            Outcome::Deferred(reason) => {
                warn!("{}: {} deferred for retry: {}", name, item, reason);
                queue.push(DeferredItem {
                    item,
                    reason,
                    attempts: 1,
                });
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    summary.deferred = queue.len();
    if queue.is_empty() {
        return summary;
    }

    let deadline = policy.retry_deadline();
    info!("{}: retrying {} deferred items with {:?} deadline", name, queue.len(), deadline);
    for mut deferred in queue {
        deferred.attempts += 1;
        match attempt_once(task, &deferred.item, deadline).await {
            Outcome::Committed => summary.recovered += 1,
            Outcome::Skipped => summary.skipped += 1,
            Outcome::Deferred(reason) => {
                error!(
                    "{}: {} failed after {} attempts (first: {}; last: {})",
                    name, deferred.item, deferred.attempts, deferred.reason, reason
                );
                summary.failed += 1;
            }
        }
    }

    summary
}

pub fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Items named "hang" never finish, "flaky" fails once, "gone" skips.
    #[derive(Default)]
    struct Scripted {
        calls: HashMap<String, u32>,
        committed: Vec<String>,
    }

    #[async_trait(?Send)]
    impl EnrichTask for Scripted {
        type Item = String;
        type Output = String;

        async fn attempt(&mut self, item: &String) -> anyhow::Result<Attempt<String>> {
            let n = {
                let n = self.calls.entry(item.clone()).or_default();
                *n += 1;
                *n
            };
            match item.as_str() {
                "hang" => std::future::pending().await,
                "flaky" if n == 1 => anyhow::bail!("node detached"),
                "slow" if n == 1 => {
                    tokio::time::sleep(Duration::from_secs(7)).await;
                    Ok(Attempt::Done(item.to_uppercase()))
                }
                "gone" => Ok(Attempt::Skip("no details button".into())),
                _ => Ok(Attempt::Done(item.to_uppercase())),
            }
        }

        fn commit(&mut self, item: &String, output: String) -> anyhow::Result<bool> {
            if item == "stale" {
                return Ok(false);
            }
            self.committed.push(output);
            Ok(true)
        }
    }

    fn items(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn policy() -> DeadlinePolicy {
        DeadlinePolicy {
            deadline: Duration::from_secs(5),
            retry_factor: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_returns_value_or_timeout() {
        let ok = run_with_deadline(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let slow = run_with_deadline(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(())
        })
        .await;
        assert!(matches!(slow, Err(TaskFailure::TimedOut(d)) if d == Duration::from_secs(1)));

        let failed: Result<(), _> =
            run_with_deadline(Duration::from_secs(1), async { anyhow::bail!("boom") }).await;
        assert!(matches!(failed, Err(TaskFailure::Failed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_item_does_not_block_the_batch() {
        let mut task = Scripted::default();
        let start = tokio::time::Instant::now();
        let summary = run_pass("test", &mut task, items(&["a", "hang", "b", "c"]), &policy()).await;

        assert_eq!(task.committed, ["A", "B", "C"]);
        assert_eq!(summary.updated, 3);
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(task.calls["hang"], 2);
        // 5s on the primary pass, 10s on the retry.
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_items_get_one_longer_retry() {
        let mut task = Scripted::default();
        let summary = run_pass("test", &mut task, items(&["slow", "flaky", "a"]), &policy()).await;

        assert_eq!(
            summary,
            PassSummary {
                selected: 3,
                updated: 1,
                skipped: 0,
                deferred: 2,
                recovered: 2,
                failed: 0,
            }
        );
        assert_eq!(task.committed, ["A", "SLOW", "FLAKY"]);
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_items_are_not_retried() {
        let mut task = Scripted::default();
        let summary = run_pass("test", &mut task, items(&["gone", "a"]), &policy()).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.deferred, 0);
        assert_eq!(task.calls["gone"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn commit_that_changes_nothing_counts_as_skipped() {
        let mut task = Scripted::default();
        let summary = run_pass("test", &mut task, items(&["stale", "a"]), &policy()).await;
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(task.committed, ["A"]);
    }

    #[test]
    fn element_wait_stays_under_the_deadline() {
        let p = policy();
        assert_eq!(p.element_wait(Duration::from_secs(10)), Duration::from_millis(2_500));
        assert_eq!(p.element_wait(Duration::from_secs(1)), Duration::from_secs(1));
    }
}
