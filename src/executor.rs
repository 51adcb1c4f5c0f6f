use crate::traits::ExecutionError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

/// Body of one sub-request, usually a call into an [`OperationExecutor`](crate::OperationExecutor).
pub type TaskFuture<T> = Pin<Box<dyn Future<Output = Result<T, ExecutionError>> + Send + 'static>>;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Worker pool needs at least one worker")]
    EmptyPool,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("Task panicked: {0}")]
    Panicked(String),
    #[error("Worker pool closed")]
    PoolClosed,
}

/// Terminal outcome of a scheduled task.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    TimedOut,
    Failed(TaskError),
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }
}

/// Per-outcome counts of one `schedule` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub scheduled: usize,
    pub completed: usize,
    pub timed_out: usize,
    pub failed: usize,
}

impl ScheduleSummary {
    pub fn of<K, T>(outcomes: &BTreeMap<K, TaskOutcome<T>>) -> Self {
        let mut summary = ScheduleSummary {
            scheduled: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes.values() {
            match outcome {
                TaskOutcome::Completed(_) => summary.completed += 1,
                TaskOutcome::TimedOut => summary.timed_out += 1,
                TaskOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}

/// Bounded fan-out of independent request tasks.
///
/// All tasks are spawned before any result is awaited. Each task waits for
/// a worker permit, then runs its body; the fan-in side gives every task
/// `timeout` measured from its submission. A task that misses its deadline
/// is detached rather than aborted, so it finishes in the background and
/// its result is dropped. The detached body no longer holds a permit, and
/// a task whose deadline passes while it waits for a permit never starts.
///
/// The semaphore is shared by every `schedule` call on the same scheduler,
/// which is how one harvest bounds all of its sub-request kinds together.
pub struct HarvestScheduler {
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

impl HarvestScheduler {
    pub fn new(concurrency_limit: usize, timeout: Duration) -> Result<Self, SchedulerError> {
        if concurrency_limit == 0 {
            return Err(SchedulerError::EmptyPool);
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
            timeout,
        })
    }

    /// Runs all tasks and returns one outcome per distinct key.
    ///
    /// A key that repeats an earlier one is not submitted; the first task
    /// under that key is the one that runs.
    #[instrument(skip(self, tasks), fields(timeout_ms = self.timeout.as_millis() as u64))]
    pub async fn schedule<K, T, I>(&self, tasks: I) -> BTreeMap<K, TaskOutcome<T>>
    where
        K: Ord + Clone + Debug + Send + 'static,
        T: Send + 'static,
        I: IntoIterator<Item = (K, TaskFuture<T>)>,
    {
        let mut pending: JoinSet<(K, TaskOutcome<T>)> = JoinSet::new();
        let mut keys = BTreeSet::new();
        let mut submitted = 0usize;
        let mut duplicates = 0usize;

        // Fan-out: every body is spawned here, nothing is awaited yet.
        for (key, body) in tasks {
            if !keys.insert(key.clone()) {
                warn!(?key, "Duplicate task key, task not submitted");
                duplicates += 1;
                continue;
            }

            let semaphore = Arc::clone(&self.semaphore);
            let deadline = Instant::now() + self.timeout;
            let worker = tokio::spawn(run_with_permit(semaphore, deadline, body));

            pending.spawn(async move {
                let outcome = match timeout_at(deadline, worker).await {
                    Ok(Ok(Ok(Some(payload)))) => TaskOutcome::Completed(payload),
                    Ok(Ok(Ok(None))) => TaskOutcome::TimedOut,
                    Ok(Ok(Err(e))) => TaskOutcome::Failed(e),
                    Ok(Err(join_error)) => {
                        TaskOutcome::Failed(TaskError::Panicked(join_error.to_string()))
                    }
                    // Dropping the handle detaches the worker.
                    Err(_) => TaskOutcome::TimedOut,
                };
                (key, outcome)
            });
            submitted += 1;
        }

        debug!(submitted, duplicates, "All tasks submitted");

        // Fan-in: collect in completion order.
        let mut outcomes = BTreeMap::new();
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((key, outcome)) => {
                    match &outcome {
                        TaskOutcome::Completed(_) => debug!(?key, "Task completed"),
                        TaskOutcome::TimedOut => warn!(?key, "Task timed out, result ignored"),
                        TaskOutcome::Failed(e) => warn!(?key, error = %e, "Task failed"),
                    }
                    outcomes.insert(key, outcome);
                }
                // The collector itself only awaits a handle; it cannot fail
                // unless the runtime is shutting down.
                Err(e) => warn!(error = %e, "Collector task aborted"),
            }
        }

        let summary = ScheduleSummary::of(&outcomes);
        if summary.scheduled != submitted {
            warn!(
                submitted,
                collected = summary.scheduled,
                "Some outcomes were not collected"
            );
        }
        info!(
            scheduled = summary.scheduled,
            duplicates,
            completed = summary.completed,
            timed_out = summary.timed_out,
            failed = summary.failed,
            "Fan-in finished"
        );
        outcomes
    }
}

/// Worker body: holds a permit only until the body finishes or the
/// deadline passes. `None` means the deadline won.
async fn run_with_permit<T>(
    semaphore: Arc<Semaphore>,
    deadline: Instant,
    mut body: TaskFuture<T>,
) -> Result<Option<T>, TaskError>
where
    T: Send + 'static,
{
    let permit = semaphore
        .acquire_owned()
        .await
        .map_err(|_| TaskError::PoolClosed)?;
    if Instant::now() >= deadline {
        return Ok(None);
    }

    let finished = tokio::select! {
        result = &mut body => Some(result),
        _ = sleep_until(deadline) => None,
    };
    drop(permit);

    match finished {
        Some(result) => result.map(Some).map_err(TaskError::from),
        None => {
            // Finishes without a worker slot; its result is dropped.
            tokio::spawn(async move {
                let _ = body.await;
            });
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok_after(ms: u64, value: u32) -> TaskFuture<u32> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        })
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        assert!(matches!(
            HarvestScheduler::new(0, Duration::from_secs(1)),
            Err(SchedulerError::EmptyPool)
        ));
    }

    #[tokio::test]
    async fn test_all_tasks_complete() {
        let scheduler = HarvestScheduler::new(2, Duration::from_secs(5)).unwrap();
        let tasks = (0..5u32).map(|i| (i, ok_after(5, i * 10)));

        let outcomes = scheduler.schedule(tasks).await;

        assert_eq!(outcomes.len(), 5);
        for (key, outcome) in &outcomes {
            match outcome {
                TaskOutcome::Completed(v) => assert_eq!(*v, key * 10),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_slow_task_does_not_block_others() {
        let scheduler = HarvestScheduler::new(4, Duration::from_millis(200)).unwrap();
        let tasks: Vec<(&str, TaskFuture<u32>)> = vec![
            ("hanging", ok_after(60_000, 0)),
            ("fast-a", ok_after(5, 1)),
            ("fast-b", ok_after(10, 2)),
        ];

        let started = std::time::Instant::now();
        let outcomes = scheduler.schedule(tasks).await;

        assert!(matches!(outcomes["hanging"], TaskOutcome::TimedOut));
        assert!(matches!(outcomes["fast-a"], TaskOutcome::Completed(1)));
        assert!(matches!(outcomes["fast-b"], TaskOutcome::Completed(2)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_waits_are_not_serialized() {
        // Four 150ms tasks with a 400ms budget each: sequential waiting
        // would blow the total, true fan-out does not.
        let scheduler = HarvestScheduler::new(4, Duration::from_millis(400)).unwrap();
        let tasks = (0..4u32).map(|i| (i, ok_after(150, i)));

        let started = std::time::Instant::now();
        let outcomes = scheduler.schedule(tasks).await;

        assert!(outcomes.values().all(TaskOutcome::is_completed));
        assert!(started.elapsed() < Duration::from_millis(550));
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let scheduler = HarvestScheduler::new(1, Duration::from_secs(1)).unwrap();
        let failing: TaskFuture<u32> =
            Box::pin(async { Err(ExecutionError::Transport("connection refused".into())) });

        let outcomes = scheduler.schedule(vec![(1u8, failing), (2u8, ok_after(1, 7))]).await;

        assert!(matches!(
            outcomes[&1],
            TaskOutcome::Failed(TaskError::Execution(ExecutionError::Transport(_)))
        ));
        assert!(matches!(outcomes[&2], TaskOutcome::Completed(7)));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let scheduler = HarvestScheduler::new(2, Duration::from_secs(5)).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..6u32).map(|i| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let body: TaskFuture<u32> = Box::pin(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(i)
            });
            (i, body)
        });

        let outcomes = scheduler.schedule(tasks).await;

        assert_eq!(ScheduleSummary::of(&outcomes).completed, 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_timed_out_task_keeps_running() {
        let scheduler = HarvestScheduler::new(1, Duration::from_millis(30)).unwrap();
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&finished);
        let body: TaskFuture<u32> = Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(1, Ordering::SeqCst);
            Ok(0)
        });

        let outcomes = scheduler.schedule(vec![("slow", body)]).await;
        assert!(matches!(outcomes["slow"], TaskOutcome::TimedOut));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timed_out_task_releases_its_worker() {
        let scheduler = HarvestScheduler::new(1, Duration::from_millis(100)).unwrap();

        let first = scheduler.schedule(vec![("hang", ok_after(3_000, 0))]).await;
        assert!(matches!(first["hang"], TaskOutcome::TimedOut));

        let second = scheduler.schedule(vec![("fast", ok_after(0, 7))]).await;
        assert!(matches!(second["fast"], TaskOutcome::Completed(7)));
    }

    #[tokio::test]
    async fn test_task_expired_in_queue_never_runs() {
        let scheduler = HarvestScheduler::new(1, Duration::from_millis(50)).unwrap();
        let held = Arc::clone(&scheduler.semaphore).acquire_owned().await.unwrap();

        let started = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&started);
        let body: TaskFuture<u32> = Box::pin(async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });

        let outcomes = scheduler.schedule(vec![("queued", body)]).await;
        assert!(matches!(outcomes["queued"], TaskOutcome::TimedOut));

        drop(held);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_key_is_not_submitted() {
        let scheduler = HarvestScheduler::new(2, Duration::from_secs(1)).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = |value: u32| -> TaskFuture<u32> {
            let runs = Arc::clone(&runs);
            Box::pin(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            })
        };

        let outcomes = scheduler
            .schedule(vec![("a", counted(1)), ("a", counted(2)), ("b", counted(3))])
            .await;

        assert_eq!(ScheduleSummary::of(&outcomes).scheduled, 2);
        assert!(matches!(outcomes["a"], TaskOutcome::Completed(1)));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_summary_counts() {
        let mut outcomes: BTreeMap<u8, TaskOutcome<()>> = BTreeMap::new();
        outcomes.insert(1, TaskOutcome::Completed(()));
        outcomes.insert(2, TaskOutcome::TimedOut);
        outcomes.insert(3, TaskOutcome::Failed(TaskError::PoolClosed));
        assert_eq!(
            ScheduleSummary::of(&outcomes),
            ScheduleSummary {
                scheduled: 3,
                completed: 1,
                timed_out: 1,
                failed: 1
            }
        );
    }
}
