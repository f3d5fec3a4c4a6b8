//! Key-deduplicated job scheduling
//!
//! Stand-in for an external durable-execution substrate: a persisted
//! `pipeline_jobs` table plus an in-process worker pool. Every logical
//! execution is identified by a caller-chosen key; duplicate starts attach to
//! the existing row instead of spawning a parallel run, and jobs left
//! `running` by a crash are re-spawned at startup. The pipeline's activities
//! re-derive their work from persisted state, which is what makes this
//! at-least-once re-invocation safe.
//!
//! The scheduler is constructed once at service start, carried in app state,
//! and shut down explicitly.

use crate::pipeline::{PipelineError, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// A schedulable unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Drive a batch through its remaining pipeline stages.
    DriveBatch { batch_id: i64 },
    /// Merge the artifact at `location` into the relational model.
    MergeArtifact { location: String },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::DriveBatch { .. } => "drive_batch",
            Job::MergeArtifact { .. } => "merge_artifact",
        }
    }

    /// The drive job carries no policy of its own: stage retries happen
    /// inside the orchestrator, and a fatal fault must not rerun it.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        match self {
            Job::DriveBatch { .. } => None,
            Job::MergeArtifact { .. } => Some(RetryPolicy::merge_job()),
        }
    }
}

/// Last known state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Running,
    Completed,
    Failed,
    Terminated,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::Terminated => "terminated",
        }
    }
}

impl FromStr for ExecutionState {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionState::Running),
            "completed" => Ok(ExecutionState::Completed),
            "failed" => Ok(ExecutionState::Failed),
            "terminated" => Ok(ExecutionState::Terminated),
            other => Err(SchedulerError::UnknownState(other.to_string())),
        }
    }
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// This caller claimed the key and spawned the execution.
    Started,
    /// Another execution already owns the key; nothing was spawned.
    Attached,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown execution state '{0}'")]
    UnknownState(String),
}

/// Executes claimed jobs. The scheduler hands itself to the runner so jobs
/// can schedule follow-up work (the drive job fires the merge execution).
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, scheduler: Scheduler, job: Job) -> Result<(), PipelineError>;
}

/// Persisted, key-deduplicated execution registry with an in-process worker
/// pool.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    db: PgPool,
    queue: String,
    permits: Arc<Semaphore>,
    runner: Arc<dyn JobRunner>,
    tasks: Mutex<JoinSet<()>>,
}

impl Scheduler {
    pub fn new(
        db: PgPool,
        queue: impl Into<String>,
        worker_concurrency: usize,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                db,
                queue: queue.into(),
                permits: Arc::new(Semaphore::new(worker_concurrency)),
                runner,
                tasks: Mutex::new(JoinSet::new()),
            }),
        }
    }

    /// Claim `key` and spawn the execution, attach to a live or completed
    /// one, or restart a terminal-failed one in place.
    #[instrument(skip(self, job), fields(kind = job.kind()))]
    pub async fn start_or_attach(&self, key: &str, job: Job) -> Result<StartOutcome, SchedulerError> {
        let payload = serde_json::to_value(&job)?;

        let claimed = sqlx::query(
            "INSERT INTO pipeline_jobs (key, kind, payload) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(job.kind())
        .bind(&payload)
        .execute(&self.inner.db)
        .await?;

        if claimed.rows_affected() == 0 {
            // A duplicate start re-drives an execution that failed
            // terminally; anything else attaches without spawning.
            if self.restart_failed(key).await? {
                return Ok(StartOutcome::Started);
            }
            debug!(key, "execution already exists, attaching");
            return Ok(StartOutcome::Attached);
        }

        self.spawn(key.to_string(), job).await;
        Ok(StartOutcome::Started)
    }

    /// Last known state of the execution under `key`, if any.
    pub async fn describe(&self, key: &str) -> Result<Option<ExecutionState>, SchedulerError> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM pipeline_jobs WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.inner.db)
                .await?;

        state.map(|s| s.parse()).transpose()
    }

    /// Re-run a failed execution under its existing key, preserving its row
    /// and attempt history. No-op if the execution is not in `failed`.
    #[instrument(skip(self))]
    pub async fn retry(&self, key: &str) -> Result<(), SchedulerError> {
        if !self.restart_failed(key).await? {
            debug!(key, "retry requested but execution is not in failed state");
        }
        Ok(())
    }

    /// Flip a `failed` row back to `running` and re-spawn its persisted job.
    /// Returns false when the row is missing or not in `failed`.
    async fn restart_failed(&self, key: &str) -> Result<bool, SchedulerError> {
        let payload: Option<serde_json::Value> = sqlx::query_scalar(
            "UPDATE pipeline_jobs \
             SET state = 'running', last_error = NULL, updated_at = NOW() \
             WHERE key = $1 AND state = 'failed' \
             RETURNING payload",
        )
        .bind(key)
        .fetch_optional(&self.inner.db)
        .await?;

        let Some(payload) = payload else {
            return Ok(false);
        };

        let job: Job = serde_json::from_value(payload)?;
        info!(key, kind = job.kind(), "restarting failed execution");
        self.spawn(key.to_string(), job).await;
        Ok(true)
    }

    /// Re-spawn executions left `running` by a previous process. Called once
    /// at startup.
    pub async fn resume_incomplete(&self) -> Result<usize, SchedulerError> {
        let rows: Vec<(String, serde_json::Value)> =
            sqlx::query_as("SELECT key, payload FROM pipeline_jobs WHERE state = 'running'")
                .fetch_all(&self.inner.db)
                .await?;

        let count = rows.len();
        for (key, payload) in rows {
            let job: Job = serde_json::from_value(payload)?;
            warn!(key, kind = job.kind(), "resuming interrupted execution");
            self.spawn(key, job).await;
        }

        Ok(count)
    }

    /// Wait for all spawned executions to finish, including follow-up work
    /// they schedule while draining.
    pub async fn shutdown(&self) {
        loop {
            // The lock must not be held across the join: a draining job may
            // still need it to spawn follow-up executions.
            let mut draining = {
                let mut tasks = self.inner.tasks.lock().await;
                std::mem::take(&mut *tasks)
            };
            if draining.is_empty() {
                break;
            }
            while draining.join_next().await.is_some() {}
        }
        info!(queue = %self.inner.queue, "scheduler drained");
    }

    async fn spawn(&self, key: String, job: Job) {
        let scheduler = self.clone();
        let mut tasks = self.inner.tasks.lock().await;
        // Reap handles of executions that already finished.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move { scheduler.execute(key, job).await });
    }

    async fn execute(self, key: String, job: Job) {
        // Worker-pool bound: the task queues here until a worker is free.
        let _permit = match self.inner.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        info!(queue = %self.inner.queue, key, kind = job.kind(), "execution started");

        let mut attempt_op = || {
            let scheduler = self.clone();
            let key = key.clone();
            let job = job.clone();
            async move {
                scheduler.begin_attempt(&key).await?;
                scheduler.inner.runner.run(scheduler.clone(), job).await
            }
        };

        let result = match job.retry_policy() {
            Some(policy) => {
                match tokio::time::timeout(policy.total_timeout, policy.run(job.kind(), attempt_op))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::Timeout(policy.total_timeout)),
                }
            }
            None => attempt_op().await,
        };

        match result {
            Ok(()) => {
                info!(key, "execution completed");
                self.mark(&key, ExecutionState::Completed, None).await;
            }
            Err(e) => {
                error!(key, error = %e, "execution failed");
                self.mark(&key, ExecutionState::Failed, Some(e.to_string()))
                    .await;
            }
        }
    }

    async fn begin_attempt(&self, key: &str) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE pipeline_jobs SET attempts = attempts + 1, updated_at = NOW() \
             WHERE key = $1",
        )
        .bind(key)
        .execute(&self.inner.db)
        .await
        .map_err(SchedulerError::from)?;
        Ok(())
    }

    async fn mark(&self, key: &str, state: ExecutionState, last_error: Option<String>) {
        let result = sqlx::query(
            "UPDATE pipeline_jobs SET state = $2, last_error = $3, updated_at = NOW() \
             WHERE key = $1",
        )
        .bind(key)
        .bind(state.as_str())
        .bind(last_error)
        .execute(&self.inner.db)
        .await;

        if let Err(e) = result {
            error!(key, state = state.as_str(), error = %e, "failed to record execution state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingRunner {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run(&self, _scheduler: Scheduler, _job: Job) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PipelineError::Storage(anyhow::anyhow!("boom")))
            } else {
                Ok(())
            }
        }
    }

    async fn await_state(scheduler: &Scheduler, key: &str, wanted: ExecutionState) {
        for _ in 0..200 {
            if scheduler.describe(key).await.unwrap() == Some(wanted) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution '{}' never reached {:?}", key, wanted);
    }

    #[test]
    fn job_payload_round_trips() {
        let job = Job::MergeArtifact {
            location: "s3://bucket/ingestions/batch_1.csv".to_string(),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["kind"], "merge_artifact");
        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn drive_job_has_no_outer_retry() {
        assert!(Job::DriveBatch { batch_id: 1 }.retry_policy().is_none());
        assert!(Job::MergeArtifact {
            location: "s3://b/k".to_string()
        }
        .retry_policy()
        .is_some());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn duplicate_start_attaches(pool: PgPool) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(CountingRunner {
            calls: calls.clone(),
            fail: false,
        });
        let scheduler = Scheduler::new(pool.clone(), "test-queue", 2, runner);

        let job = Job::DriveBatch { batch_id: 1 };
        let first = scheduler.start_or_attach("k1", job.clone()).await.unwrap();
        let second = scheduler.start_or_attach("k1", job).await.unwrap();

        assert_eq!(first, StartOutcome::Started);
        assert_eq!(second, StartOutcome::Attached);

        await_state(&scheduler, "k1", ExecutionState::Completed).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pipeline_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn describe_unknown_key_is_none(pool: PgPool) {
        let runner = Arc::new(CountingRunner {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        });
        let scheduler = Scheduler::new(pool, "test-queue", 1, runner);

        assert_eq!(scheduler.describe("missing").await.unwrap(), None);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn failed_execution_is_retriable_in_place(pool: PgPool) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(CountingRunner {
            calls: calls.clone(),
            fail: true,
        });
        let scheduler = Scheduler::new(pool.clone(), "test-queue", 1, runner);

        let job = Job::DriveBatch { batch_id: 7 };
        scheduler.start_or_attach("k7", job).await.unwrap();
        await_state(&scheduler, "k7", ExecutionState::Failed).await;
        let after_first = calls.load(Ordering::SeqCst);
        assert_eq!(after_first, 1);

        scheduler.retry("k7").await.unwrap();
        await_state(&scheduler, "k7", ExecutionState::Failed).await;
        assert!(calls.load(Ordering::SeqCst) > after_first);

        // Still one logical execution.
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pipeline_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn duplicate_start_restarts_failed_execution(pool: PgPool) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(CountingRunner {
            calls: calls.clone(),
            fail: false,
        });
        let scheduler = Scheduler::new(pool.clone(), "test-queue", 1, runner);

        // An execution a previous run drove to terminal failure.
        sqlx::query(
            "INSERT INTO pipeline_jobs (key, kind, payload, state, last_error) \
             VALUES ('k5', 'drive_batch', '{\"kind\":\"drive_batch\",\"batch_id\":5}', \
                     'failed', 'bucket offline')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let outcome = scheduler
            .start_or_attach("k5", Job::DriveBatch { batch_id: 5 })
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::Started);

        await_state(&scheduler, "k5", ExecutionState::Completed).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Restarted in place: same row, cleared error.
        let (rows, last_error): (i64, Option<String>) = sqlx::query_as(
            "SELECT COUNT(*), MAX(last_error) FROM pipeline_jobs",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(last_error, None);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn retry_of_completed_execution_is_noop(pool: PgPool) {
        let runner = Arc::new(CountingRunner {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        });
        let scheduler = Scheduler::new(pool.clone(), "test-queue", 1, runner);

        sqlx::query(
            "INSERT INTO pipeline_jobs (key, kind, payload, state) \
             VALUES ('k9', 'drive_batch', '{\"kind\":\"drive_batch\",\"batch_id\":9}', 'completed')",
        )
        .execute(&pool)
        .await
        .unwrap();

        scheduler.retry("k9").await.unwrap();
        assert_eq!(
            scheduler.describe("k9").await.unwrap(),
            Some(ExecutionState::Completed)
        );
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn resume_respawns_running_jobs(pool: PgPool) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(CountingRunner {
            calls: calls.clone(),
            fail: false,
        });
        let scheduler = Scheduler::new(pool.clone(), "test-queue", 1, runner);

        // A job a previous process left behind mid-flight.
        sqlx::query(
            "INSERT INTO pipeline_jobs (key, kind, payload, state) \
             VALUES ('k3', 'drive_batch', '{\"kind\":\"drive_batch\",\"batch_id\":3}', 'running')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let resumed = scheduler.resume_incomplete().await.unwrap();
        assert_eq!(resumed, 1);

        await_state(&scheduler, "k3", ExecutionState::Completed).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Schedules a follow-up merge execution from inside a drive job, the
    /// way the pipeline runner does.
    struct ChainingRunner {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobRunner for ChainingRunner {
        async fn run(&self, scheduler: Scheduler, job: Job) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Job::DriveBatch { batch_id } = job {
                tokio::time::sleep(Duration::from_millis(200)).await;
                scheduler
                    .start_or_attach(
                        &format!("merge-{}", batch_id),
                        Job::MergeArtifact {
                            location: format!("s3://bucket/ingestions/batch_{}.csv", batch_id),
                        },
                    )
                    .await?;
            }
            Ok(())
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn shutdown_drains_follow_up_executions(pool: PgPool) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(ChainingRunner {
            calls: calls.clone(),
        });
        let scheduler = Scheduler::new(pool.clone(), "test-queue", 2, runner);

        scheduler
            .start_or_attach("drive-1", Job::DriveBatch { batch_id: 1 })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
            .await
            .expect("shutdown must not hang while a job schedules follow-up work");

        // Both the drive job and the merge it scheduled ran to completion.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            scheduler.describe("merge-1").await.unwrap(),
            Some(ExecutionState::Completed)
        );
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn finished_handles_are_reaped_on_spawn(pool: PgPool) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(CountingRunner {
            calls: calls.clone(),
            fail: false,
        });
        let scheduler = Scheduler::new(pool.clone(), "test-queue", 4, runner);

        for n in 0..5i64 {
            scheduler
                .start_or_attach(&format!("k{}", n), Job::DriveBatch { batch_id: n })
                .await
                .unwrap();
        }
        for n in 0..5 {
            await_state(&scheduler, &format!("k{}", n), ExecutionState::Completed).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        scheduler
            .start_or_attach("k-final", Job::DriveBatch { batch_id: 99 })
            .await
            .unwrap();
        await_state(&scheduler, "k-final", ExecutionState::Completed).await;

        // Spawning k-final reaped the five finished handles.
        assert!(scheduler.inner.tasks.lock().await.len() <= 2);
    }
}
