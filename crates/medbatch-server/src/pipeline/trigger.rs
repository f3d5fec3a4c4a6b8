//! Secondary merge trigger
//!
//! Fires the relational merge for an uploaded artifact. The execution key is
//! the fingerprint of the artifact's storage location, so repeated triggering
//! for the same artifact collapses to one logical execution:
//!
//! - completed / running / terminated: nothing to do
//! - failed: retry the existing execution in place, preserving its identity
//! - unknown: start a fresh execution

use super::fingerprint;
use super::PipelineError;
use crate::scheduler::{ExecutionState, Job, Scheduler};
use tracing::{debug, instrument};

#[instrument(skip(scheduler))]
pub async fn fire_merge(scheduler: &Scheduler, location: &str) -> Result<(), PipelineError> {
    let key = fingerprint::location_key(location);

    match scheduler.describe(&key).await? {
        Some(ExecutionState::Completed)
        | Some(ExecutionState::Running)
        | Some(ExecutionState::Terminated) => {
            debug!(location, key, "merge execution already settled, no-op");
            Ok(())
        }
        Some(ExecutionState::Failed) => {
            debug!(location, key, "merge execution failed, requesting retry");
            scheduler.retry(&key).await?;
            Ok(())
        }
        None => {
            scheduler
                .start_or_attach(
                    &key,
                    Job::MergeArtifact {
                        location: location.to_string(),
                    },
                )
                .await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::scheduler::JobRunner;
    use sqlx::PgPool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const LOCATION: &str = "s3://medbatch-artifacts/ingestions/batch_1.csv";

    struct RecordingRunner {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl JobRunner for RecordingRunner {
        async fn run(&self, _scheduler: Scheduler, _job: Job) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PipelineError::Storage(anyhow::anyhow!("bucket offline")))
            } else {
                Ok(())
            }
        }
    }

    async fn await_state(scheduler: &Scheduler, key: &str, wanted: ExecutionState) {
        for _ in 0..150 {
            if scheduler.describe(key).await.unwrap() == Some(wanted) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("execution '{}' never reached {:?}", key, wanted);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn double_trigger_converges_to_one_execution(pool: PgPool) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(RecordingRunner {
            calls: calls.clone(),
            fail: false,
        });
        let scheduler = Scheduler::new(pool.clone(), "test-queue", 2, runner);

        fire_merge(&scheduler, LOCATION).await.unwrap();
        fire_merge(&scheduler, LOCATION).await.unwrap();

        let key = fingerprint::location_key(LOCATION);
        await_state(&scheduler, &key, ExecutionState::Completed).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pipeline_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn trigger_after_completion_is_noop(pool: PgPool) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(RecordingRunner {
            calls: calls.clone(),
            fail: false,
        });
        let scheduler = Scheduler::new(pool, "test-queue", 1, runner);
        let key = fingerprint::location_key(LOCATION);

        fire_merge(&scheduler, LOCATION).await.unwrap();
        await_state(&scheduler, &key, ExecutionState::Completed).await;

        fire_merge(&scheduler, LOCATION).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            scheduler.describe(&key).await.unwrap(),
            Some(ExecutionState::Completed)
        );
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn trigger_after_failure_retries_same_execution(pool: PgPool) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(RecordingRunner {
            calls: calls.clone(),
            fail: true,
        });
        let scheduler = Scheduler::new(pool.clone(), "test-queue", 1, runner);
        let key = fingerprint::location_key(LOCATION);

        fire_merge(&scheduler, LOCATION).await.unwrap();
        await_state(&scheduler, &key, ExecutionState::Failed).await;
        let after_first = calls.load(Ordering::SeqCst);

        fire_merge(&scheduler, LOCATION).await.unwrap();
        await_state(&scheduler, &key, ExecutionState::Failed).await;
        assert!(calls.load(Ordering::SeqCst) > after_first);

        // Retried in place: still exactly one logical execution.
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pipeline_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
