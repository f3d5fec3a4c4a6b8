//! The durable ingestion pipeline
//!
//! A batch moves through `new -> converted -> uploaded -> processed`. Every
//! activity re-reads persisted status before acting, so the pipeline can be
//! re-driven at any point (crash, duplicate trigger, operator retry) without
//! repeating completed stages or double-writing.
//!
//! - [`fingerprint`]: content identity for submission dedup and trigger keys
//! - [`artifact`]: CSV rendering and parsing of the batch artifact
//! - [`activities`]: the four stage activities (inspect, produce, publish,
//!   merge)
//! - [`merge`]: the relational merge engine (coalesce demographics,
//!   first-write-wins visits)
//! - [`orchestrator`]: the stage state machine with per-stage retry policies
//! - [`trigger`]: the artifact-keyed secondary trigger for the merge run
//! - [`retry`]: bounded exponential backoff

use crate::models::UnknownStatus;
use crate::scheduler::{Job, JobRunner, Scheduler};
use async_trait::async_trait;
use thiserror::Error;

pub mod activities;
pub mod artifact;
pub mod fingerprint;
pub mod merge;
pub mod orchestrator;
pub mod retry;
pub mod trigger;

pub use activities::{Activities, BatchSnapshot};
pub use orchestrator::Orchestrator;
pub use retry::RetryPolicy;

/// Executes scheduled jobs against the pipeline.
pub struct PipelineRunner {
    activities: Activities,
}

impl PipelineRunner {
    pub fn new(activities: Activities) -> Self {
        Self { activities }
    }
}

#[async_trait]
impl JobRunner for PipelineRunner {
    async fn run(&self, scheduler: Scheduler, job: Job) -> Result<(), PipelineError> {
        match job {
            Job::DriveBatch { batch_id } => Orchestrator::new(self.activities.clone(), scheduler)
                .drive(batch_id)
                .await
                .map(|_| ()),
            Job::MergeArtifact { location } => self
                .activities
                .merge_artifact(&location)
                .await
                .map(|_| ()),
        }
    }
}

/// Fault taxonomy for pipeline stages.
///
/// `NotFound` and `UnexpectedStatus` are fatal: they signal a caller or data
/// bug and abort the orchestration with no retry. Everything else is treated
/// as transient and retried per the stage's [`RetryPolicy`]; a failed merge
/// rolls back the whole artifact transaction and reruns from scratch.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("batch {0} not found")]
    NotFound(i64),

    #[error("batch {batch_id} has unsupported status '{status}'")]
    UnexpectedStatus { batch_id: i64, status: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact error: {0}")]
    Artifact(#[from] artifact::ArtifactError),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] crate::scheduler::SchedulerError),

    #[error("execution timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl PipelineError {
    pub fn unexpected_status(batch_id: i64, err: UnknownStatus) -> Self {
        PipelineError::UnexpectedStatus {
            batch_id,
            status: err.0,
        }
    }

    /// Fatal faults abort the orchestration immediately, bypassing retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::NotFound(_) | PipelineError::UnexpectedStatus { .. }
        )
    }
}
