//! Pipeline orchestrator
//!
//! Drives a batch through its remaining stages. The loop re-derives "what's
//! left to do" from freshly-read persisted status on every step rather than
//! trusting any in-memory copy, so a crashed or duplicated orchestration
//! converges instead of repeating completed stages. The status match is
//! exhaustive over [`BatchStatus`]; unknown persisted text already failed
//! parsing inside `inspect` as a fatal UnexpectedStatus fault.

use super::activities::Activities;
use super::retry::RetryPolicy;
use super::{trigger, PipelineError};
use crate::models::BatchStatus;
use crate::scheduler::Scheduler;
use tracing::{info, instrument};

pub struct Orchestrator {
    activities: Activities,
    scheduler: Scheduler,
}

impl Orchestrator {
    pub fn new(activities: Activities, scheduler: Scheduler) -> Self {
        Self {
            activities,
            scheduler,
        }
    }

    /// Drive `batch_id` through its remaining stages. Re-entrant at any
    /// point in the lifecycle.
    #[instrument(skip(self))]
    pub async fn drive(&self, batch_id: i64) -> Result<BatchStatus, PipelineError> {
        let inspect = RetryPolicy::read_only();
        let mutate = RetryPolicy::mutating();

        let mut snapshot = inspect
            .run("inspect", || self.activities.inspect(batch_id))
            .await?;

        loop {
            match snapshot.status {
                BatchStatus::New => {
                    mutate
                        .run("produce_artifact", || {
                            self.activities.produce_artifact(batch_id)
                        })
                        .await?;
                    snapshot = inspect
                        .run("inspect", || self.activities.inspect(batch_id))
                        .await?;
                }
                BatchStatus::Converted => {
                    mutate
                        .run("publish_artifact", || {
                            self.activities.publish_artifact(batch_id)
                        })
                        .await?;
                    snapshot = inspect
                        .run("inspect", || self.activities.inspect(batch_id))
                        .await?;
                }
                BatchStatus::Uploaded => {
                    let location = snapshot.artifact_location.ok_or_else(|| {
                        PipelineError::InvalidData(format!(
                            "batch {} is uploaded but has no artifact location",
                            batch_id
                        ))
                    })?;

                    // Merge completion is tracked by the location-keyed
                    // secondary execution, not by this orchestration.
                    trigger::fire_merge(&self.scheduler, &location).await?;

                    info!(batch_id, location, "pipeline handed off to merge execution");
                    return Ok(BatchStatus::Uploaded);
                }
                BatchStatus::Processed => {
                    info!(batch_id, "batch already processed, nothing to drive");
                    return Ok(BatchStatus::Processed);
                }
            }
        }
    }
}
