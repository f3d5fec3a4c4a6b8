//! Stage activities
//!
//! The four atomic pipeline operations. Each one re-reads persisted batch
//! status before acting and no-ops when its precondition is unmet, which is
//! what makes the orchestrator safe to re-invoke after a crash or duplicate
//! trigger. No activity holds a database transaction across an await into
//! storage; a connection is used per statement, and only the merge engine
//! opens a wider transaction (bounded to one artifact).

use super::artifact;
use super::merge::{self, MergeOutcome};
use super::PipelineError;
use crate::models::{BatchStatus, LineItem};
use crate::storage::Storage;
use sqlx::PgPool;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

/// Current persisted view of a batch.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub status: BatchStatus,
    pub artifact_name: Option<String>,
    pub artifact_location: Option<String>,
}

/// The pipeline's stage activities, bound to their storage backends.
#[derive(Clone)]
pub struct Activities {
    db: PgPool,
    storage: Storage,
    staging_dir: PathBuf,
}

impl Activities {
    pub fn new(db: PgPool, storage: Storage, staging_dir: PathBuf) -> Self {
        Self {
            db,
            storage,
            staging_dir,
        }
    }

    pub fn db(&self) -> &PgPool {
        &self.db
    }

    /// Read-only status inspection.
    #[instrument(skip(self))]
    pub async fn inspect(&self, batch_id: i64) -> Result<BatchSnapshot, PipelineError> {
        let row: Option<(String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT status, artifact_name, artifact_location \
             FROM ingestion_batches WHERE id = $1",
        )
        .bind(batch_id)
        .fetch_optional(&self.db)
        .await?;

        let (status_text, artifact_name, artifact_location) =
            row.ok_or(PipelineError::NotFound(batch_id))?;

        let status = status_text
            .parse::<BatchStatus>()
            .map_err(|e| PipelineError::unexpected_status(batch_id, e))?;

        Ok(BatchSnapshot {
            status,
            artifact_name,
            artifact_location,
        })
    }

    /// Render the batch's raw items into a staged CSV artifact and advance
    /// `new -> converted`. No-op (returning current status) when the batch
    /// has already moved on.
    #[instrument(skip(self))]
    pub async fn produce_artifact(&self, batch_id: i64) -> Result<BatchStatus, PipelineError> {
        let row: Option<(String, serde_json::Value)> = sqlx::query_as(
            "SELECT status, raw_items FROM ingestion_batches WHERE id = $1",
        )
        .bind(batch_id)
        .fetch_optional(&self.db)
        .await?;

        let (status_text, raw_items) = row.ok_or(PipelineError::NotFound(batch_id))?;
        let status = status_text
            .parse::<BatchStatus>()
            .map_err(|e| PipelineError::unexpected_status(batch_id, e))?;

        if status != BatchStatus::New {
            debug!(batch_id, %status, "produce_artifact precondition unmet, no-op");
            return Ok(status);
        }

        let items: Vec<LineItem> = serde_json::from_value(raw_items)
            .map_err(|e| PipelineError::InvalidData(format!("batch payload: {}", e)))?;

        let bytes = artifact::render(&items)?;
        let artifact_name = format!("batch_{}.csv", batch_id);

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        tokio::fs::write(self.staging_dir.join(&artifact_name), &bytes).await?;

        // Guarded update: a concurrent invocation that already advanced the
        // batch leaves nothing for this one to do.
        sqlx::query(
            "UPDATE ingestion_batches SET status = 'converted', artifact_name = $2 \
             WHERE id = $1 AND status = 'new'",
        )
        .bind(batch_id)
        .bind(&artifact_name)
        .execute(&self.db)
        .await?;

        info!(batch_id, artifact_name, "artifact rendered and staged");
        Ok(BatchStatus::Converted)
    }

    /// Upload the staged artifact to blob storage and advance
    /// `converted -> uploaded`. No-op when the precondition is unmet.
    #[instrument(skip(self))]
    pub async fn publish_artifact(&self, batch_id: i64) -> Result<BatchStatus, PipelineError> {
        let snapshot = self.inspect(batch_id).await?;

        if snapshot.status != BatchStatus::Converted {
            debug!(batch_id, status = %snapshot.status, "publish_artifact precondition unmet, no-op");
            return Ok(snapshot.status);
        }

        let artifact_name = snapshot.artifact_name.ok_or_else(|| {
            PipelineError::InvalidData(format!("batch {} has no artifact name recorded", batch_id))
        })?;

        let bytes = tokio::fs::read(self.staging_dir.join(&artifact_name)).await?;
        let key = format!("ingestions/{}", artifact_name);
        let location = self
            .storage
            .put_artifact(&key, bytes)
            .await
            .map_err(PipelineError::Storage)?;

        sqlx::query(
            "UPDATE ingestion_batches SET status = 'uploaded', artifact_location = $2 \
             WHERE id = $1 AND status = 'converted'",
        )
        .bind(batch_id)
        .bind(&location)
        .execute(&self.db)
        .await?;

        info!(batch_id, location, "artifact published");
        Ok(BatchStatus::Uploaded)
    }

    /// Download the artifact, merge it relationally as one transaction, and
    /// mark the owning batch `processed`.
    #[instrument(skip(self))]
    pub async fn merge_artifact(&self, location: &str) -> Result<MergeOutcome, PipelineError> {
        let bytes = self
            .storage
            .get_artifact(location)
            .await
            .map_err(PipelineError::Storage)?;

        let rows = artifact::parse(&bytes)?;
        let outcome = merge::merge_rows(&self.db, &rows).await?;

        // Merge completion is tracked by the secondary run, not the
        // orchestrator; the guard keeps a replayed merge from regressing
        // anything.
        sqlx::query(
            "UPDATE ingestion_batches SET status = 'processed' \
             WHERE artifact_location = $1 AND status = 'uploaded'",
        )
        .bind(location)
        .execute(&self.db)
        .await?;

        info!(
            location,
            rows = outcome.rows_merged,
            patients_created = outcome.patients_created,
            visits_inserted = outcome.visits_inserted,
            "artifact merged"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::config::StorageConfig;
    use chrono::NaiveDate;

    async fn test_activities(pool: PgPool, staging: &std::path::Path) -> Activities {
        // The client is never exercised by these tests; construction does not
        // touch the network.
        let storage = Storage::new(StorageConfig::for_minio("http://127.0.0.1:9000", "test"))
            .await
            .unwrap();
        Activities::new(pool, storage, staging.to_path_buf())
    }

    fn items_json() -> serde_json::Value {
        serde_json::to_value(vec![LineItem {
            mrn: "M1".to_string(),
            first_name: "Ann".to_string(),
            last_name: "Lee".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            visit_account_number: "V100".to_string(),
            visit_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            reason: "checkup".to_string(),
        }])
        .unwrap()
    }

    async fn insert_batch(pool: &PgPool, status: &str) -> i64 {
        sqlx::query_scalar(
            "INSERT INTO ingestion_batches (content_hash, raw_items, status) \
             VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(format!("hash-{}", status))
        .bind(items_json())
        .bind(status)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn inspect_unknown_batch_is_not_found(pool: PgPool) {
        let staging = tempfile::tempdir().unwrap();
        let activities = test_activities(pool, staging.path()).await;

        let result = activities.inspect(424242).await;
        assert!(matches!(result, Err(PipelineError::NotFound(424242))));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn inspect_surfaces_unexpected_status(pool: PgPool) {
        let staging = tempfile::tempdir().unwrap();
        let batch_id = insert_batch(&pool, "archived").await;
        let activities = test_activities(pool, staging.path()).await;

        let result = activities.inspect(batch_id).await;
        assert!(matches!(
            result,
            Err(PipelineError::UnexpectedStatus { .. })
        ));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn produce_renders_and_advances(pool: PgPool) {
        let staging = tempfile::tempdir().unwrap();
        let batch_id = insert_batch(&pool, "new").await;
        let activities = test_activities(pool.clone(), staging.path()).await;

        let status = activities.produce_artifact(batch_id).await.unwrap();
        assert_eq!(status, BatchStatus::Converted);

        let staged = staging.path().join(format!("batch_{}.csv", batch_id));
        let text = std::fs::read_to_string(staged).unwrap();
        assert!(text.starts_with("mrn,first_name,last_name,birth_date"));
        assert!(text.contains("M1,Ann,Lee,1990-01-01,V100,2024-01-05,checkup"));

        let snapshot = activities.inspect(batch_id).await.unwrap();
        assert_eq!(snapshot.status, BatchStatus::Converted);
        assert_eq!(
            snapshot.artifact_name.as_deref(),
            Some(format!("batch_{}.csv", batch_id).as_str())
        );
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn produce_is_noop_after_completion(pool: PgPool) {
        let staging = tempfile::tempdir().unwrap();
        let batch_id = insert_batch(&pool, "converted").await;
        let activities = test_activities(pool, staging.path()).await;

        let status = activities.produce_artifact(batch_id).await.unwrap();
        assert_eq!(status, BatchStatus::Converted);

        // The precondition no-op never rendered anything.
        assert!(!staging
            .path()
            .join(format!("batch_{}.csv", batch_id))
            .exists());
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn publish_is_noop_before_conversion(pool: PgPool) {
        let staging = tempfile::tempdir().unwrap();
        let batch_id = insert_batch(&pool, "new").await;
        let activities = test_activities(pool, staging.path()).await;

        let status = activities.publish_artifact(batch_id).await.unwrap();
        assert_eq!(status, BatchStatus::New);
    }
}
