//! Submit batch command
//!
//! Registers a batch of patient-visit line items for pipeline processing.
//! Identity is the MD5 fingerprint of the canonicalized payload, so
//! resubmitting the same items returns the original batch instead of
//! creating a second one. The insert uses `ON CONFLICT DO NOTHING` so two
//! concurrent identical submissions also converge on one row.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::models::LineItem;
use crate::pipeline::fingerprint;

/// Command to submit a batch of line items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBatchCommand {
    pub items: Vec<LineItem>,
}

/// Whether the submission created a new batch or matched an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Created,
    Existing,
}

/// Response from submitting a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBatchResponse {
    pub id: i64,
    pub status: SubmissionStatus,
}

/// Errors that can occur when submitting a batch
#[derive(Debug, thiserror::Error)]
pub enum SubmitBatchError {
    /// The submission carried no line items
    #[error("batch must contain at least one line item")]
    EmptyBatch,
    /// The payload could not be persisted as JSON
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A database error occurred
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl SubmitBatchCommand {
    pub fn validate(&self) -> Result<(), SubmitBatchError> {
        if self.items.is_empty() {
            return Err(SubmitBatchError::EmptyBatch);
        }
        Ok(())
    }
}

/// Handles the submit batch command
///
/// Fingerprints the payload, returns the existing batch when one carries the
/// same fingerprint, and otherwise inserts a fresh `new` batch.
#[tracing::instrument(skip(pool, command), fields(items = command.items.len()))]
pub async fn handle(
    pool: PgPool,
    command: SubmitBatchCommand,
) -> Result<SubmitBatchResponse, SubmitBatchError> {
    command.validate()?;

    let hash = fingerprint::content_hash(&command.items);

    if let Some(id) = find_by_hash(&pool, &hash).await? {
        tracing::debug!(batch_id = id, "submission matched existing batch");
        return Ok(SubmitBatchResponse {
            id,
            status: SubmissionStatus::Existing,
        });
    }

    let raw_items = serde_json::to_value(&command.items)?;

    let inserted: Option<i64> = sqlx::query_scalar(
        "INSERT INTO ingestion_batches (content_hash, raw_items) VALUES ($1, $2) \
         ON CONFLICT (content_hash) DO NOTHING RETURNING id",
    )
    .bind(&hash)
    .bind(&raw_items)
    .fetch_optional(&pool)
    .await?;

    match inserted {
        Some(id) => Ok(SubmitBatchResponse {
            id,
            status: SubmissionStatus::Created,
        }),
        None => {
            // Lost the race to an identical concurrent submission; the row
            // that won the conflict is the batch we wanted.
            let id = find_by_hash(&pool, &hash)
                .await?
                .ok_or(SubmitBatchError::Database(sqlx::Error::RowNotFound))?;
            Ok(SubmitBatchResponse {
                id,
                status: SubmissionStatus::Existing,
            })
        }
    }
}

async fn find_by_hash(pool: &PgPool, hash: &str) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM ingestion_batches WHERE content_hash = $1")
        .bind(hash)
        .fetch_optional(pool)
        .await
}
