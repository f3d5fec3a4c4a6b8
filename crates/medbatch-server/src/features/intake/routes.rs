use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

use super::commands::{SubmissionStatus, SubmitBatchCommand, SubmitBatchError, SubmitBatchResponse};
use crate::error::{AppError, AppResult};
use crate::features::FeatureState;
use crate::scheduler::Job;

pub fn intake_routes() -> Router<FeatureState> {
    Router::new().route("/", post(submit_batch))
}

#[tracing::instrument(skip(state, command), fields(items = command.items.len()))]
async fn submit_batch(
    State(state): State<FeatureState>,
    Json(command): Json<SubmitBatchCommand>,
) -> AppResult<(StatusCode, Json<SubmitBatchResponse>)> {
    let response = super::commands::submit_batch::handle(state.db.clone(), command).await?;

    // The drive execution is keyed by batch id, so resubmissions attach to
    // the run already in flight instead of starting a second one.
    state
        .scheduler
        .start_or_attach(
            &format!("ingest-{}", response.id),
            Job::DriveBatch {
                batch_id: response.id,
            },
        )
        .await
        .map_err(|e| AppError::Internal(format!("failed to enqueue pipeline: {}", e)))?;

    tracing::info!(
        batch_id = response.id,
        status = ?response.status,
        "batch submission accepted"
    );

    let code = match response.status {
        SubmissionStatus::Created => StatusCode::CREATED,
        SubmissionStatus::Existing => StatusCode::OK,
    };
    Ok((code, Json(response)))
}

impl From<SubmitBatchError> for AppError {
    fn from(err: SubmitBatchError) -> Self {
        match err {
            SubmitBatchError::EmptyBatch => AppError::Validation(err.to_string()),
            SubmitBatchError::Serialization(e) => AppError::Internal(e.to_string()),
            SubmitBatchError::Database(e) => AppError::Database(e),
        }
    }
}
