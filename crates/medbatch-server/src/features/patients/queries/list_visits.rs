//! List visits query

use sqlx::PgPool;

use crate::models::Visit;

/// Query to list one patient's visits, oldest first
#[derive(Debug, Clone)]
pub struct ListVisitsQuery {
    pub mrn: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ListVisitsError {
    #[error("patient with MRN '{0}' not found")]
    PatientNotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[tracing::instrument(skip(pool), fields(mrn = %query.mrn))]
pub async fn handle(pool: PgPool, query: ListVisitsQuery) -> Result<Vec<Visit>, ListVisitsError> {
    let patient_id: Option<i64> = sqlx::query_scalar("SELECT id FROM patients WHERE mrn = $1")
        .bind(&query.mrn)
        .fetch_optional(&pool)
        .await?;

    let patient_id = patient_id.ok_or(ListVisitsError::PatientNotFound(query.mrn))?;

    let visits = sqlx::query_as::<_, Visit>(
        "SELECT id, visit_account_number, patient_id, visit_date, reason \
         FROM visits WHERE patient_id = $1 \
         ORDER BY visit_date, id",
    )
    .bind(patient_id)
    .fetch_all(&pool)
    .await?;

    Ok(visits)
}
