//! Get patient query

use sqlx::PgPool;

use crate::models::PatientRecord;

/// Query to fetch one patient by MRN
#[derive(Debug, Clone)]
pub struct GetPatientQuery {
    pub mrn: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GetPatientError {
    #[error("patient with MRN '{0}' not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[tracing::instrument(skip(pool), fields(mrn = %query.mrn))]
pub async fn handle(pool: PgPool, query: GetPatientQuery) -> Result<PatientRecord, GetPatientError> {
    sqlx::query_as::<_, PatientRecord>(
        "SELECT p.id, p.mrn, d.first_name, d.last_name, d.birth_date, p.created_at \
         FROM patients p \
         JOIN demographic_records d ON d.id = p.id \
         WHERE p.mrn = $1",
    )
    .bind(&query.mrn)
    .fetch_optional(&pool)
    .await?
    .ok_or(GetPatientError::NotFound(query.mrn))
}
