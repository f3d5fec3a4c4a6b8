use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use sqlx::PgPool;

use super::queries::{GetPatientError, GetPatientQuery, ListPatientsQuery, ListVisitsError, ListVisitsQuery};
use crate::error::{AppError, AppResult};
use crate::models::{PatientRecord, Visit};

pub fn patients_routes() -> Router<PgPool> {
    Router::new()
        .route("/", get(list_patients))
        .route("/:mrn", get(get_patient))
        .route("/:mrn/visits", get(list_visits))
}

#[tracing::instrument(skip(pool))]
async fn list_patients(
    State(pool): State<PgPool>,
    Query(query): Query<ListPatientsQuery>,
) -> AppResult<Json<Vec<PatientRecord>>> {
    let patients = super::queries::list_patients::handle(pool, query).await?;
    Ok(Json(patients))
}

#[tracing::instrument(skip(pool), fields(mrn = %mrn))]
async fn get_patient(
    State(pool): State<PgPool>,
    Path(mrn): Path<String>,
) -> AppResult<Json<PatientRecord>> {
    let patient = super::queries::get_patient::handle(pool, GetPatientQuery { mrn }).await?;
    Ok(Json(patient))
}

#[tracing::instrument(skip(pool), fields(mrn = %mrn))]
async fn list_visits(
    State(pool): State<PgPool>,
    Path(mrn): Path<String>,
) -> AppResult<Json<Vec<Visit>>> {
    let visits = super::queries::list_visits::handle(pool, ListVisitsQuery { mrn }).await?;
    Ok(Json(visits))
}

impl From<GetPatientError> for AppError {
    fn from(err: GetPatientError) -> Self {
        match err {
            GetPatientError::NotFound(_) => AppError::NotFound(err.to_string()),
            GetPatientError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<ListVisitsError> for AppError {
    fn from(err: ListVisitsError) -> Self {
        match err {
            ListVisitsError::PatientNotFound(_) => AppError::NotFound(err.to_string()),
            ListVisitsError::Database(e) => AppError::Database(e),
        }
    }
}
