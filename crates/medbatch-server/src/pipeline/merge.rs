//! Relational merge engine
//!
//! Folds a parsed artifact into the patient/visit model inside a single
//! transaction: either every row's effects commit or none do. The writes are
//! idempotent, so replaying the same artifact produces no extra rows and no
//! field drift beyond the coalesce rule:
//!
//! - demographics: coalesce on non-empty (an empty incoming field never
//!   erases a stored value)
//! - visits: first-write-wins on `visit_account_number`
//! - patient identity: allocated once per `mrn`, never re-keyed

use super::artifact::ArtifactRow;
use super::PipelineError;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

/// Counters from one merge run, for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub rows_merged: usize,
    pub patients_created: usize,
    pub visits_inserted: usize,
}

/// Merge artifact rows into patients, demographics, and visits.
#[instrument(skip(db, rows), fields(row_count = rows.len()))]
pub async fn merge_rows(db: &PgPool, rows: &[ArtifactRow]) -> Result<MergeOutcome, PipelineError> {
    let mut tx = db.begin().await?;
    let mut outcome = MergeOutcome::default();

    for (index, row) in rows.iter().enumerate() {
        merge_row(&mut tx, row, &mut outcome)
            .await
            .map_err(|e| match e {
                PipelineError::InvalidData(message) => {
                    PipelineError::InvalidData(format!("row {}: {}", index + 1, message))
                }
                other => other,
            })?;
        outcome.rows_merged += 1;
    }

    tx.commit().await?;

    debug!(
        rows = outcome.rows_merged,
        patients_created = outcome.patients_created,
        visits_inserted = outcome.visits_inserted,
        "merge committed"
    );

    Ok(outcome)
}

async fn merge_row(
    tx: &mut Transaction<'_, Postgres>,
    row: &ArtifactRow,
    outcome: &mut MergeOutcome,
) -> Result<(), PipelineError> {
    let mrn = row.mrn.trim();
    if mrn.is_empty() {
        return Err(PipelineError::InvalidData("empty mrn".to_string()));
    }

    let account = row.visit_account_number.trim();
    if account.is_empty() {
        return Err(PipelineError::InvalidData(
            "empty visit_account_number".to_string(),
        ));
    }

    let birth_date = parse_date(&row.birth_date)?;
    let visit_date = parse_date(&row.visit_date)?
        .ok_or_else(|| PipelineError::InvalidData("empty visit_date".to_string()))?;

    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM patients WHERE mrn = $1")
        .bind(mrn)
        .fetch_optional(&mut **tx)
        .await?;

    let patient_id = match existing {
        Some(id) => {
            // Coalesce on non-empty: NULL bindings leave stored values alone.
            sqlx::query(
                r#"
                INSERT INTO demographic_records (id, first_name, last_name, birth_date)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO UPDATE SET
                    first_name = COALESCE(EXCLUDED.first_name, demographic_records.first_name),
                    last_name = COALESCE(EXCLUDED.last_name, demographic_records.last_name),
                    birth_date = COALESCE(EXCLUDED.birth_date, demographic_records.birth_date)
                "#,
            )
            .bind(id)
            .bind(non_empty(&row.first_name))
            .bind(non_empty(&row.last_name))
            .bind(birth_date)
            .execute(&mut **tx)
            .await?;
            id
        }
        None => {
            let id: i64 = sqlx::query_scalar("SELECT nextval('patient_id_seq')")
                .fetch_one(&mut **tx)
                .await?;

            // The demographic row must exist before the patient row
            // (patients.id references demographic_records.id).
            sqlx::query(
                "INSERT INTO demographic_records (id, first_name, last_name, birth_date) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(id)
            .bind(non_empty(&row.first_name))
            .bind(non_empty(&row.last_name))
            .bind(birth_date)
            .execute(&mut **tx)
            .await?;

            sqlx::query("INSERT INTO patients (id, mrn) VALUES ($1, $2)")
                .bind(id)
                .bind(mrn)
                .execute(&mut **tx)
                .await?;

            outcome.patients_created += 1;
            id
        }
    };

    let inserted = sqlx::query(
        r#"
        INSERT INTO visits (visit_account_number, patient_id, visit_date, reason)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (visit_account_number) DO NOTHING
        "#,
    )
    .bind(account)
    .bind(patient_id)
    .bind(visit_date)
    .bind(non_empty(&row.reason))
    .execute(&mut **tx)
    .await?;

    if inserted.rows_affected() > 0 {
        outcome.visits_inserted += 1;
    }

    Ok(())
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_date(value: &str) -> Result<Option<NaiveDate>, PipelineError> {
    match non_empty(value) {
        None => Ok(None),
        Some(text) => text
            .parse::<NaiveDate>()
            .map(Some)
            .map_err(|_| PipelineError::InvalidData(format!("invalid date '{}'", text))),
    }
}
