//! List patients query

use serde::Deserialize;
use sqlx::PgPool;

use crate::models::PatientRecord;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

/// Query to list patients, ordered by MRN
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPatientsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[tracing::instrument(skip(pool))]
pub async fn handle(
    pool: PgPool,
    query: ListPatientsQuery,
) -> Result<Vec<PatientRecord>, sqlx::Error> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    sqlx::query_as::<_, PatientRecord>(
        "SELECT p.id, p.mrn, d.first_name, d.last_name, d.birth_date, p.created_at \
         FROM patients p \
         JOIN demographic_records d ON d.id = p.id \
         ORDER BY p.mrn \
         LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(&pool)
    .await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn seed_patient(pool: &PgPool, mrn: &str, first_name: &str) -> i64 {
        let id: i64 = sqlx::query_scalar("SELECT nextval('patient_id_seq')")
            .fetch_one(pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO demographic_records (id, first_name, last_name, birth_date) \
             VALUES ($1, $2, 'Lee', '1990-01-01')",
        )
        .bind(id)
        .bind(first_name)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO patients (id, mrn) VALUES ($1, $2)")
            .bind(id)
            .bind(mrn)
            .execute(pool)
            .await
            .unwrap();
        id
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn lists_patients_in_mrn_order(pool: PgPool) {
        seed_patient(&pool, "M2", "Beth").await;
        seed_patient(&pool, "M1", "Ann").await;

        let patients = handle(pool, ListPatientsQuery::default()).await.unwrap();
        assert_eq!(patients.len(), 2);
        assert_eq!(patients[0].mrn, "M1");
        assert_eq!(patients[0].first_name.as_deref(), Some("Ann"));
        assert_eq!(patients[1].mrn, "M2");
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn respects_limit_and_offset(pool: PgPool) {
        for n in 1..=3 {
            seed_patient(&pool, &format!("M{}", n), "Ann").await;
        }

        let page = handle(
            pool,
            ListPatientsQuery {
                limit: Some(1),
                offset: Some(1),
            },
        )
        .await
        .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].mrn, "M2");
    }
}
