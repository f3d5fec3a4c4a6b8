//! Database models and domain types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// One patient-visit event as submitted by a feeder system.
///
/// Immutable once embedded in a batch; the batch persists the submitted
/// items verbatim as JSONB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub mrn: String,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: NaiveDate,
    pub visit_account_number: String,
    pub visit_date: NaiveDate,
    pub reason: String,
}

/// Pipeline stage of an ingestion batch.
///
/// Status only advances forward; the persisted value is the lowercase
/// variant name. Unknown persisted text is surfaced as
/// [`UnknownStatus`] and treated as a fatal fault by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    New,
    Converted,
    Uploaded,
    Processed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::New => "new",
            BatchStatus::Converted => "converted",
            BatchStatus::Uploaded => "uploaded",
            BatchStatus::Processed => "processed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted status text outside the known stage set
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown batch status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for BatchStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(BatchStatus::New),
            "converted" => Ok(BatchStatus::Converted),
            "uploaded" => Ok(BatchStatus::Uploaded),
            "processed" => Ok(BatchStatus::Processed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Patient identity joined with its demographic record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PatientRecord {
    pub id: i64,
    pub mrn: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Visit model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Visit {
    pub id: i64,
    pub visit_account_number: String,
    pub patient_id: i64,
    pub visit_date: NaiveDate,
    pub reason: Option<String>,
}
