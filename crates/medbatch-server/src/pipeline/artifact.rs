//! Artifact rendering and parsing
//!
//! The batch artifact is UTF-8, comma-delimited CSV with the fixed header
//! `mrn,first_name,last_name,birth_date,visit_account_number,visit_date,reason`,
//! one data row per line item, dates as ISO-8601 date strings, and empty
//! fields for unknown values.

use crate::models::LineItem;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed artifact column order.
pub const ARTIFACT_COLUMNS: [&str; 7] = [
    "mrn",
    "first_name",
    "last_name",
    "birth_date",
    "visit_account_number",
    "visit_date",
    "reason",
];

/// One artifact row, all fields textual (empty string = unknown).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRow {
    pub mrn: String,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: String,
    pub visit_account_number: String,
    pub visit_date: String,
    pub reason: String,
}

impl From<&LineItem> for ArtifactRow {
    fn from(item: &LineItem) -> Self {
        Self {
            mrn: item.mrn.clone(),
            first_name: item.first_name.clone(),
            last_name: item.last_name.clone(),
            birth_date: item.birth_date.format("%Y-%m-%d").to_string(),
            visit_account_number: item.visit_account_number.clone(),
            visit_date: item.visit_date.format("%Y-%m-%d").to_string(),
            reason: item.reason.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed artifact: {0}")]
    Malformed(String),
}

/// Render line items into artifact bytes.
pub fn render(items: &[LineItem]) -> Result<Vec<u8>, ArtifactError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    // Header is written explicitly: an empty batch still carries it.
    writer.write_record(ARTIFACT_COLUMNS)?;
    for item in items {
        let row = ArtifactRow::from(item);
        writer.write_record([
            row.mrn.as_str(),
            row.first_name.as_str(),
            row.last_name.as_str(),
            row.birth_date.as_str(),
            row.visit_account_number.as_str(),
            row.visit_date.as_str(),
            row.reason.as_str(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| ArtifactError::Io(e.into_error()))
}

/// Parse artifact bytes back into rows, validating the header.
pub fn parse(bytes: &[u8]) -> Result<Vec<ArtifactRow>, ArtifactError> {
    let mut reader = csv::Reader::from_reader(bytes);

    let headers = reader.headers()?.clone();
    if headers.iter().ne(ARTIFACT_COLUMNS) {
        return Err(ArtifactError::Malformed(format!(
            "unexpected header row: {:?}",
            headers
        )));
    }

    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: ArtifactRow = result?;
        rows.push(row);
    }

    Ok(rows)
}
