//! Content fingerprinting
//!
//! A batch's identity is the MD5 digest of its canonical encoding: each line
//! item as a JSON object with keys in sorted order and dates rendered
//! ISO-8601, the batch as the JSON array of those objects in submission
//! order, with no incidental whitespace. Identical canonical payloads hash
//! identically across restarts and runtimes.
//!
//! This is a dedup fingerprint, not a security boundary.

use crate::models::LineItem;
use serde::Serialize;

// Field order here is the canonical (sorted) key order of the encoding;
// serde_json emits struct fields in declaration order.
#[derive(Serialize)]
struct CanonicalItem<'a> {
    birth_date: String,
    first_name: &'a str,
    last_name: &'a str,
    mrn: &'a str,
    reason: &'a str,
    visit_account_number: &'a str,
    visit_date: String,
}

impl<'a> From<&'a LineItem> for CanonicalItem<'a> {
    fn from(item: &'a LineItem) -> Self {
        Self {
            birth_date: item.birth_date.format("%Y-%m-%d").to_string(),
            first_name: &item.first_name,
            last_name: &item.last_name,
            mrn: &item.mrn,
            reason: &item.reason,
            visit_account_number: &item.visit_account_number,
            visit_date: item.visit_date.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Content hash of an ordered sequence of line items.
pub fn content_hash(items: &[LineItem]) -> String {
    let canonical: Vec<CanonicalItem<'_>> = items.iter().map(CanonicalItem::from).collect();
    let bytes = serde_json::to_vec(&canonical)
        .expect("canonical line items serialize infallibly");
    hex_digest(&bytes)
}

/// Execution key for the secondary trigger, derived from the artifact's
/// storage location.
pub fn location_key(location: &str) -> String {
    hex_digest(location.as_bytes())
}

fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}
