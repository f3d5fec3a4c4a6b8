//! Batch intake feature
//!
//! Accepts patient-visit batches over HTTP, deduplicates them by content
//! fingerprint, and enqueues the ingestion pipeline for the resulting batch.

pub mod commands;
pub mod routes;

pub use routes::intake_routes;
