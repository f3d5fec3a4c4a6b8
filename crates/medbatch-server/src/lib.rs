//! Medbatch Server Library
//!
//! Durable ingestion service for patient-visit batches.
//!
//! # Overview
//!
//! The server accepts batches of patient-visit line items over HTTP,
//! deduplicates them by content fingerprint, renders each batch into a CSV
//! artifact, publishes the artifact to S3-compatible blob storage, and merges
//! the artifact's rows into a normalized patient/visit model:
//!
//! - **Intake**: `POST /ingest` deduplicates by content hash and enqueues the
//!   pipeline for the resulting batch id
//! - **Pipeline**: a resumable stage state machine
//!   (`new -> converted -> uploaded -> processed`) whose activities re-read
//!   persisted status before acting, so replays and crash re-invocations
//!   never redo completed work
//! - **Merge Engine**: a whole-artifact transaction that coalesce-updates
//!   demographics and inserts visits first-write-wins
//! - **Scheduler**: a persisted job table plus an in-process worker pool
//!   providing key-deduplicated, crash-resumable executions
//!
//! # Framework Stack
//!
//! - **Axum**: HTTP surface
//! - **SQLx**: PostgreSQL persistence
//! - **aws-sdk-s3**: artifact blob storage
//!
//! # Example
//!
//! ```no_run
//! use medbatch_server::config::Config;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     println!("binding {}:{}", config.server.host, config.server.port);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod features;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod storage;

// Re-export commonly used types
pub use error::{AppError, AppResult};
