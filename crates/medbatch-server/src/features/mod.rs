//! Feature modules implementing the medbatch API
//!
//! Each feature is a vertical slice with its own commands, queries, and
//! routes:
//!
//! - **intake**: batch submission with content-hash dedup, which enqueues the
//!   pipeline for the accepted batch
//! - **patients**: read-only browse of the merged patient/visit model
//!
//! # Architecture
//!
//! Each feature module follows the structure:
//! - `commands/` - Write operations
//! - `queries/` - Read operations
//! - `routes.rs` - HTTP route definitions

pub mod intake;
pub mod patients;

use crate::scheduler::Scheduler;
use axum::Router;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    /// PostgreSQL connection pool for database operations
    pub db: sqlx::PgPool,
    /// Execution scheduler the intake feature enqueues pipeline runs on
    pub scheduler: Scheduler,
}

/// Creates the main API router with all feature routes mounted
///
/// - `/ingest` - Batch submission
/// - `/patients` - Patient and visit browse
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .nest("/ingest", intake::intake_routes().with_state(state.clone()))
        .nest(
            "/patients",
            patients::patients_routes().with_state(state.db.clone()),
        )
}
