//! Patient browse feature
//!
//! Read-only views over the merged patient/visit model.

pub mod queries;
pub mod routes;

pub use routes::patients_routes;
