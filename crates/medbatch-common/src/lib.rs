//! Medbatch Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the medbatch workspace.
//!
//! # Overview
//!
//! This crate provides functionality used across all medbatch workspace
//! members:
//!
//! - **Error Handling**: the shared [`MedbatchError`] type and result alias
//! - **Logging**: centralized tracing configuration with console/file targets
//!
//! # Example
//!
//! ```no_run
//! use medbatch_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("service starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{MedbatchError, Result};
