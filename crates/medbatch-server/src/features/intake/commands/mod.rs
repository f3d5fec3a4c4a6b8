//! Intake commands

pub mod submit_batch;

pub use submit_batch::{
    SubmissionStatus, SubmitBatchCommand, SubmitBatchError, SubmitBatchResponse,
};
