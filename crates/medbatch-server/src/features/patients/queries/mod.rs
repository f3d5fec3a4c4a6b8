//! Patient queries

pub mod get_patient;
pub mod list_patients;
pub mod list_visits;

pub use get_patient::{GetPatientError, GetPatientQuery};
pub use list_patients::ListPatientsQuery;
pub use list_visits::{ListVisitsError, ListVisitsQuery};
