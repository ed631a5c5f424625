//! Qualification domain module (runs, results, ideal customer profiles).
//!
//! This crate contains business rules for batch prospect qualification,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod icp;
pub mod result;
pub mod run;

pub use icp::IdealCustomerProfile;
pub use result::{CompanyData, QualificationResult, ScoredProspect};
pub use run::{Run, RunStatus};
