// src/jobs/mod.rs

//! Job records, their in-memory store and the retention janitor.

pub mod entry;
pub mod record;
pub mod retention;
pub mod spec;
pub mod store;

pub use entry::{JobEntry, StartOutcome};
pub use record::{InvalidTransition, JobError, JobErrorKind, JobRecord, JobSnapshot, Outcome};
pub use spec::{CommandSpec, JobRequest};
pub use store::{JobFilter, JobStore};
