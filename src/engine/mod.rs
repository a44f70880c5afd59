// src/engine/mod.rs

//! Job scheduling engine for jobwarden.
//!
//! This module ties together:
//! - the FIFO admission queue for jobs waiting on a worker slot
//! - the bounded worker pool (at most `max_workers` jobs `Running`)
//! - the per-job worker that drives one process from spawn to terminal state
//! - the main runtime event loop that reacts to:
//!   - newly submitted jobs
//!   - jobs withdrawn by cancellation while still queued
//!   - workers finishing
//!   - shutdown requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`], and the per-job process handling in
//! [`worker`].

use crate::types::JobId;

/// Events flowing into the scheduler runtime from the API and from workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A new job was stored as `Queued` and wants a worker slot.
    JobSubmitted { job: JobId },
    /// A queued job was cancelled and no longer needs a slot.
    JobWithdrawn { job: JobId },
    /// The worker for `job` has exited; its slot is free.
    WorkerFinished { job: JobId },
    /// Stop admitting jobs and exit once every worker has finished.
    ShutdownRequested,
}

/// What the IO shell should do after a core step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Start a worker for this job.
    Dispatch(JobId),
    /// The job arrived while draining; cancel it instead of running it.
    Reject(JobId),
    /// Nothing is left to wait for.
    Exit,
}

/// Result of handling one event.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    pub keep_running: bool,
}

pub mod core;
pub mod queue;
pub mod runtime;
pub mod worker;

pub use core::CoreScheduler;
pub use queue::AdmissionQueue;
pub use runtime::{SchedulerHandle, SchedulerRuntime, spawn_scheduler};
pub use worker::WorkerContext;
