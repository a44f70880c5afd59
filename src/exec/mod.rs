// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running job commands, using
//! `tokio::process::Command`, and reporting their output and exit back to
//! the job worker.
//!
//! - [`backend`] provides the `ProcessBackend` / `ProcessHandle` traits that
//!   workers use, so tests can swap in a scripted backend.
//! - [`supervisor`] is the real backend: process groups, group signalling
//!   and SIGTERM-then-SIGKILL termination.
//! - [`output`] holds the per-pipe line readers.

pub mod backend;
pub mod output;
pub mod supervisor;

pub use backend::{
    BoxFuture, OutputEvent, ProcessBackend, ProcessExit, ProcessHandle, SpawnError,
    TerminationPolicy, TerminationReport,
};
pub use supervisor::SystemBackend;
