// src/exec/backend.rs

//! Pluggable process backend abstraction.
//!
//! Workers talk to a `ProcessBackend` instead of `tokio::process` directly.
//! Production uses [`SystemBackend`](super::SystemBackend), which spawns real
//! process groups; tests can provide a scripted backend that never touches
//! the OS.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::jobs::CommandSpec;
use crate::types::StreamKind;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Output produced by a supervised process, in pipe order per stream.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Line {
        stream: StreamKind,
        payload: String,
        timestamp: DateTime<Utc>,
    },
    /// Reading the pipe failed; no further lines arrive on `stream`.
    Truncated { stream: StreamKind, reason: String },
}

/// How a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Code(i32),
    /// Killed by a signal (Unix only).
    Signal(i32),
    /// Waiting for the exit status failed.
    Unknown(String),
}

/// Why a process could not be started. Raised before any log line exists.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("executable not found: {program}")]
    NotFound { program: String },

    #[error("permission denied executing {program}")]
    PermissionDenied { program: String },

    #[error("invalid working directory: {}", path.display())]
    InvalidWorkingDirectory { path: PathBuf },

    #[error("failed to spawn {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    /// Time between SIGTERM and SIGKILL.
    pub grace_period: Duration,
    /// Bound on waiting for the group to vanish after SIGKILL.
    pub kill_wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationReport {
    /// SIGKILL had to be sent.
    pub escalated: bool,
    /// No member of the process group is left.
    pub group_gone: bool,
}

/// Trait abstracting how commands become running processes.
pub trait ProcessBackend: Send + Sync {
    /// Start `spec` as the leader of a new process group.
    ///
    /// Lines from stdout and stderr are sent to `output` as they are read.
    /// The sender is dropped once both pipes reach EOF, so the receiver
    /// observes `None` when all output has been delivered.
    fn launch(
        &self,
        spec: &CommandSpec,
        output: mpsc::Sender<OutputEvent>,
    ) -> Result<Box<dyn ProcessHandle>, SpawnError>;
}

/// A live (or reaped) supervised process.
pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait for the group leader to exit. Cancel-safe, and returns the same
    /// result again once the process has been reaped.
    fn wait(&mut self) -> BoxFuture<'_, ProcessExit>;

    /// Stop the whole process group: SIGTERM, `grace_period`, SIGKILL if
    /// anything survived, then at most `kill_wait` for cleanup.
    fn terminate(&mut self, policy: TerminationPolicy) -> BoxFuture<'_, TerminationReport>;
}
