// src/jobs/record.rs

//! The authoritative state of one job and the rules for changing it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::jobs::spec::CommandSpec;
use crate::types::{JobId, JobKind, JobState, Progress};

/// Category of a job failure, serialized verbatim (`"SpawnError"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobErrorKind {
    SpawnError,
    RuntimeCrash,
    Timeout,
    UnknownExitStatus,
}

/// Structured error carried by `Failed` jobs and by timed-out `Cancelled` jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// How a job's execution ended, as seen by its worker (or by a cancel of a
/// queued job).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The process exited on its own.
    Exited(i32),
    /// The process died from a signal nobody here sent.
    KilledBySignal(i32),
    /// Waiting for the exit status failed.
    ExitUnknown(String),
    SpawnFailed(String),
    Cancelled,
    TimedOut(Duration),
}

impl Outcome {
    /// Terminal state, exit code and error this outcome commits.
    pub fn resolve(&self) -> (JobState, Option<i32>, Option<JobError>) {
        use JobErrorKind::*;
        match self {
            Outcome::Exited(0) => (JobState::Completed, Some(0), None),
            Outcome::Exited(code) => (
                JobState::Failed,
                Some(*code),
                Some(JobError::new(
                    RuntimeCrash,
                    format!("process exited with code {code}"),
                )),
            ),
            Outcome::KilledBySignal(signal) => (
                JobState::Failed,
                None,
                Some(JobError::new(
                    RuntimeCrash,
                    format!("process terminated by signal {signal}"),
                )),
            ),
            Outcome::ExitUnknown(reason) => (
                JobState::Failed,
                None,
                Some(JobError::new(
                    UnknownExitStatus,
                    format!("could not determine exit status: {reason}"),
                )),
            ),
            Outcome::SpawnFailed(reason) => (
                JobState::Failed,
                None,
                Some(JobError::new(SpawnError, reason.clone())),
            ),
            Outcome::Cancelled => (JobState::Cancelled, None, None),
            Outcome::TimedOut(limit) => (
                JobState::Cancelled,
                None,
                Some(JobError::new(
                    Timeout,
                    format!("job exceeded its timeout of {}", humanize(*limit)),
                )),
            ),
        }
    }
}

fn humanize(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub command: CommandSpec,
    state: JobState,
    pub created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    error: Option<JobError>,
    pub progress: Option<Progress>,
}

impl JobRecord {
    pub fn new(id: JobId, kind: JobKind, command: CommandSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind,
            command,
            state: JobState::Queued,
            created_at,
            started_at: None,
            finished_at: None,
            exit_code: None,
            error: None,
            progress: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Move along one edge of the lifecycle graph, stamping timestamps.
    pub fn transition(
        &mut self,
        next: JobState,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        self.state = next;
        if next == JobState::Running {
            self.started_at = Some(now);
        } else if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Commit a terminal outcome. Fails without side effects if the job is
    /// already terminal or the edge is not allowed.
    pub fn apply_outcome(
        &mut self,
        outcome: &Outcome,
        now: DateTime<Utc>,
    ) -> Result<JobState, InvalidTransition> {
        let (state, exit_code, error) = outcome.resolve();
        self.transition(state, now)?;
        self.exit_code = exit_code;
        self.error = error;
        Ok(state)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            kind: self.kind,
            state: self.state,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            exit_code: self.exit_code,
            error: self.error.clone(),
            progress: self.progress,
        }
    }
}

/// Immutable copy of a job's externally visible state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<JobError>,
    pub progress: Option<Progress>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new(JobId::new(), JobKind::Build, CommandSpec::new("make"), Utc::now())
    }

    #[test]
    fn timestamps_are_set_once_on_the_right_edges() {
        let mut r = record();
        assert!(r.snapshot().started_at.is_none());

        let t1 = Utc::now();
        r.transition(JobState::Running, t1).unwrap();
        assert_eq!(r.snapshot().started_at, Some(t1));
        assert!(r.snapshot().finished_at.is_none());

        let t2 = Utc::now();
        assert_eq!(r.apply_outcome(&Outcome::Exited(0), t2).unwrap(), JobState::Completed);
        let snap = r.snapshot();
        assert_eq!(snap.started_at, Some(t1));
        assert_eq!(snap.finished_at, Some(t2));
        assert_eq!(snap.exit_code, Some(0));
        assert!(snap.error.is_none());
    }

    #[test]
    fn terminal_state_is_never_left() {
        let mut r = record();
        r.transition(JobState::Running, Utc::now()).unwrap();
        r.apply_outcome(&Outcome::Cancelled, Utc::now()).unwrap();
        let finished = r.finished_at();

        let err = r.apply_outcome(&Outcome::Exited(0), Utc::now()).unwrap_err();
        assert_eq!(err.from, JobState::Cancelled);
        assert_eq!(r.state(), JobState::Cancelled);
        assert_eq!(r.finished_at(), finished);
        assert!(r.snapshot().exit_code.is_none());
    }

    #[test]
    fn spawn_failure_skips_running() {
        let mut r = record();
        r.apply_outcome(&Outcome::SpawnFailed("not found".into()), Utc::now())
            .unwrap();
        let snap = r.snapshot();
        assert_eq!(snap.state, JobState::Failed);
        assert!(snap.started_at.is_none());
        assert_eq!(snap.error.unwrap().kind, JobErrorKind::SpawnError);
    }

    #[test]
    fn nonzero_exit_is_runtime_crash_with_code() {
        let (state, code, error) = Outcome::Exited(1).resolve();
        assert_eq!(state, JobState::Failed);
        assert_eq!(code, Some(1));
        assert_eq!(error.unwrap().kind, JobErrorKind::RuntimeCrash);
    }

    #[test]
    fn foreign_signal_has_no_exit_code() {
        let (state, code, error) = Outcome::KilledBySignal(11).resolve();
        assert_eq!(state, JobState::Failed);
        assert_eq!(code, None);
        assert!(error.unwrap().message.contains("signal 11"));
    }

    #[test]
    fn timeout_cancels_with_timeout_error() {
        let (state, code, error) = Outcome::TimedOut(Duration::from_millis(1500)).resolve();
        assert_eq!(state, JobState::Cancelled);
        assert_eq!(code, None);
        let error = error.unwrap();
        assert_eq!(error.kind, JobErrorKind::Timeout);
        assert!(error.message.contains("1500ms"));
    }

    #[test]
    fn snapshot_serializes_error_kind_verbatim() {
        let mut r = record();
        r.apply_outcome(&Outcome::SpawnFailed("nope".into()), Utc::now())
            .unwrap();
        let json = serde_json::to_value(r.snapshot()).unwrap();
        assert_eq!(json["state"], "Failed");
        assert_eq!(json["kind"], "build");
        assert_eq!(json["error"]["kind"], "SpawnError");
        assert!(json["exit_code"].is_null());
    }
}
