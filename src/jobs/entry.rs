// src/jobs/entry.rs

//! A stored job: its record, its log and its cancellation signal.
//!
//! Every state change happens under the record mutex, and the matching
//! `status` event is published before that lock is released. Lock order is
//! always record, then log.

use std::fmt::Display;

use chrono::Utc;
use parking_lot::Mutex;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LogConfig;
use crate::exec::OutputEvent;
use crate::jobs::record::{JobRecord, JobSnapshot, Outcome};
use crate::jobs::spec::CommandSpec;
use crate::logs::{LogBroadcaster, Subscription};
use crate::types::{JobId, JobKind, JobState, Progress, StreamKind};

pub struct JobEntry {
    id: JobId,
    /// Creation order within the store.
    serial: u64,
    record: Mutex<JobRecord>,
    log: LogBroadcaster,
    cancel: CancellationToken,
    progress_pattern: Option<Regex>,
}

/// Result of trying to move a job from `Queued` to `Running`.
pub enum StartOutcome<T> {
    Started(T),
    /// Launch failed; the job is now `Failed`.
    SpawnFailed(String),
    /// Someone else moved the job first (usually a cancel).
    NotQueued(JobState),
}

impl JobEntry {
    pub fn new(
        serial: u64,
        record: JobRecord,
        progress_pattern: Option<Regex>,
        log_config: LogConfig,
    ) -> Self {
        let id = record.id;
        Self {
            id,
            serial,
            record: Mutex::new(record),
            log: LogBroadcaster::new(id, log_config),
            cancel: CancellationToken::new(),
            progress_pattern,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn kind(&self) -> JobKind {
        self.record.lock().kind
    }

    pub fn state(&self) -> JobState {
        self.record.lock().state()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.record.lock().snapshot()
    }

    pub fn command(&self) -> CommandSpec {
        self.record.lock().command.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.log.subscribe()
    }

    pub fn log(&self) -> &LogBroadcaster {
        &self.log
    }

    /// Fires when a cancel is requested for the running job.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `launch` and commit `Queued -> Running` (or `-> Failed`) atomically
    /// with respect to cancellation.
    pub fn start_with<T, E, F>(&self, launch: F) -> StartOutcome<T>
    where
        E: Display,
        F: FnOnce(&CommandSpec) -> Result<T, E>,
    {
        let mut record = self.record.lock();
        if record.state() != JobState::Queued {
            return StartOutcome::NotQueued(record.state());
        }

        match launch(&record.command) {
            Ok(handle) => {
                // Queued -> Running is always a valid edge here.
                let _ = record.transition(JobState::Running, Utc::now());
                self.log.publish_status(JobState::Running);
                info!(job_id = %self.id, "job running");
                StartOutcome::Started(handle)
            }
            Err(e) => {
                let reason = e.to_string();
                let _ = record.apply_outcome(&Outcome::SpawnFailed(reason.clone()), Utc::now());
                self.log.publish_status(JobState::Failed);
                self.log.close();
                info!(job_id = %self.id, error = %reason, "job failed to spawn");
                StartOutcome::SpawnFailed(reason)
            }
        }
    }

    /// Commit the terminal outcome. Returns `None` if the job was already
    /// terminal, in which case nothing changes.
    pub fn finish(&self, outcome: Outcome) -> Option<JobState> {
        let mut record = self.record.lock();
        match record.apply_outcome(&outcome, Utc::now()) {
            Ok(state) => {
                self.log.publish_status(state);
                self.log.close();
                info!(job_id = %self.id, %state, ?outcome, "job finished");
                Some(state)
            }
            Err(e) => {
                debug!(job_id = %self.id, error = %e, ?outcome, "ignoring late outcome");
                None
            }
        }
    }

    /// Cancel the job. Queued jobs become `Cancelled` immediately; running
    /// jobs are signalled and finish once their process is gone. Terminal jobs
    /// are left alone.
    ///
    /// Returns the current snapshot and whether a queued job was withdrawn.
    pub fn request_cancel(&self) -> (JobSnapshot, bool) {
        let mut record = self.record.lock();
        match record.state() {
            JobState::Queued => {
                let _ = record.apply_outcome(&Outcome::Cancelled, Utc::now());
                self.log.publish_status(JobState::Cancelled);
                self.log.close();
                info!(job_id = %self.id, "queued job cancelled");
                (record.snapshot(), true)
            }
            JobState::Running => {
                if !self.cancel.is_cancelled() {
                    info!(job_id = %self.id, "cancellation requested for running job");
                    self.cancel.cancel();
                }
                (record.snapshot(), false)
            }
            _ => (record.snapshot(), false),
        }
    }

    /// Record a progress value. Ignored once the job is terminal.
    pub fn report_progress(&self, progress: Progress) -> bool {
        let mut record = self.record.lock();
        if record.state().is_terminal() {
            return false;
        }
        record.progress = Some(progress);
        self.log.publish_progress(progress);
        true
    }

    /// Feed one event from the process pipes into the log, extracting
    /// progress from stdout when a pattern is configured.
    pub fn record_output(&self, event: OutputEvent) {
        match event {
            OutputEvent::Line {
                stream,
                payload,
                timestamp,
            } => {
                let progress = match (&self.progress_pattern, stream) {
                    (Some(re), StreamKind::Stdout) => extract_progress(re, &payload),
                    _ => None,
                };
                self.log.append(stream, payload, timestamp);
                if let Some(progress) = progress {
                    self.report_progress(progress);
                }
            }
            OutputEvent::Truncated { stream, reason } => {
                self.log.append(
                    StreamKind::Stderr,
                    format!("[jobwarden] {stream} truncated: {reason}"),
                    Utc::now(),
                );
            }
        }
    }
}

/// First capture group (or the whole match) as a percentage; a match that is
/// not a number means progress is indeterminate.
fn extract_progress(re: &Regex, line: &str) -> Option<Progress> {
    let caps = re.captures(line)?;
    let text = caps.get(1).or_else(|| caps.get(0))?.as_str();
    Some(match text.trim().parse::<f64>() {
        Ok(value) => Progress::percent(value),
        Err(_) => Progress::Indeterminate,
    })
}
