// src/engine/worker.rs

//! Per-job worker: drives one job from `Queued` to a terminal state.
//!
//! - If the cancellation token fires (via `cancel_job`), the process group is
//!   terminated and the job is committed as `Cancelled` only after the
//!   termination path returns.
//! - A timeout takes the same termination path.
//! - Output keeps flowing into the job log while the process runs, and is
//!   drained for a bounded window after it stops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::exec::{OutputEvent, ProcessBackend, ProcessExit, ProcessHandle, TerminationPolicy};
use crate::jobs::{JobEntry, JobStore, Outcome, StartOutcome};
use crate::types::JobId;

/// Lines buffered between the pipe readers and the worker.
const OUTPUT_BUFFER: usize = 256;

/// Everything a worker needs; shared by all workers of one scheduler.
pub struct WorkerContext {
    pub store: Arc<JobStore>,
    pub backend: Arc<dyn ProcessBackend>,
    pub supervisor: SupervisorConfig,
}

impl WorkerContext {
    fn termination_policy(&self) -> TerminationPolicy {
        TerminationPolicy {
            grace_period: self.supervisor.grace_period,
            kill_wait: self.supervisor.kill_wait,
        }
    }
}

/// Why the worker stopped watching the running process.
enum Stop {
    Exited(ProcessExit),
    CancelRequested,
    TimedOut(Duration),
}

/// Run a single job to completion.
pub async fn run_job(ctx: Arc<WorkerContext>, job_id: JobId) {
    let Some(entry) = ctx.store.get(job_id) else {
        debug!(job_id = %job_id, "dispatched job no longer exists");
        return;
    };

    let (output_tx, mut output_rx) = mpsc::channel(OUTPUT_BUFFER);
    let backend = ctx.backend.clone();

    let (mut process, timeout) = match entry.start_with(|spec| {
        info!(job_id = %job_id, command = %spec.display_line(), "starting job process");
        backend
            .launch(spec, output_tx)
            .map(|process| (process, spec.timeout))
    }) {
        StartOutcome::Started(started) => started,
        StartOutcome::SpawnFailed(reason) => {
            warn!(job_id = %job_id, error = %reason, "job process could not be spawned");
            return;
        }
        StartOutcome::NotQueued(state) => {
            debug!(job_id = %job_id, %state, "job left the queue before it started");
            return;
        }
    };

    info!(job_id = %job_id, pid = ?process.pid(), "job process started");

    // A limit too far out to represent as an instant never fires.
    let deadline =
        timeout.and_then(|limit| Instant::now().checked_add(limit).map(|at| (at, limit)));
    let cancel = entry.cancel_token().clone();
    let mut output_open = true;

    // Either the process exits on its own (normal case), the job is
    // cancelled, or its timeout elapses.
    let stop = loop {
        tokio::select! {
            event = output_rx.recv(), if output_open => match event {
                Some(event) => entry.record_output(event),
                None => output_open = false,
            },
            exit = process.wait() => break Stop::Exited(exit),
            _ = cancel.cancelled() => break Stop::CancelRequested,
            limit = deadline_elapsed(deadline) => break Stop::TimedOut(limit),
        }
    };

    let outcome = match stop {
        Stop::Exited(exit) => {
            info!(job_id = %job_id, ?exit, "job process exited");
            outcome_from_exit(exit)
        }
        Stop::CancelRequested => {
            info!(job_id = %job_id, "terminating process group for cancelled job");
            terminate(&ctx, &entry, process.as_mut()).await;
            Outcome::Cancelled
        }
        Stop::TimedOut(limit) => {
            warn!(
                job_id = %job_id,
                timeout_ms = limit.as_millis() as u64,
                "job timed out; terminating process group"
            );
            terminate(&ctx, &entry, process.as_mut()).await;
            Outcome::TimedOut(limit)
        }
    };

    if output_open {
        drain_output(&entry, &mut output_rx, ctx.supervisor.output_drain).await;
    }
    drop(process);

    entry.finish(outcome);
}

async fn deadline_elapsed(deadline: Option<(Instant, Duration)>) -> Duration {
    match deadline {
        Some((at, limit)) => {
            tokio::time::sleep_until(at).await;
            limit
        }
        None => std::future::pending().await,
    }
}

async fn terminate(ctx: &WorkerContext, entry: &JobEntry, process: &mut dyn ProcessHandle) {
    let report = process.terminate(ctx.termination_policy()).await;
    if report.group_gone {
        info!(
            job_id = %entry.id(),
            escalated = report.escalated,
            "process group terminated"
        );
    } else {
        warn!(
            job_id = %entry.id(),
            escalated = report.escalated,
            "process group may still have live members after termination"
        );
    }
}

/// Keep reading output until both pipes close or `window` elapses.
async fn drain_output(entry: &JobEntry, rx: &mut mpsc::Receiver<OutputEvent>, window: Duration) {
    let drained = tokio::time::timeout(window, async {
        while let Some(event) = rx.recv().await {
            entry.record_output(event);
        }
    })
    .await;

    if drained.is_err() {
        debug!(
            job_id = %entry.id(),
            "output still open after drain window; detaching from pipes"
        );
    }
}

fn outcome_from_exit(exit: ProcessExit) -> Outcome {
    match exit {
        ProcessExit::Code(code) => Outcome::Exited(code),
        ProcessExit::Signal(signal) => Outcome::KilledBySignal(signal),
        ProcessExit::Unknown(reason) => Outcome::ExitUnknown(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_maps_to_outcome() {
        assert_eq!(outcome_from_exit(ProcessExit::Code(0)), Outcome::Exited(0));
        assert_eq!(
            outcome_from_exit(ProcessExit::Signal(9)),
            Outcome::KilledBySignal(9)
        );
        assert_eq!(
            outcome_from_exit(ProcessExit::Unknown("gone".into())),
            Outcome::ExitUnknown("gone".into())
        );
    }
}
