// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::config::ConfigFile;
use crate::errors::{JobwardenError, Result};
use crate::exec::ProcessBackend;
use crate::jobs::{JobStore, Outcome};
use crate::types::JobId;

use super::core::CoreScheduler;
use super::worker::{WorkerContext, run_job};
use super::{CoreCommand, SchedulerEvent};

/// Cloneable sender side of the scheduler's event channel.
///
/// Sending never blocks, so API calls never wait on execution.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerEvent>,
}

impl SchedulerHandle {
    pub fn submit(&self, job: JobId) -> Result<()> {
        self.send(SchedulerEvent::JobSubmitted { job })
    }

    pub fn withdraw(&self, job: JobId) -> Result<()> {
        self.send(SchedulerEvent::JobWithdrawn { job })
    }

    pub fn request_shutdown(&self) -> Result<()> {
        self.send(SchedulerEvent::ShutdownRequested)
    }

    fn send(&self, event: SchedulerEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| JobwardenError::ShuttingDown)
    }
}

/// Drives the core scheduler in response to `SchedulerEvent`s and owns the
/// worker tasks it dispatches.
///
/// This is a pure IO shell around `CoreScheduler`, which contains all the
/// admission semantics.
pub struct SchedulerRuntime {
    core: CoreScheduler,
    event_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    ctx: Arc<WorkerContext>,
    workers: JoinSet<JobId>,
}

impl fmt::Debug for SchedulerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerRuntime")
            .field("core", &self.core)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl SchedulerRuntime {
    pub fn new(
        core: CoreScheduler,
        event_rx: mpsc::UnboundedReceiver<SchedulerEvent>,
        ctx: Arc<WorkerContext>,
    ) -> Self {
        Self {
            core,
            event_rx,
            ctx,
            workers: JoinSet::new(),
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `SchedulerEvent`s from `event_rx` and worker completions
    ///   from the `JoinSet`.
    /// - Feeds them into the core scheduler.
    /// - Executes the commands returned by the core.
    ///
    /// Returns once shutdown was requested (or every handle dropped) and all
    /// workers have exited.
    pub async fn run(mut self) -> Result<()> {
        info!(max_workers = self.core.max_workers(), "jobwarden scheduler started");
        let mut events_open = true;

        loop {
            let event = tokio::select! {
                maybe = self.event_rx.recv(), if events_open => match maybe {
                    Some(event) => event,
                    None => {
                        debug!("scheduler event channel closed; draining");
                        events_open = false;
                        SchedulerEvent::ShutdownRequested
                    }
                },
                Some(joined) = self.workers.join_next(), if !self.workers.is_empty() => match joined {
                    Ok(job) => SchedulerEvent::WorkerFinished { job },
                    Err(e) => {
                        error!(error = %e, "worker supervisor task failed");
                        continue;
                    }
                },
                else => break,
            };

            debug!(?event, "scheduler received event");

            let step = self.core.step(event);
            for command in step.commands {
                self.execute_command(command);
            }

            if !step.keep_running {
                break;
            }
        }

        info!("scheduler exiting");
        Ok(())
    }

    fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::Dispatch(job) => self.dispatch(job),
            CoreCommand::Reject(job) => {
                if let Some(entry) = self.ctx.store.get(job) {
                    entry.request_cancel();
                }
            }
            CoreCommand::Exit => {
                debug!("core issued Exit command");
            }
        }
    }

    /// Spawn the worker for `job` under a supervising task that always
    /// reports the job id back, even if the worker itself panics.
    fn dispatch(&mut self, job: JobId) {
        debug!(job_id = %job, "dispatching job to worker");
        let ctx = self.ctx.clone();

        self.workers.spawn(async move {
            let worker = tokio::spawn(run_job(ctx.clone(), job));
            if let Err(e) = worker.await {
                error!(job_id = %job, error = %e, "job worker crashed");
                if let Some(entry) = ctx.store.get(job) {
                    entry.finish(Outcome::ExitUnknown(format!(
                        "supervising worker crashed: {e}"
                    )));
                }
            }
            job
        });
    }
}

/// Wire up a scheduler for `store` and spawn its runtime on the current
/// Tokio runtime.
pub fn spawn_scheduler(
    store: Arc<JobStore>,
    backend: Arc<dyn ProcessBackend>,
    config: &ConfigFile,
) -> (SchedulerHandle, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let ctx = Arc::new(WorkerContext {
        store,
        backend,
        supervisor: config.supervisor,
    });
    let core = CoreScheduler::new(config.scheduler.max_workers);
    let runtime = SchedulerRuntime::new(core, rx, ctx);

    (SchedulerHandle { tx }, tokio::spawn(runtime.run()))
}
