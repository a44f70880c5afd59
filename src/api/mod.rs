// src/api/mod.rs

//! Public job API.
//!
//! [`JobService`] owns the job store, the scheduler runtime and the
//! retention janitor. Every call returns without waiting on execution;
//! `shutdown` is the only async operation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConfigFile;
use crate::engine::{SchedulerHandle, spawn_scheduler};
use crate::errors::{JobwardenError, Result};
use crate::exec::{ProcessBackend, SystemBackend};
use crate::jobs::retention::spawn_janitor;
use crate::jobs::{JobFilter, JobRequest, JobSnapshot, JobStore};
use crate::logs::Subscription;
use crate::types::{JobId, Progress};

pub struct JobService {
    config: ConfigFile,
    store: Arc<JobStore>,
    scheduler: SchedulerHandle,
    accepting: AtomicBool,
    runtime: Mutex<Option<JoinHandle<Result<()>>>>,
    janitor: Mutex<Option<JoinHandle<()>>>,
    stop_janitor: CancellationToken,
}

impl JobService {
    /// Start a service that runs real OS processes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: ConfigFile) -> Self {
        Self::with_backend(config, Arc::new(SystemBackend::new()))
    }

    /// Start a service on top of an arbitrary process backend.
    pub fn with_backend(config: ConfigFile, backend: Arc<dyn ProcessBackend>) -> Self {
        let store = Arc::new(JobStore::new(config.logs));
        let (scheduler, runtime) = spawn_scheduler(store.clone(), backend, &config);

        let stop_janitor = CancellationToken::new();
        let janitor = spawn_janitor(store.clone(), config.retention, stop_janitor.clone());

        info!(
            max_workers = config.scheduler.max_workers,
            "job service started"
        );

        Self {
            config,
            store,
            scheduler,
            accepting: AtomicBool::new(true),
            runtime: Mutex::new(Some(runtime)),
            janitor: Mutex::new(Some(janitor)),
            stop_janitor,
        }
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Store a new `Queued` job and hand it to the scheduler.
    pub fn create_job(&self, request: JobRequest) -> Result<JobId> {
        if !self.is_accepting() {
            return Err(JobwardenError::ShuttingDown);
        }

        let kind = request.kind;
        let entry = self.store.create(request)?;
        let id = entry.id();

        if let Err(e) = self.scheduler.submit(id) {
            entry.request_cancel();
            return Err(e);
        }

        info!(job_id = %id, %kind, "job created");
        Ok(id)
    }

    pub fn get_job(&self, id: JobId) -> Result<JobSnapshot> {
        self.store.snapshot(id)
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Vec<JobSnapshot> {
        self.store.list(filter)
    }

    /// Request cancellation and return the job's current snapshot.
    ///
    /// Idempotent: cancelling a terminal job returns it unchanged. A running
    /// job stays `Running` in the returned snapshot until its process group
    /// is gone.
    pub fn cancel_job(&self, id: JobId) -> Result<JobSnapshot> {
        let entry = self.store.require(id)?;
        let (snapshot, withdrawn) = entry.request_cancel();
        if withdrawn {
            // The scheduler also skips it on dispatch; this just frees the queue slot early.
            let _ = self.scheduler.withdraw(id);
        }
        debug!(job_id = %id, state = %snapshot.state, "cancel requested");
        Ok(snapshot)
    }

    pub fn subscribe(&self, id: JobId) -> Result<Subscription> {
        Ok(self.store.require(id)?.subscribe())
    }

    /// Progress side-channel for producers. Ignored once the job is terminal.
    pub fn report_progress(&self, id: JobId, progress: Progress) -> Result<JobSnapshot> {
        let entry = self.store.require(id)?;
        if !entry.report_progress(progress) {
            debug!(job_id = %id, "progress reported for finished job; ignoring");
        }
        Ok(entry.snapshot())
    }

    /// Stop admission, cancel every non-terminal job and wait until all
    /// workers have exited.
    pub async fn shutdown(&self) -> Result<()> {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!("job service shutting down");
        }

        for entry in self.store.active() {
            let (_, withdrawn) = entry.request_cancel();
            if withdrawn {
                let _ = self.scheduler.withdraw(entry.id());
            }
        }
        let _ = self.scheduler.request_shutdown();

        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            match runtime.await {
                Ok(result) => result?,
                Err(e) => return Err(JobwardenError::Other(anyhow!("scheduler task failed: {e}"))),
            }
        }

        self.stop_janitor.cancel();
        let janitor = self.janitor.lock().take();
        if let Some(janitor) = janitor {
            if let Err(e) = janitor.await {
                warn!(error = %e, "retention janitor ended abnormally");
            }
        }

        info!("job service stopped");
        Ok(())
    }
}
