// src/jobs/store.rs

//! In-memory job registry, injected into the scheduler and the API.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::{LogConfig, RetentionConfig};
use crate::errors::{JobwardenError, Result};
use crate::jobs::entry::JobEntry;
use crate::jobs::record::{JobRecord, JobSnapshot};
use crate::jobs::spec::JobRequest;
use crate::types::{JobId, JobKind, JobState};

/// Optional criteria for `list`. Empty filter matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub kind: Option<JobKind>,
}

impl JobFilter {
    pub fn matches(&self, snapshot: &JobSnapshot) -> bool {
        self.state.is_none_or(|s| s == snapshot.state)
            && self.kind.is_none_or(|k| k == snapshot.kind)
    }
}

pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    next_serial: AtomicU64,
    log_config: LogConfig,
}

impl JobStore {
    pub fn new(log_config: LogConfig) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_serial: AtomicU64::new(0),
            log_config,
        }
    }

    /// Validate `request` and store it as a new `Queued` job.
    pub fn create(&self, request: JobRequest) -> Result<Arc<JobEntry>> {
        let progress_pattern = request.validate()?;

        let id = JobId::new();
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let record = JobRecord::new(id, request.kind, request.command, Utc::now());
        let entry = Arc::new(JobEntry::new(
            serial,
            record,
            progress_pattern,
            self.log_config,
        ));

        self.jobs.write().insert(id, entry.clone());
        debug!(job_id = %id, kind = %request.kind, "job stored as queued");
        Ok(entry)
    }

    pub fn get(&self, id: JobId) -> Option<Arc<JobEntry>> {
        self.jobs.read().get(&id).cloned()
    }

    pub fn require(&self, id: JobId) -> Result<Arc<JobEntry>> {
        self.get(id).ok_or(JobwardenError::JobNotFound(id))
    }

    pub fn snapshot(&self, id: JobId) -> Result<JobSnapshot> {
        Ok(self.require(id)?.snapshot())
    }

    /// Snapshots matching `filter`, oldest first.
    pub fn list(&self, filter: &JobFilter) -> Vec<JobSnapshot> {
        let mut entries: Vec<Arc<JobEntry>> = self.jobs.read().values().cloned().collect();
        entries.sort_by_key(|e| e.serial());
        entries
            .iter()
            .map(|e| e.snapshot())
            .filter(|s| filter.matches(s))
            .collect()
    }

    /// Jobs that are not yet terminal.
    pub fn active(&self) -> Vec<Arc<JobEntry>> {
        let mut entries: Vec<Arc<JobEntry>> = self
            .jobs
            .read()
            .values()
            .filter(|e| !e.state().is_terminal())
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.serial());
        entries
    }

    /// Evict finished jobs past their TTL, then the oldest finished jobs
    /// beyond the cap. Returns how many were removed.
    pub fn sweep(&self, policy: &RetentionConfig, now: DateTime<Utc>) -> usize {
        let mut finished: Vec<(DateTime<Utc>, u64, JobId)> = self
            .jobs
            .read()
            .values()
            .filter_map(|e| e.snapshot().finished_at.map(|at| (at, e.serial(), e.id())))
            .collect();
        finished.sort();

        let expired = finished
            .iter()
            .take_while(|(at, _, _)| {
                (now - *at)
                    .to_std()
                    .is_ok_and(|age| age > policy.finished_ttl)
            })
            .count();
        let over_cap = finished
            .len()
            .saturating_sub(expired)
            .saturating_sub(policy.max_finished_jobs);
        let evict = expired + over_cap;

        if evict == 0 {
            return 0;
        }

        let mut jobs = self.jobs.write();
        for (_, _, id) in finished.iter().take(evict) {
            jobs.remove(id);
        }
        info!(evicted = evict, expired, over_cap, "evicted finished jobs");
        evict
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
