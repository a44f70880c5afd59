// src/engine/queue.rs

use std::collections::VecDeque;

use tracing::debug;

use crate::types::JobId;

/// FIFO of jobs waiting for a worker slot.
///
/// Semantics:
/// - Jobs are admitted strictly in submission order.
/// - A job is queued at most once; resubmitting it is a no-op.
/// - Withdrawing a job (cancelled while queued) removes it wherever it sits.
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    jobs: VecDeque<JobId>,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: JobId) {
        if self.jobs.contains(&job) {
            debug!(job_id = %job, "job already queued; ignoring duplicate submission");
            return;
        }
        self.jobs.push_back(job);
    }

    pub fn pop(&mut self) -> Option<JobId> {
        self.jobs.pop_front()
    }

    /// Returns whether the job was present.
    pub fn remove(&mut self, job: JobId) -> bool {
        match self.jobs.iter().position(|j| *j == job) {
            Some(pos) => {
                self.jobs.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Take every queued job, oldest first.
    pub fn drain(&mut self) -> Vec<JobId> {
        self.jobs.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_submission_order() {
        let ids: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
        let mut q = AdmissionQueue::new();
        for id in &ids {
            q.push(*id);
        }
        assert_eq!(q.pop(), Some(ids[0]));
        assert_eq!(q.pop(), Some(ids[1]));
        assert_eq!(q.pop(), Some(ids[2]));
        assert!(q.pop().is_none());
    }

    #[test]
    fn duplicate_submissions_are_ignored() {
        let id = JobId::new();
        let mut q = AdmissionQueue::new();
        q.push(id);
        q.push(id);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_from_the_middle_keeps_order() {
        let ids: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
        let mut q = AdmissionQueue::new();
        for id in &ids {
            q.push(*id);
        }
        assert!(q.remove(ids[1]));
        assert!(!q.remove(ids[1]));
        assert_eq!(q.drain(), vec![ids[0], ids[2]]);
        assert!(q.is_empty());
    }
}
