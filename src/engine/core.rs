// src/engine/core.rs

//! Pure core scheduler state machine.
//!
//! This module contains a synchronous, deterministic "core scheduler" that
//! consumes [`SchedulerEvent`]s and produces:
//! - an updated core state (admission queue + running set)
//! - a list of commands describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::SchedulerRuntime`) is responsible for:
//! - reading events from the channel
//! - spawning and joining workers
//! - cancelling jobs rejected during shutdown
//!
//! The core is intended to be unit tested without any Tokio, channels or
//! processes.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::engine::queue::AdmissionQueue;
use crate::engine::{CoreCommand, CoreStep, SchedulerEvent};
use crate::types::JobId;

#[derive(Debug)]
pub struct CoreScheduler {
    queue: AdmissionQueue,
    running: HashSet<JobId>,
    max_workers: usize,
    draining: bool,
}

impl CoreScheduler {
    /// `max_workers` is clamped to at least 1.
    pub fn new(max_workers: usize) -> Self {
        Self {
            queue: AdmissionQueue::new(),
            running: HashSet::new(),
            max_workers: max_workers.max(1),
            draining: false,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Handle a single event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: SchedulerEvent) -> CoreStep {
        match event {
            SchedulerEvent::JobSubmitted { job } => {
                if self.draining {
                    debug!(job_id = %job, "job submitted while draining; rejecting");
                    return CoreStep {
                        commands: vec![CoreCommand::Reject(job)],
                        keep_running: true,
                    };
                }
                self.queue.push(job);
                self.fill_slots()
            }
            SchedulerEvent::JobWithdrawn { job } => {
                if self.queue.remove(job) {
                    debug!(job_id = %job, "withdrew queued job");
                }
                CoreStep {
                    commands: Vec::new(),
                    keep_running: true,
                }
            }
            SchedulerEvent::WorkerFinished { job } => {
                self.running.remove(&job);
                if self.draining {
                    self.exit_if_idle()
                } else {
                    self.fill_slots()
                }
            }
            SchedulerEvent::ShutdownRequested => {
                if !self.draining {
                    info!(
                        running = self.running.len(),
                        queued = self.queue.len(),
                        "scheduler draining"
                    );
                }
                self.draining = true;
                let mut commands: Vec<CoreCommand> = self
                    .queue
                    .drain()
                    .into_iter()
                    .map(CoreCommand::Reject)
                    .collect();
                let idle = self.exit_if_idle();
                commands.extend(idle.commands);
                CoreStep {
                    commands,
                    keep_running: idle.keep_running,
                }
            }
        }
    }

    fn fill_slots(&mut self) -> CoreStep {
        let mut commands = Vec::new();
        while self.running.len() < self.max_workers {
            let Some(job) = self.queue.pop() else {
                break;
            };
            self.running.insert(job);
            commands.push(CoreCommand::Dispatch(job));
        }
        CoreStep {
            commands,
            keep_running: true,
        }
    }

    fn exit_if_idle(&self) -> CoreStep {
        if self.running.is_empty() {
            CoreStep {
                commands: vec![CoreCommand::Exit],
                keep_running: false,
            }
        } else {
            CoreStep {
                commands: Vec::new(),
                keep_running: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(core: &mut CoreScheduler, job: JobId) -> CoreStep {
        core.step(SchedulerEvent::JobSubmitted { job })
    }

    #[test]
    fn dispatches_up_to_max_workers_then_queues() {
        let mut core = CoreScheduler::new(2);
        let jobs: Vec<JobId> = (0..4).map(|_| JobId::new()).collect();

        assert_eq!(submit(&mut core, jobs[0]).commands, vec![CoreCommand::Dispatch(jobs[0])]);
        assert_eq!(submit(&mut core, jobs[1]).commands, vec![CoreCommand::Dispatch(jobs[1])]);
        assert!(submit(&mut core, jobs[2]).commands.is_empty());
        assert!(submit(&mut core, jobs[3]).commands.is_empty());
        assert_eq!(core.running_count(), 2);
        assert_eq!(core.queued_count(), 2);

        let step = core.step(SchedulerEvent::WorkerFinished { job: jobs[1] });
        assert_eq!(step.commands, vec![CoreCommand::Dispatch(jobs[2])]);
        assert!(step.keep_running);
    }

    #[test]
    fn withdrawn_job_is_never_dispatched() {
        let mut core = CoreScheduler::new(1);
        let (a, b, c) = (JobId::new(), JobId::new(), JobId::new());
        submit(&mut core, a);
        submit(&mut core, b);
        submit(&mut core, c);

        core.step(SchedulerEvent::JobWithdrawn { job: b });
        let step = core.step(SchedulerEvent::WorkerFinished { job: a });
        assert_eq!(step.commands, vec![CoreCommand::Dispatch(c)]);
    }

    #[test]
    fn shutdown_rejects_queue_and_waits_for_running_workers() {
        let mut core = CoreScheduler::new(1);
        let (a, b) = (JobId::new(), JobId::new());
        submit(&mut core, a);
        submit(&mut core, b);

        let step = core.step(SchedulerEvent::ShutdownRequested);
        assert_eq!(step.commands, vec![CoreCommand::Reject(b)]);
        assert!(step.keep_running);

        let late = JobId::new();
        assert_eq!(submit(&mut core, late).commands, vec![CoreCommand::Reject(late)]);

        let step = core.step(SchedulerEvent::WorkerFinished { job: a });
        assert_eq!(step.commands, vec![CoreCommand::Exit]);
        assert!(!step.keep_running);
    }

    #[test]
    fn shutdown_when_idle_exits_immediately() {
        let mut core = CoreScheduler::new(3);
        let step = core.step(SchedulerEvent::ShutdownRequested);
        assert_eq!(step.commands, vec![CoreCommand::Exit]);
        assert!(!step.keep_running);
        assert!(core.is_draining());
    }

    #[test]
    fn zero_workers_is_clamped_to_one() {
        let mut core = CoreScheduler::new(0);
        let job = JobId::new();
        assert_eq!(submit(&mut core, job).commands, vec![CoreCommand::Dispatch(job)]);
    }
}
