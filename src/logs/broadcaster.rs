// src/logs/broadcaster.rs

//! Per-job sequenced log with live fan-out and replay for late joiners.
//!
//! All state sits behind one mutex. Appending, taking the replay snapshot
//! and registering a subscriber each happen under it, so a subscriber sees
//! every line exactly once: either in its replay or on its live queue.
//! Broadcasting never blocks: a subscriber whose queue is full is dropped
//! and learns about it when its queue runs dry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::config::LogConfig;
use crate::errors::{JobwardenError, Result};
use crate::logs::event::{JobEvent, LogLine};
use crate::types::{JobId, JobState, Progress, StreamKind};

pub struct LogBroadcaster {
    job_id: JobId,
    config: LogConfig,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Retained log lines, status changes and the latest progress value,
    /// in publication order.
    history: VecDeque<JobEvent>,
    retained_lines: usize,
    next_seq: u64,
    dropped_lines: u64,
    subscribers: Vec<SubscriberSlot>,
    closed: bool,
}

struct SubscriberSlot {
    tx: mpsc::Sender<JobEvent>,
    overflowed: Arc<AtomicBool>,
}

impl LogBroadcaster {
    pub fn new(job_id: JobId, config: LogConfig) -> Self {
        Self {
            job_id,
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append one output line and fan it out. Returns `None` once closed.
    pub fn append(
        &self,
        stream: StreamKind,
        payload: String,
        timestamp: DateTime<Utc>,
    ) -> Option<LogLine> {
        let mut inner = self.inner.lock();
        if inner.closed {
            debug!(job_id = %self.job_id, "dropping line appended after close");
            return None;
        }

        let line = LogLine {
            job_id: self.job_id,
            sequence: inner.next_seq,
            stream,
            payload,
            timestamp,
        };
        inner.next_seq += 1;

        let event = JobEvent::Log(line.clone());
        inner.history.push_back(event.clone());
        inner.retained_lines += 1;
        self.trim(&mut inner);
        self.broadcast(&mut inner, event);

        Some(line)
    }

    pub fn publish_status(&self, state: JobState) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        let event = JobEvent::Status { state };
        inner.history.push_back(event.clone());
        self.broadcast(&mut inner, event);
    }

    /// Only the latest progress value is kept for replay.
    pub fn publish_progress(&self, value: Progress) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        // Older progress is superseded; the new value keeps its place in the stream.
        if let Some(pos) = inner
            .history
            .iter()
            .position(|e| matches!(e, JobEvent::Progress { .. }))
        {
            inner.history.remove(pos);
        }
        inner.history.push_back(JobEvent::Progress { value });
        self.broadcast(&mut inner, JobEvent::Progress { value });
    }

    /// Register a subscriber: retained history first, then live events.
    pub fn subscribe(&self) -> Subscription {
        let mut inner = self.inner.lock();

        let mut replay = VecDeque::with_capacity(inner.history.len() + 1);
        if inner.dropped_lines > 0 {
            replay.push_back(JobEvent::Gap {
                dropped: inner.dropped_lines,
                next_seq: inner.dropped_lines,
            });
        }
        replay.extend(inner.history.iter().cloned());

        let overflowed = Arc::new(AtomicBool::new(false));
        let live = if inner.closed {
            None
        } else {
            let (tx, rx) = mpsc::channel(self.config.subscriber_queue);
            inner.subscribers.push(SubscriberSlot {
                tx,
                overflowed: overflowed.clone(),
            });
            Some(rx)
        };

        debug!(
            job_id = %self.job_id,
            replayed = replay.len(),
            live = live.is_some(),
            "subscriber registered"
        );

        Subscription {
            job_id: self.job_id,
            replay,
            live,
            overflowed,
            capacity: self.config.subscriber_queue,
        }
    }

    /// Stop accepting events. Subscribers drain their queues and then end.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Total lines ever appended.
    pub fn line_count(&self) -> u64 {
        self.inner.lock().next_seq
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    fn trim(&self, inner: &mut Inner) {
        let Some(max) = self.config.max_retained_lines else {
            return;
        };
        while inner.retained_lines > max {
            let Some(pos) = inner.history.iter().position(|e| e.as_log().is_some()) else {
                break;
            };
            inner.history.remove(pos);
            inner.retained_lines -= 1;
            inner.dropped_lines += 1;
        }
    }

    fn broadcast(&self, inner: &mut Inner, event: JobEvent) {
        let job_id = self.job_id;
        inner
            .subscribers
            .retain(|slot| match slot.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(%job_id, "subscriber queue full; disconnecting subscriber");
                    slot.overflowed.store(true, Ordering::Release);
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            });
    }
}

/// A single observer of one job's event stream.
pub struct Subscription {
    job_id: JobId,
    replay: VecDeque<JobEvent>,
    live: Option<mpsc::Receiver<JobEvent>>,
    overflowed: Arc<AtomicBool>,
    capacity: usize,
}

impl Subscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Next event, or `Ok(None)` once the stream has ended.
    ///
    /// Returns `Err(SubscriberOverflow)` once, after the last queued event,
    /// if this subscriber was disconnected for falling behind.
    pub async fn recv(&mut self) -> Result<Option<JobEvent>> {
        if let Some(event) = self.replay.pop_front() {
            return Ok(Some(event));
        }

        let Some(rx) = self.live.as_mut() else {
            return Ok(None);
        };

        match rx.recv().await {
            Some(event) => Ok(Some(event)),
            None => {
                self.live = None;
                if self.overflowed.load(Ordering::Acquire) {
                    Err(JobwardenError::SubscriberOverflow {
                        capacity: self.capacity,
                    })
                } else {
                    Ok(None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcaster(max_retained_lines: Option<usize>, subscriber_queue: usize) -> LogBroadcaster {
        LogBroadcaster::new(
            JobId::new(),
            LogConfig {
                max_retained_lines,
                subscriber_queue,
            },
        )
    }

    fn push(b: &LogBroadcaster, text: &str) {
        b.append(StreamKind::Stdout, text.to_string(), Utc::now());
    }

    async fn drain(sub: &mut Subscription) -> Result<Vec<JobEvent>> {
        let mut out = Vec::new();
        while let Some(event) = sub.recv().await? {
            out.push(event);
        }
        Ok(out)
    }

    fn seqs(events: &[JobEvent]) -> Vec<u64> {
        events
            .iter()
            .filter_map(|e| e.as_log().map(|l| l.sequence))
            .collect()
    }

    #[tokio::test]
    async fn sequences_start_at_zero_without_gaps() {
        let b = broadcaster(None, 16);
        for i in 0..5 {
            let line = b.append(StreamKind::Stdout, format!("l{i}"), Utc::now()).unwrap();
            assert_eq!(line.sequence, i);
        }
        b.close();
        let events = drain(&mut b.subscribe()).await.unwrap();
        assert_eq!(seqs(&events), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn early_and_late_subscribers_see_the_same_lines() {
        let b = broadcaster(None, 64);
        push(&b, "a");
        let mut early = b.subscribe();
        push(&b, "b");
        push(&b, "c");
        b.close();
        let mut late = b.subscribe();

        let early_events = drain(&mut early).await.unwrap();
        let late_events = drain(&mut late).await.unwrap();
        assert_eq!(early_events, late_events);
        assert_eq!(seqs(&late_events), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn trimmed_history_replays_behind_gap_marker() {
        let b = broadcaster(Some(2), 16);
        b.publish_status(JobState::Running);
        for i in 0..5 {
            push(&b, &format!("l{i}"));
        }
        b.close();

        let events = drain(&mut b.subscribe()).await.unwrap();
        assert_eq!(
            events[0],
            JobEvent::Gap {
                dropped: 3,
                next_seq: 3
            }
        );
        // Status events survive trimming.
        assert_eq!(
            events[1],
            JobEvent::Status {
                state: JobState::Running
            }
        );
        assert_eq!(seqs(&events), vec![3, 4]);
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_disconnected_without_affecting_others() {
        let b = broadcaster(None, 2);
        let mut slow = b.subscribe();
        let mut fast = b.subscribe();

        push(&b, "0");
        assert_eq!(fast.recv().await.unwrap().unwrap().as_log().unwrap().sequence, 0);
        push(&b, "1");
        assert_eq!(fast.recv().await.unwrap().unwrap().as_log().unwrap().sequence, 1);
        // Slow subscriber's queue (capacity 2) is now full.
        push(&b, "2");
        assert_eq!(b.subscriber_count(), 1);

        assert_eq!(slow.recv().await.unwrap().unwrap().as_log().unwrap().sequence, 0);
        assert_eq!(slow.recv().await.unwrap().unwrap().as_log().unwrap().sequence, 1);
        let err = slow.recv().await.unwrap_err();
        assert!(matches!(err, JobwardenError::SubscriberOverflow { capacity: 2 }));
        assert!(slow.recv().await.unwrap().is_none());

        assert_eq!(fast.recv().await.unwrap().unwrap().as_log().unwrap().sequence, 2);
        b.close();
        assert!(fast.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_progress_is_replayed_where_it_was_published() {
        let b = broadcaster(None, 16);
        push(&b, "x");
        b.publish_progress(Progress::percent(10.0));
        push(&b, "y");
        b.publish_progress(Progress::percent(60.0));
        push(&b, "z");
        b.publish_status(JobState::Completed);
        b.close();

        let events = drain(&mut b.subscribe()).await.unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(seqs(&events), vec![0, 1, 2]);
        assert_eq!(
            events[2],
            JobEvent::Progress {
                value: Progress::Percent(60.0)
            }
        );
        assert_eq!(
            events[4],
            JobEvent::Status {
                state: JobState::Completed
            }
        );
    }

    #[tokio::test]
    async fn late_subscriber_sees_the_same_order_as_an_early_one() {
        let b = broadcaster(None, 16);
        let mut early = b.subscribe();
        b.publish_status(JobState::Running);
        push(&b, "p: 40");
        b.publish_progress(Progress::percent(40.0));
        push(&b, "done");
        b.publish_status(JobState::Completed);
        b.close();
        let mut late = b.subscribe();

        let early_events = drain(&mut early).await.unwrap();
        let late_events = drain(&mut late).await.unwrap();
        assert_eq!(early_events, late_events);
        assert_eq!(
            late_events.last(),
            Some(&JobEvent::Status {
                state: JobState::Completed
            })
        );
    }

    #[test]
    fn appends_after_close_are_ignored() {
        let b = broadcaster(None, 16);
        b.close();
        assert!(b.append(StreamKind::Stdout, "late".into(), Utc::now()).is_none());
        assert_eq!(b.line_count(), 0);
        assert!(b.is_closed());
    }
}
