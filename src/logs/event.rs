// src/logs/event.rs

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{JobId, JobState, Progress, StreamKind};

/// One captured line of process output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    #[serde(skip_serializing)]
    pub job_id: JobId,
    #[serde(rename = "seq")]
    pub sequence: u64,
    pub stream: StreamKind,
    #[serde(rename = "line")]
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything a subscriber can observe about a job, in one ordered stream.
///
/// Serialized with a `type` tag:
///
/// ```json
/// {"type":"log","seq":0,"stream":"stdout","line":"hello","timestamp":"..."}
/// {"type":"progress","value":42.0}
/// {"type":"status","state":"Running"}
/// {"type":"gap","dropped":10,"next_seq":10}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Log(LogLine),
    Progress { value: Progress },
    Status { state: JobState },
    /// `dropped` lines were evicted from history; the next log line has
    /// sequence `next_seq`.
    Gap { dropped: u64, next_seq: u64 },
}

impl JobEvent {
    pub fn as_log(&self) -> Option<&LogLine> {
        match self {
            JobEvent::Log(line) => Some(line),
            _ => None,
        }
    }
}
