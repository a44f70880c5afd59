// src/jobs/spec.rs

//! Job requests as handed in by command producers.
//!
//! The core never interprets the command; it only checks that it is
//! structurally runnable before the job is accepted.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::errors::{JobwardenError, Result};
use crate::types::JobKind;

/// Immutable description of the process to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub env_overrides: BTreeMap<String, String>,
    /// Armed when the job enters `Running`; firing cancels the job.
    pub timeout: Option<Duration>,
    /// Regex with one capture group, applied to every stdout line.
    pub progress_pattern: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// `program args...` for log output.
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// A request to create a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub kind: JobKind,
    pub command: CommandSpec,
}

impl JobRequest {
    pub fn new(kind: JobKind, command: CommandSpec) -> Self {
        Self { kind, command }
    }

    /// Structural validation. Returns the compiled progress pattern, if any.
    pub fn validate(&self) -> Result<Option<Regex>> {
        let cmd = &self.command;

        if cmd.program.trim().is_empty() {
            return Err(invalid("program must not be empty"));
        }
        if cmd.program.contains('\0') || cmd.args.iter().any(|a| a.contains('\0')) {
            return Err(invalid("program and args must not contain NUL bytes"));
        }
        if let Some(dir) = &cmd.working_directory {
            if dir.as_os_str().is_empty() {
                return Err(invalid("working_directory must not be empty when given"));
            }
        }
        for (key, value) in &cmd.env_overrides {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(invalid(format!("invalid environment variable name '{key}'")));
            }
            if value.contains('\0') {
                return Err(invalid(format!(
                    "environment variable '{key}' contains a NUL byte"
                )));
            }
        }
        if cmd.timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("timeout must be greater than zero"));
        }

        cmd.progress_pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|e| invalid(format!("invalid progress_pattern '{pattern}': {e}")))
            })
            .transpose()
    }
}

fn invalid(msg: impl Into<String>) -> JobwardenError {
    JobwardenError::InvalidRequest(msg.into())
}
