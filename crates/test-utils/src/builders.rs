#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use jobwarden::config::ConfigFile;
use jobwarden::config::model::RawConfigFile;
use jobwarden::jobs::{CommandSpec, JobRequest};
use jobwarden::types::JobKind;

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from built-in defaults but with short supervisor timings, so
/// termination tests do not wait seconds for escalation.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.supervisor.grace_period = "500ms".to_string();
        config.supervisor.kill_wait = "500ms".to_string();
        config.supervisor.output_drain = "200ms".to_string();
        Self { config }
    }

    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.config.scheduler.max_workers = n;
        self
    }

    pub fn with_grace_period(mut self, value: &str) -> Self {
        self.config.supervisor.grace_period = value.to_string();
        self
    }

    pub fn with_kill_wait(mut self, value: &str) -> Self {
        self.config.supervisor.kill_wait = value.to_string();
        self
    }

    pub fn with_max_retained_lines(mut self, n: usize) -> Self {
        self.config.logs.max_retained_lines = n;
        self
    }

    pub fn with_subscriber_queue(mut self, n: usize) -> Self {
        self.config.logs.subscriber_queue = n;
        self
    }

    pub fn with_finished_ttl(mut self, value: &str) -> Self {
        self.config.retention.finished_ttl = value.to_string();
        self
    }

    pub fn with_max_finished_jobs(mut self, n: usize) -> Self {
        self.config.retention.max_finished_jobs = n;
        self
    }

    pub fn with_sweep_interval(mut self, value: &str) -> Self {
        self.config.retention.sweep_interval = value.to_string();
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobRequest`.
pub struct JobRequestBuilder {
    request: JobRequest,
}

impl JobRequestBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            request: JobRequest::new(JobKind::Custom, CommandSpec::new(program)),
        }
    }

    /// `sh -c <script>`.
    pub fn shell(script: &str) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn kind(mut self, kind: JobKind) -> Self {
        self.request.kind = kind;
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.request.command.args.push(arg.to_string());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.request.command.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.request
            .command
            .env_overrides
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.request.command.timeout = Some(limit);
        self
    }

    pub fn progress_pattern(mut self, pattern: &str) -> Self {
        self.request.command.progress_pattern = Some(pattern.to_string());
        self
    }

    pub fn build(self) -> JobRequest {
        self.request
    }
}
