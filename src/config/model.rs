// src/config/model.rs

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [scheduler]
/// max_workers = 4
///
/// [supervisor]
/// grace_period = "5s"
/// kill_wait = "2s"
///
/// [logs]
/// max_retained_lines = 10000
/// subscriber_queue = 1024
///
/// [retention]
/// finished_ttl = "1h"
/// max_finished_jobs = 1000
///
/// [server]
/// bind = "127.0.0.1:7878"
/// ```
///
/// All sections are optional and have reasonable defaults. Durations are kept
/// as strings here and only parsed during validation (see `validate.rs`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: RawSchedulerSection,

    #[serde(default)]
    pub supervisor: RawSupervisorSection,

    #[serde(default)]
    pub logs: RawLogsSection,

    #[serde(default)]
    pub retention: RawRetentionSection,

    #[serde(default)]
    pub server: RawServerSection,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSchedulerSection {
    /// Maximum number of jobs in `Running` at the same time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_max_workers() -> usize {
    4
}

impl Default for RawSchedulerSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

/// `[supervisor]` section: how process groups are stopped.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSupervisorSection {
    /// Time between SIGTERM and SIGKILL.
    #[serde(default = "default_grace_period")]
    pub grace_period: String,

    /// How long to wait for the group to disappear after SIGKILL.
    #[serde(default = "default_kill_wait")]
    pub kill_wait: String,

    /// How long to keep reading pipes after the group leader exits.
    #[serde(default = "default_output_drain")]
    pub output_drain: String,
}

fn default_grace_period() -> String {
    "5s".to_string()
}

fn default_kill_wait() -> String {
    "2s".to_string()
}

fn default_output_drain() -> String {
    "1s".to_string()
}

impl Default for RawSupervisorSection {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            kill_wait: default_kill_wait(),
            output_drain: default_output_drain(),
        }
    }
}

/// `[logs]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLogsSection {
    /// Lines retained per job for late subscribers. `0` means unbounded.
    #[serde(default = "default_max_retained_lines")]
    pub max_retained_lines: usize,

    /// Outbound queue length per subscriber before it is disconnected.
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
}

fn default_max_retained_lines() -> usize {
    10_000
}

fn default_subscriber_queue() -> usize {
    1024
}

impl Default for RawLogsSection {
    fn default() -> Self {
        Self {
            max_retained_lines: default_max_retained_lines(),
            subscriber_queue: default_subscriber_queue(),
        }
    }
}

/// `[retention]` section: when finished jobs are forgotten.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRetentionSection {
    #[serde(default = "default_finished_ttl")]
    pub finished_ttl: String,

    #[serde(default = "default_max_finished_jobs")]
    pub max_finished_jobs: usize,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

fn default_finished_ttl() -> String {
    "1h".to_string()
}

fn default_max_finished_jobs() -> usize {
    1000
}

fn default_sweep_interval() -> String {
    "30s".to_string()
}

impl Default for RawRetentionSection {
    fn default() -> Self {
        Self {
            finished_ttl: default_finished_ttl(),
            max_finished_jobs: default_max_finished_jobs(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// `[server]` section for the HTTP transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for RawServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Validated configuration. Only obtainable through
/// `ConfigFile::try_from(RawConfigFile)` or `ConfigFile::default()`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub scheduler: SchedulerConfig,
    pub supervisor: SupervisorConfig,
    pub logs: LogConfig,
    pub retention: RetentionConfig,
    pub server: ServerConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig {
                max_workers: default_max_workers(),
            },
            supervisor: SupervisorConfig::default(),
            logs: LogConfig::default(),
            retention: RetentionConfig::default(),
            server: ServerConfig {
                bind: SocketAddr::from(([127, 0, 0, 1], 7878)),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub grace_period: Duration,
    pub kill_wait: Duration,
    pub output_drain: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            kill_wait: Duration::from_secs(2),
            output_drain: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    /// `None` means unbounded retention.
    pub max_retained_lines: Option<usize>,
    pub subscriber_queue: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_retained_lines: Some(default_max_retained_lines()),
            subscriber_queue: default_subscriber_queue(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    pub finished_ttl: Duration,
    pub max_finished_jobs: usize,
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            finished_ttl: Duration::from_secs(60 * 60),
            max_finished_jobs: default_max_finished_jobs(),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}
