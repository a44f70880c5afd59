// src/config/validate.rs

use std::net::SocketAddr;
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, LogConfig, RawConfigFile, RetentionConfig, SchedulerConfig, ServerConfig,
    SupervisorConfig,
};
use crate::errors::{JobwardenError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::JobwardenError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        Ok(ConfigFile {
            scheduler: validate_scheduler(&raw)?,
            supervisor: validate_supervisor(&raw)?,
            logs: validate_logs(&raw)?,
            retention: validate_retention(&raw)?,
            server: validate_server(&raw)?,
        })
    }
}

fn validate_scheduler(cfg: &RawConfigFile) -> Result<SchedulerConfig> {
    if cfg.scheduler.max_workers == 0 {
        return Err(JobwardenError::ConfigError(
            "[scheduler].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(SchedulerConfig {
        max_workers: cfg.scheduler.max_workers,
    })
}

fn validate_supervisor(cfg: &RawConfigFile) -> Result<SupervisorConfig> {
    let section = &cfg.supervisor;
    Ok(SupervisorConfig {
        grace_period: duration_field("supervisor", "grace_period", &section.grace_period)?,
        kill_wait: duration_field("supervisor", "kill_wait", &section.kill_wait)?,
        output_drain: duration_field("supervisor", "output_drain", &section.output_drain)?,
    })
}

fn validate_logs(cfg: &RawConfigFile) -> Result<LogConfig> {
    if cfg.logs.subscriber_queue == 0 {
        return Err(JobwardenError::ConfigError(
            "[logs].subscriber_queue must be >= 1 (got 0)".to_string(),
        ));
    }

    // 0 disables trimming entirely.
    let max_retained_lines = match cfg.logs.max_retained_lines {
        0 => None,
        n => Some(n),
    };

    Ok(LogConfig {
        max_retained_lines,
        subscriber_queue: cfg.logs.subscriber_queue,
    })
}

fn validate_retention(cfg: &RawConfigFile) -> Result<RetentionConfig> {
    let section = &cfg.retention;

    if section.max_finished_jobs == 0 {
        return Err(JobwardenError::ConfigError(
            "[retention].max_finished_jobs must be >= 1 (got 0)".to_string(),
        ));
    }

    let sweep_interval = duration_field("retention", "sweep_interval", &section.sweep_interval)?;
    if sweep_interval.is_zero() {
        return Err(JobwardenError::ConfigError(
            "[retention].sweep_interval must be greater than zero".to_string(),
        ));
    }

    Ok(RetentionConfig {
        finished_ttl: duration_field("retention", "finished_ttl", &section.finished_ttl)?,
        max_finished_jobs: section.max_finished_jobs,
        sweep_interval,
    })
}

fn validate_server(cfg: &RawConfigFile) -> Result<ServerConfig> {
    let bind: SocketAddr = cfg.server.bind.trim().parse().map_err(|e| {
        JobwardenError::ConfigError(format!(
            "[server].bind '{}' is not a valid socket address: {}",
            cfg.server.bind, e
        ))
    })?;
    Ok(ServerConfig { bind })
}

fn duration_field(section: &str, key: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| JobwardenError::ConfigError(format!("[{section}].{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(toml_src)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.scheduler.max_workers, 4);
        assert_eq!(cfg.supervisor, SupervisorConfig::default());
        assert_eq!(cfg.logs, LogConfig::default());
        assert_eq!(cfg.retention, RetentionConfig::default());
        assert_eq!(cfg.server.bind, ConfigFile::default().server.bind);
    }

    #[test]
    fn zero_retained_lines_means_unbounded() {
        let cfg = parse("[logs]\nmax_retained_lines = 0\n").unwrap();
        assert_eq!(cfg.logs.max_retained_lines, None);
    }

    #[test]
    fn rejects_zero_workers() {
        let err = parse("[scheduler]\nmax_workers = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn rejects_bad_durations_with_field_name() {
        let err = parse("[supervisor]\ngrace_period = \"soon\"\n").unwrap_err();
        assert!(err.to_string().contains("grace_period"), "got: {err}");

        let err = parse("[retention]\nsweep_interval = \"0s\"\n").unwrap_err();
        assert!(err.to_string().contains("sweep_interval"), "got: {err}");
    }

    #[test]
    fn rejects_bad_bind_address() {
        let err = parse("[server]\nbind = \"localhost\"\n").unwrap_err();
        assert!(err.to_string().contains("bind"), "got: {err}");
    }

    #[test]
    fn rejects_unknown_sections() {
        assert!(parse("[metrics]\nenabled = true\n").is_err());
    }
}
