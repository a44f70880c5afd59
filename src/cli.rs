// src/cli.rs

//! CLI argument parsing using `clap`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::duration::parse_duration;
use crate::types::JobKind;

/// Command-line arguments for `jobwarden`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobwarden",
    version,
    about = "Run external commands as supervised, observable jobs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `$JOBWARDEN_CONFIG`, else `Jobwarden.toml` in the current
    /// working directory if it exists, else built-in defaults.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBWARDEN_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load + validate config, print what would run, but don't start anything.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Serve the REST/SSE API until Ctrl-C.
    Serve {
        /// Address to listen on; overrides `[server].bind`.
        #[arg(long, value_name = "ADDR")]
        bind: Option<SocketAddr>,
    },

    /// Run a single job in the foreground and stream its events.
    Run(RunArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Job kind tag (template_create, build, launch, custom).
    #[arg(long, default_value = "custom", value_name = "KIND")]
    pub kind: JobKind,

    /// Working directory for the process.
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Extra environment variable, repeatable.
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Cancel the job after this long, e.g. `30s` or `5m`.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Regex whose first capture group on stdout is the progress percentage.
    #[arg(long, value_name = "REGEX")]
    pub progress_pattern: Option<String>,

    /// Program and its arguments (after `--`).
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "PROGRAM"
    )]
    pub command: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
