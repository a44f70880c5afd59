// src/lib.rs

pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod http;
pub mod jobs;
pub mod logging;
pub mod logs;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::JobService;
use crate::cli::{CliArgs, Command, RunArgs};
use crate::config::ConfigFile;
use crate::config::loader::resolve_config;
use crate::jobs::{CommandSpec, JobRequest};
use crate::logs::JobEvent;
use crate::types::{JobId, JobState, StreamKind};

/// Process exit status used when a foreground job was cancelled.
pub const EXIT_CANCELLED: i32 = 130;

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading
/// - the job service (store, scheduler, retention janitor)
/// - either the HTTP transport or a single foreground job
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = resolve_config(args.config.as_deref())?;

    match args.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or(cfg.server.bind);
            if args.dry_run {
                print_dry_run(&cfg, Some(bind), None);
                return Ok(0);
            }
            serve(cfg, bind).await?;
            Ok(0)
        }
        Command::Run(run_args) => {
            let request = request_from_args(run_args);
            if args.dry_run {
                print_dry_run(&cfg, None, Some(&request));
                return Ok(0);
            }
            run_foreground(cfg, request).await
        }
    }
}

/// Serve the API until Ctrl-C, then cancel all jobs and stop the server.
async fn serve(cfg: ConfigFile, bind: SocketAddr) -> Result<()> {
    let service = Arc::new(JobService::start(cfg));
    let stop_server = CancellationToken::new();
    let mut server = tokio::spawn(http::serve(service.clone(), bind, stop_server.clone()));

    tokio::select! {
        result = &mut server => {
            // The server stopped on its own (e.g. bind failure).
            service.shutdown().await?;
            result??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for Ctrl+C; shutting down");
            } else {
                info!("Ctrl+C received; shutting down");
            }
        }
    }

    // Cancel jobs first so open SSE streams end and graceful shutdown can finish.
    service.shutdown().await?;
    stop_server.cancel();
    server.await??;
    Ok(())
}

/// Run one job, mirror its output to stdout/stderr, and map its final state
/// to an exit code.
async fn run_foreground(cfg: ConfigFile, request: JobRequest) -> Result<i32> {
    let service = JobService::start(cfg);
    let id = service.create_job(request)?;
    info!(job_id = %id, "job submitted");

    let mut subscription = service.subscribe(id)?;
    let mut printer = EventPrinter::new(id);
    let mut cancel_sent = false;

    loop {
        tokio::select! {
            received = subscription.recv() => match received {
                Ok(Some(event)) => printer.print(&event),
                Ok(None) => break,
                Err(e) => {
                    // Fell behind; resubscribe and skip what was already printed.
                    warn!(job_id = %id, error = %e, "event stream overflowed; resubscribing");
                    subscription = service.subscribe(id)?;
                }
            },
            signal = tokio::signal::ctrl_c(), if !cancel_sent => {
                cancel_sent = true;
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                } else {
                    info!(job_id = %id, "Ctrl+C received; cancelling job");
                    service.cancel_job(id)?;
                }
            }
        }
    }

    let snapshot = service.get_job(id)?;
    service.shutdown().await?;

    let code = match snapshot.state {
        JobState::Completed => 0,
        JobState::Failed => snapshot.exit_code.unwrap_or(1),
        JobState::Cancelled => EXIT_CANCELLED,
        JobState::Queued | JobState::Running => 1,
    };
    debug!(job_id = %id, state = %snapshot.state, code, "foreground job finished");
    Ok(code)
}

/// Prints job events, skipping anything already shown before a resubscribe.
struct EventPrinter {
    job_id: JobId,
    next_seq: u64,
    last_state: Option<JobState>,
}

impl EventPrinter {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            next_seq: 0,
            last_state: None,
        }
    }

    fn print(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Log(line) => {
                if line.sequence < self.next_seq {
                    return;
                }
                self.next_seq = line.sequence + 1;
                match line.stream {
                    StreamKind::Stdout => println!("{}", line.payload),
                    StreamKind::Stderr => eprintln!("{}", line.payload),
                }
            }
            JobEvent::Status { state } => {
                if self.last_state == Some(*state) {
                    return;
                }
                self.last_state = Some(*state);
                info!(job_id = %self.job_id, %state, "job state changed");
            }
            JobEvent::Progress { value } => {
                info!(job_id = %self.job_id, progress = ?value, "job progress");
            }
            JobEvent::Gap { dropped, next_seq } => {
                if *next_seq > self.next_seq {
                    warn!(job_id = %self.job_id, dropped, "earlier output was not retained");
                    self.next_seq = *next_seq;
                }
            }
        }
    }
}

fn request_from_args(args: RunArgs) -> JobRequest {
    let mut words = args.command.into_iter();
    let program = words.next().unwrap_or_default();

    JobRequest::new(
        args.kind,
        CommandSpec {
            program,
            args: words.collect(),
            working_directory: args.cwd,
            env_overrides: args.env.into_iter().collect(),
            timeout: args.timeout,
            progress_pattern: args.progress_pattern,
        },
    )
}

/// Simple dry-run output: print the effective config and what would run.
fn print_dry_run(cfg: &ConfigFile, bind: Option<SocketAddr>, request: Option<&JobRequest>) {
    println!("jobwarden dry-run");
    println!("  scheduler.max_workers = {}", cfg.scheduler.max_workers);
    println!("  supervisor.grace_period = {:?}", cfg.supervisor.grace_period);
    println!("  supervisor.kill_wait = {:?}", cfg.supervisor.kill_wait);
    println!("  supervisor.output_drain = {:?}", cfg.supervisor.output_drain);
    match cfg.logs.max_retained_lines {
        Some(n) => println!("  logs.max_retained_lines = {n}"),
        None => println!("  logs.max_retained_lines = unbounded"),
    }
    println!("  logs.subscriber_queue = {}", cfg.logs.subscriber_queue);
    println!("  retention.finished_ttl = {:?}", cfg.retention.finished_ttl);
    println!(
        "  retention.max_finished_jobs = {}",
        cfg.retention.max_finished_jobs
    );
    println!("  retention.sweep_interval = {:?}", cfg.retention.sweep_interval);

    if let Some(bind) = bind {
        println!();
        println!("would serve on {bind}");
    }

    if let Some(request) = request {
        let cmd = &request.command;
        println!();
        println!("job ({}):", request.kind);
        println!("      cmd: {}", cmd.display_line());
        if let Some(ref dir) = cmd.working_directory {
            println!("      cwd: {}", dir.display());
        }
        if !cmd.env_overrides.is_empty() {
            println!("      env: {:?}", cmd.env_overrides);
        }
        if let Some(timeout) = cmd.timeout {
            println!("      timeout: {timeout:?}");
        }
        if let Some(ref pattern) = cmd.progress_pattern {
            println!("      progress_pattern: {pattern}");
        }
        if let Err(e) = request.validate() {
            println!("      invalid: {e}");
        }
    }

    debug!("dry-run complete (no execution)");
}
