// src/exec/supervisor.rs

//! Real process supervision on top of `tokio::process`.
//!
//! Every job runs as the leader of its own process group so that
//! termination can reach the whole descendant tree. Signals go to the group,
//! never to the single leader PID. Non-Unix targets only kill the direct
//! child.

use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::exec::backend::{
    BoxFuture, OutputEvent, ProcessBackend, ProcessExit, ProcessHandle, SpawnError,
    TerminationPolicy, TerminationReport,
};
use crate::exec::output::spawn_line_reader;
use crate::jobs::CommandSpec;
use crate::types::StreamKind;

/// How often group liveness is polled while waiting for termination.
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// `now + wait`, saturating instead of overflowing for huge waits.
fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

/// Roughly thirty years; stands in for "never" in deadlines.
const FAR_FUTURE_SECS: u64 = 86_400 * 365 * 30;

/// Backend that spawns real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

impl SystemBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessBackend for SystemBackend {
    fn launch(
        &self,
        spec: &CommandSpec,
        output: mpsc::Sender<OutputEvent>,
    ) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        if let Some(dir) = &spec.working_directory {
            if !dir.is_dir() {
                return Err(SpawnError::InvalidWorkingDirectory { path: dir.clone() });
            }
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env_overrides)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_directory {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| classify_spawn_error(spec, e))?;
        let pid = child.id();

        info!(?pid, program = %spec.program, "spawned process group");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, StreamKind::Stdout, output.clone(), pid));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, StreamKind::Stderr, output, pid));
        }

        Ok(Box::new(SystemProcess {
            child,
            pid,
            exit: None,
            readers,
        }))
    }
}

fn classify_spawn_error(spec: &CommandSpec, err: std::io::Error) -> SpawnError {
    let program = spec.program.clone();
    match err.kind() {
        ErrorKind::NotFound => SpawnError::NotFound { program },
        ErrorKind::PermissionDenied => SpawnError::PermissionDenied { program },
        _ => SpawnError::Io {
            program,
            source: err,
        },
    }
}

/// Handle to a spawned process group.
pub struct SystemProcess {
    child: Child,
    pid: Option<u32>,
    /// Set once the leader has been reaped.
    exit: Option<ProcessExit>,
    readers: Vec<JoinHandle<()>>,
}

impl SystemProcess {
    fn record_exit(&mut self, result: std::io::Result<ExitStatus>) -> ProcessExit {
        let exit = match result {
            Ok(status) => exit_from_status(status),
            Err(e) => ProcessExit::Unknown(e.to_string()),
        };
        debug!(pid = ?self.pid, ?exit, "process leader reaped");
        self.exit = Some(exit.clone());
        exit
    }

    /// Reap the leader, then poll until no group member is left or
    /// `deadline` passes. Returns whether the group is gone.
    #[cfg(unix)]
    async fn wait_group_gone(&mut self, pgid: nix::unistd::Pid, deadline: Instant) -> bool {
        if self.exit.is_none() {
            match tokio::time::timeout_at(deadline, self.child.wait()).await {
                Ok(result) => {
                    self.record_exit(result);
                }
                Err(_) => return false,
            }
        }

        loop {
            if !group_alive(pgid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(GROUP_POLL_INTERVAL).await;
        }
    }

    #[cfg(unix)]
    async fn terminate_group(&mut self, policy: TerminationPolicy) -> TerminationReport {
        use nix::sys::signal::Signal;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            // Never had a pid: the process was already reaped before we looked.
            return TerminationReport {
                escalated: false,
                group_gone: true,
            };
        };
        let pgid = Pid::from_raw(pid as i32);

        send_group_signal(pgid, Signal::SIGTERM);

        let grace_deadline = deadline_after(policy.grace_period);
        if self.wait_group_gone(pgid, grace_deadline).await {
            debug!(pid, "process group exited within grace period");
            return TerminationReport {
                escalated: false,
                group_gone: true,
            };
        }

        warn!(
            pid,
            grace_ms = policy.grace_period.as_millis() as u64,
            "process group survived SIGTERM; escalating to SIGKILL"
        );
        send_group_signal(pgid, Signal::SIGKILL);

        let kill_deadline = deadline_after(policy.kill_wait);
        let group_gone = self.wait_group_gone(pgid, kill_deadline).await;
        if !group_gone {
            warn!(pid, "process group still present after SIGKILL");
        }

        TerminationReport {
            escalated: true,
            group_gone,
        }
    }

    #[cfg(not(unix))]
    async fn terminate_group(&mut self, policy: TerminationPolicy) -> TerminationReport {
        if self.exit.is_some() {
            return TerminationReport {
                escalated: false,
                group_gone: true,
            };
        }
        if let Err(e) = self.child.start_kill() {
            warn!(pid = ?self.pid, error = %e, "failed to kill child process");
        }
        let deadline = deadline_after(policy.kill_wait);
        let group_gone = match tokio::time::timeout_at(deadline, self.child.wait()).await {
            Ok(result) => {
                self.record_exit(result);
                true
            }
            Err(_) => false,
        };
        TerminationReport {
            escalated: true,
            group_gone,
        }
    }
}

impl ProcessHandle for SystemProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn wait(&mut self) -> BoxFuture<'_, ProcessExit> {
        Box::pin(async move {
            if let Some(exit) = &self.exit {
                return exit.clone();
            }
            let result = self.child.wait().await;
            self.record_exit(result)
        })
    }

    fn terminate(&mut self, policy: TerminationPolicy) -> BoxFuture<'_, TerminationReport> {
        Box::pin(self.terminate_group(policy))
    }
}

impl Drop for SystemProcess {
    fn drop(&mut self) {
        #[cfg(unix)]
        if self.exit.is_none() {
            if let Some(pid) = self.pid {
                send_group_signal(
                    nix::unistd::Pid::from_raw(pid as i32),
                    nix::sys::signal::Signal::SIGKILL,
                );
            }
        }
        for reader in &self.readers {
            reader.abort();
        }
    }
}

fn exit_from_status(status: ExitStatus) -> ProcessExit {
    if let Some(code) = status.code() {
        return ProcessExit::Code(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ProcessExit::Signal(signal);
        }
    }

    ProcessExit::Unknown(format!("no exit code in status {status}"))
}

#[cfg(unix)]
fn send_group_signal(pgid: nix::unistd::Pid, signal: nix::sys::signal::Signal) {
    match nix::sys::signal::killpg(pgid, signal) {
        Ok(()) => debug!(pgid = pgid.as_raw(), ?signal, "signalled process group"),
        Err(nix::errno::Errno::ESRCH) => {
            debug!(pgid = pgid.as_raw(), ?signal, "process group already gone")
        }
        Err(e) => warn!(pgid = pgid.as_raw(), ?signal, error = %e, "killpg failed"),
    }
}

/// Signal 0 probes for existence; only ESRCH means nobody is left.
#[cfg(unix)]
fn group_alive(pgid: nix::unistd::Pid) -> bool {
    !matches!(
        nix::sys::signal::killpg(pgid, None),
        Err(nix::errno::Errno::ESRCH)
    )
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spec(program: &str, args: &[&str]) -> CommandSpec {
        let mut spec = CommandSpec::new(program);
        spec.args = args.iter().map(|s| s.to_string()).collect();
        spec
    }

    async fn collect_lines(rx: &mut mpsc::Receiver<OutputEvent>) -> Vec<(StreamKind, String)> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            if let OutputEvent::Line {
                stream, payload, ..
            } = event
            {
                out.push((stream, payload));
            }
        }
        out
    }

    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut process = SystemBackend
            .launch(&spec("sh", &["-c", "echo out; echo err >&2; exit 3"]), tx)
            .unwrap();

        assert_eq!(process.wait().await, ProcessExit::Code(3));
        // Reaped state is cached.
        assert_eq!(process.wait().await, ProcessExit::Code(3));

        let lines = collect_lines(&mut rx).await;
        assert!(lines.contains(&(StreamKind::Stdout, "out".to_string())));
        assert!(lines.contains(&(StreamKind::Stderr, "err".to_string())));
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let (tx, _rx) = mpsc::channel(1);
        let err = SystemBackend
            .launch(&spec("/no/such/binary", &[]), tx)
            .err()
            .unwrap();
        assert!(matches!(err, SpawnError::NotFound { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_working_directory_is_rejected_before_spawn() {
        let (tx, _rx) = mpsc::channel(1);
        let mut s = spec("true", &[]);
        s.working_directory = Some("/no/such/dir".into());
        let err = SystemBackend.launch(&s, tx).err().unwrap();
        assert!(matches!(err, SpawnError::InvalidWorkingDirectory { .. }));
    }

    #[tokio::test]
    async fn applies_env_overrides_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let mut s = spec("sh", &["-c", "echo $JOBWARDEN_TEST_VAR; pwd"]);
        s.env_overrides
            .insert("JOBWARDEN_TEST_VAR".into(), "from-env".into());
        s.working_directory = Some(dir.path().to_path_buf());

        let mut process = SystemBackend.launch(&s, tx).unwrap();
        assert_eq!(process.wait().await, ProcessExit::Code(0));

        let lines: Vec<String> = collect_lines(&mut rx).await.into_iter().map(|l| l.1).collect();
        assert_eq!(lines[0], "from-env");
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(std::path::Path::new(&lines[1]).canonicalize().unwrap(), expected);
    }

    #[tokio::test]
    async fn sigterm_stops_cooperative_process() {
        let (tx, _rx) = mpsc::channel(16);
        let mut process = SystemBackend.launch(&spec("sleep", &["100"]), tx).unwrap();

        let report = process
            .terminate(TerminationPolicy {
                grace_period: Duration::from_secs(5),
                kill_wait: Duration::from_secs(2),
            })
            .await;

        assert!(!report.escalated);
        assert!(report.group_gone);
        assert_eq!(process.wait().await, ProcessExit::Signal(15));
    }

    #[test]
    fn huge_waits_saturate_instead_of_overflowing() {
        let before = Instant::now();
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline >= before + Duration::from_secs(FAR_FUTURE_SECS));
    }

    #[tokio::test]
    async fn sigterm_with_unbounded_grace_period() {
        let (tx, _rx) = mpsc::channel(16);
        let mut process = SystemBackend.launch(&spec("sleep", &["100"]), tx).unwrap();

        let report = process
            .terminate(TerminationPolicy {
                grace_period: Duration::MAX,
                kill_wait: Duration::MAX,
            })
            .await;

        assert!(!report.escalated);
        assert!(report.group_gone);
        assert_eq!(process.wait().await, ProcessExit::Signal(15));
    }

    #[tokio::test]
    async fn escalates_when_sigterm_is_ignored() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut process = SystemBackend
            .launch(
                &spec("sh", &["-c", "trap '' TERM; echo ready; while :; do sleep 1; done"]),
                tx,
            )
            .unwrap();

        // Make sure the trap is installed before signalling.
        assert!(matches!(rx.recv().await, Some(OutputEvent::Line { .. })));

        let report = process
            .terminate(TerminationPolicy {
                grace_period: Duration::from_millis(300),
                kill_wait: Duration::from_secs(2),
            })
            .await;

        assert!(report.escalated);
        assert_eq!(process.wait().await, ProcessExit::Signal(9));
    }
}
