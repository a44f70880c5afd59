use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use chrono::Utc;
use jobwarden::exec::{
    BoxFuture, OutputEvent, ProcessBackend, ProcessExit, ProcessHandle, SpawnError,
    TerminationPolicy, TerminationReport,
};
use jobwarden::jobs::CommandSpec;
use jobwarden::types::StreamKind;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

/// A latch a test opens to let `Script::Gated` processes exit.
#[derive(Clone)]
pub struct Gate {
    tx: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    fn receiver(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// What a scripted "process" does.
#[derive(Clone)]
pub enum Script {
    /// Print `lines`, then exit with `code`.
    Exit {
        lines: Vec<(StreamKind, String)>,
        code: i32,
    },
    /// Print `lines`, then run until terminated.
    Hang { lines: Vec<(StreamKind, String)> },
    /// Print `lines`, then exit with `code` once `gate` opens.
    Gated {
        lines: Vec<(StreamKind, String)>,
        gate: Gate,
        code: i32,
    },
    /// Fail to launch as if the executable did not exist.
    SpawnFail,
}

impl Script {
    pub fn exit(code: i32) -> Self {
        Script::Exit {
            lines: Vec::new(),
            code,
        }
    }

    pub fn stdout_then_exit(lines: &[&str], code: i32) -> Self {
        Script::Exit {
            lines: lines
                .iter()
                .map(|l| (StreamKind::Stdout, l.to_string()))
                .collect(),
            code,
        }
    }

    pub fn hang() -> Self {
        Script::Hang { lines: Vec::new() }
    }

    pub fn gated(gate: &Gate) -> Self {
        Script::Gated {
            lines: Vec::new(),
            gate: gate.clone(),
            code: 0,
        }
    }
}

#[derive(Default)]
struct Stats {
    live: AtomicUsize,
    peak: AtomicUsize,
    next_pid: AtomicU32,
    launched: Mutex<Vec<String>>,
}

impl Stats {
    fn started(&self, program: &str) -> u32 {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        self.launched.lock().push(program.to_string());
        self.next_pid.fetch_add(1, Ordering::SeqCst) + 1000
    }

    fn ended(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A `ProcessBackend` that never touches the OS.
///
/// Behaviour is looked up by program name; unknown programs exit 0 with no
/// output.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    stats: Arc<Stats>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, program: &str, script: Script) -> Self {
        self.set_script(program, script);
        self
    }

    pub fn set_script(&self, program: &str, script: Script) {
        self.scripts.lock().insert(program.to_string(), script);
    }

    /// Processes currently running.
    pub fn live(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }

    /// Highest number of processes that were ever running at once.
    pub fn peak(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// Programs launched so far, in launch order.
    pub fn launched(&self) -> Vec<String> {
        self.stats.launched.lock().clone()
    }
}

impl ProcessBackend for ScriptedBackend {
    fn launch(
        &self,
        spec: &CommandSpec,
        output: mpsc::Sender<OutputEvent>,
    ) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        let script = self
            .scripts
            .lock()
            .get(&spec.program)
            .cloned()
            .unwrap_or_else(|| Script::exit(0));

        let (lines, ending) = match script {
            Script::SpawnFail => {
                return Err(SpawnError::NotFound {
                    program: spec.program.clone(),
                });
            }
            Script::Exit { lines, code } => (lines, Ending::Exit(code)),
            Script::Hang { lines } => (lines, Ending::Hang),
            Script::Gated { lines, gate, code } => (lines, Ending::Gate(gate.receiver(), code)),
        };

        let pid = self.stats.started(&spec.program);
        Ok(Box::new(ScriptedProcess {
            pid,
            pending: lines
                .into_iter()
                .map(|(stream, payload)| OutputEvent::Line {
                    stream,
                    payload,
                    timestamp: Utc::now(),
                })
                .collect(),
            output: Some(output),
            ending,
            exit: None,
            stats: self.stats.clone(),
        }))
    }
}

enum Ending {
    Exit(i32),
    Hang,
    Gate(watch::Receiver<bool>, i32),
}

struct ScriptedProcess {
    pid: u32,
    pending: VecDeque<OutputEvent>,
    output: Option<mpsc::Sender<OutputEvent>>,
    ending: Ending,
    exit: Option<ProcessExit>,
    stats: Arc<Stats>,
}

impl ScriptedProcess {
    /// Send remaining lines. Safe to cancel: a line leaves `pending` only
    /// after it was delivered.
    async fn flush(&mut self) {
        while let Some(event) = self.pending.front().cloned() {
            let Some(tx) = &self.output else {
                self.pending.clear();
                return;
            };
            if tx.send(event).await.is_err() {
                self.pending.clear();
                return;
            }
            self.pending.pop_front();
        }
    }

    fn record_exit(&mut self, exit: ProcessExit) -> ProcessExit {
        if self.exit.is_none() {
            self.stats.ended();
            self.output = None;
            self.exit = Some(exit.clone());
        }
        self.exit.clone().unwrap_or(exit)
    }
}

impl ProcessHandle for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn wait(&mut self) -> BoxFuture<'_, ProcessExit> {
        Box::pin(async move {
            if let Some(exit) = &self.exit {
                return exit.clone();
            }
            self.flush().await;
            let exit = match &mut self.ending {
                Ending::Exit(code) => ProcessExit::Code(*code),
                Ending::Hang => std::future::pending().await,
                Ending::Gate(rx, code) => {
                    let code = *code;
                    let _ = rx.wait_for(|open| *open).await;
                    ProcessExit::Code(code)
                }
            };
            self.record_exit(exit)
        })
    }

    fn terminate(&mut self, _policy: TerminationPolicy) -> BoxFuture<'_, TerminationReport> {
        Box::pin(async move {
            self.pending.clear();
            self.record_exit(ProcessExit::Signal(15));
            TerminationReport {
                escalated: false,
                group_gone: true,
            }
        })
    }
}

impl Drop for ScriptedProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            self.stats.ended();
        }
    }
}
