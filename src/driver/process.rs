//! `ProcessDriver`: the one `SandboxDriver` implementation shipped with this
//! crate. Spawns an external sandbox-runtime binary as a child process and
//! talks to it over piped stdio.
//!
//! The wire format between this driver and the child process is
//! deliberately unspecified here (see Non-goals): we only need *a* format to
//! have a working driver, and use one newline-delimited JSON command/event
//! per line. A production deployment swaps the binary and, if needed, this
//! module's framing, without touching the manager above it.
//!
//! Process lifecycle (spawn, piped stdio, a background task draining
//! stdout/stderr, and termination on drop or explicit `terminate`) follows
//! the same shape as a Jupyter-style kernel driver: one long-lived child
//! process per kernel, reaped explicitly rather than left to the OS.
//!
//! `stdin`, `status`, `pending_outcome` and `initialized` all sit behind
//! interior mutability so `execute`/`input_reply`/`interrupt`/`terminate`
//! can all run concurrently through a shared `&self` — a pending `execute`
//! must never block an `interrupt` meant to cut it short.

use crate::driver::events::EventRecord;
use crate::driver::interrupt_channel::InterruptChannel;
use crate::driver::traits::{DriverStatus, ExecuteOutcome, ExecuteStatus, InitOptions, KernelMode, Language, SandboxDriver};
use crate::types::{Error, ExecutionId, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};

const STATUS_STARTING: u8 = 0;
const STATUS_IDLE: u8 = 1;
const STATUS_BUSY: u8 = 2;
const STATUS_ERROR: u8 = 3;

fn status_from_code(code: u8) -> DriverStatus {
    match code {
        STATUS_STARTING => DriverStatus::Starting,
        STATUS_IDLE => DriverStatus::Idle,
        STATUS_BUSY => DriverStatus::Busy,
        _ => DriverStatus::Error,
    }
}

/// One line written to the child's stdin.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum DriverCommand {
    Initialize { opts: InitOptions },
    Execute { code: String, parent: ExecutionId },
    InputReply { value: String },
    Interrupt,
}

/// One line read from the child's stdout: either a mid-execution event, or
/// the terminal outcome of the `execute` call currently in flight.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum DriverLine {
    Event(EventRecord),
    Outcome(ExecuteOutcome),
    Ready,
}

/// Configuration needed to spawn a driver process. Constructed by the
/// manager from `Config`, not exposed on the wire.
#[derive(Debug, Clone)]
pub struct ProcessDriverSpawnConfig {
    pub binary: String,
    pub args: Vec<String>,
    pub mode: KernelMode,
    pub language: Language,
}

#[derive(Debug)]
pub struct ProcessDriver {
    mode: KernelMode,
    #[allow(dead_code)]
    language: Language,
    child: StdMutex<Option<Child>>,
    stdin: TokioMutex<Option<ChildStdin>>,
    status: Arc<AtomicU8>,
    interrupt_channel: Option<InterruptChannel>,
    pending_outcome: Arc<TokioMutex<Option<oneshot::Sender<ExecuteOutcome>>>>,
    initialized: AtomicBool,
}

impl ProcessDriver {
    /// Spawn the child process. Does not yet send `initialize` — callers
    /// drive the `SandboxDriver` trait's `initialize` for that, keeping the
    /// one-shot contract in one place.
    pub async fn spawn(spawn_config: &ProcessDriverSpawnConfig) -> Result<Self> {
        let mut command = Command::new(&spawn_config.binary);
        command
            .args(&spawn_config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::init_failed(format!("failed to spawn sandbox runtime: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::init_failed("child process had no stdin"))?;

        let interrupt_channel = match spawn_config.mode {
            KernelMode::Sandboxed => Some(InterruptChannel::new()),
            KernelMode::InProcess => None,
        };

        Ok(Self {
            mode: spawn_config.mode,
            language: spawn_config.language,
            child: StdMutex::new(Some(child)),
            stdin: TokioMutex::new(Some(stdin)),
            status: Arc::new(AtomicU8::new(STATUS_STARTING)),
            interrupt_channel,
            pending_outcome: Arc::new(TokioMutex::new(None)),
            initialized: AtomicBool::new(false),
        })
    }

    /// Reference to the shared interrupt byte, for the manager to wire up
    /// `interrupt()` plumbing outside any driver-level lock (sandboxed mode
    /// only).
    pub fn interrupt_channel(&self) -> Option<InterruptChannel> {
        self.interrupt_channel.clone()
    }

    async fn write_command(&self, command: DriverCommand) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| Error::driver_gone("driver process has no stdin"))?;
        let mut line = serde_json::to_string(&command).map_err(Error::from)?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::driver_gone(format!("write to driver failed: {}", e)))?;
        Ok(())
    }

    fn spawn_stdout_pump(
        &self,
        mut stdout_lines: tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
        events_tx: mpsc::Sender<EventRecord>,
        status: Arc<AtomicU8>,
        pending_outcome: Arc<TokioMutex<Option<oneshot::Sender<ExecuteOutcome>>>>,
    ) {
        tokio::spawn(async move {
            loop {
                match stdout_lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<DriverLine>(&line) {
                            Ok(DriverLine::Event(event)) => {
                                let _ = events_tx.send(event).await;
                            }
                            Ok(DriverLine::Outcome(outcome)) => {
                                status.store(STATUS_IDLE, Ordering::SeqCst);
                                let mut slot = pending_outcome.lock().await;
                                if let Some(tx) = slot.take() {
                                    let _ = tx.send(outcome);
                                }
                            }
                            Ok(DriverLine::Ready) => {
                                status.store(STATUS_IDLE, Ordering::SeqCst);
                            }
                            Err(e) => {
                                tracing::warn!("unparseable driver line, ignoring: {}", e);
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::warn!("driver stdout closed; marking driver gone");
                        status.store(STATUS_ERROR, Ordering::SeqCst);
                        let mut slot = pending_outcome.lock().await;
                        if let Some(tx) = slot.take() {
                            let _ = tx.send(ExecuteOutcome::error(
                                "DriverGone",
                                "driver process exited unexpectedly",
                                Vec::new(),
                            ));
                        }
                        let _ = events_tx
                            .send(EventRecord::ExecuteError {
                                ename: "DriverGone".to_string(),
                                evalue: "driver process exited unexpectedly".to_string(),
                                traceback: Vec::new(),
                            })
                            .await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("error reading driver stdout: {}", e);
                        status.store(STATUS_ERROR, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });
    }

    fn spawn_stderr_pump(&self, stderr_lines: tokio::io::Lines<BufReader<tokio::process::ChildStderr>>) {
        let mut stderr_lines = stderr_lines;
        tokio::spawn(async move {
            while let Ok(Some(line)) = stderr_lines.next_line().await {
                tracing::debug!(target: "sandbox_runtime_stderr", "{}", line);
            }
        });
    }
}

#[async_trait]
impl SandboxDriver for ProcessDriver {
    async fn initialize(&mut self, opts: InitOptions, events: mpsc::Sender<EventRecord>) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Err(Error::init_failed("driver already initialized"));
        }

        let (stdout, stderr) = {
            let mut guard = self.child.lock().expect("driver child mutex poisoned");
            let child = guard
                .as_mut()
                .ok_or_else(|| Error::init_failed("driver process not spawned"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| Error::init_failed("child process had no stdout"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| Error::init_failed("child process had no stderr"))?;
            (stdout, stderr)
        };

        self.spawn_stdout_pump(
            BufReader::new(stdout).lines(),
            events.clone(),
            self.status.clone(),
            self.pending_outcome.clone(),
        );
        self.spawn_stderr_pump(BufReader::new(stderr).lines());

        self.write_command(DriverCommand::Initialize { opts }).await?;
        self.initialized.store(true, Ordering::SeqCst);
        self.status.store(STATUS_STARTING, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, code: String, parent: ExecutionId) -> Result<ExecuteOutcome> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::not_initialized("driver has not completed initialize"));
        }
        if status_from_code(self.status.load(Ordering::SeqCst)) == DriverStatus::Error {
            return Err(Error::not_initialized("driver is in a terminal error state"));
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        {
            let mut slot = self.pending_outcome.lock().await;
            *slot = Some(outcome_tx);
        }
        self.status.store(STATUS_BUSY, Ordering::SeqCst);

        self.write_command(DriverCommand::Execute { code, parent }).await?;

        outcome_rx
            .await
            .map_err(|_| Error::driver_gone("driver closed before execution completed"))
    }

    async fn input_reply(&self, value: String) {
        let _ = self.write_command(DriverCommand::InputReply { value }).await;
    }

    fn interrupt(&self) -> bool {
        match &self.interrupt_channel {
            Some(channel) => {
                channel.signal();
                true
            }
            None => false,
        }
    }

    fn status(&self) -> DriverStatus {
        status_from_code(self.status.load(Ordering::SeqCst))
    }

    fn mode(&self) -> KernelMode {
        self.mode
    }

    fn terminate(&self) {
        if let Some(mut child) = self.child.lock().expect("driver child mutex poisoned").take() {
            let _ = child.start_kill();
        }
        self.status.store(STATUS_ERROR, Ordering::SeqCst);
    }
}

impl Drop for ProcessDriver {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.lock().expect("driver child mutex poisoned").take() {
            // kill_on_drop is set, but start_kill proactively avoids waiting
            // on the tokio runtime's drop-time reaper for a process we know
            // is no longer wanted.
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        assert_eq!(status_from_code(STATUS_STARTING), DriverStatus::Starting);
        assert_eq!(status_from_code(STATUS_IDLE), DriverStatus::Idle);
        assert_eq!(status_from_code(STATUS_BUSY), DriverStatus::Busy);
        assert_eq!(status_from_code(STATUS_ERROR), DriverStatus::Error);
    }

    #[test]
    fn driver_command_serializes_with_op_tag() {
        let cmd = DriverCommand::InputReply {
            value: "42".to_string(),
        };
        let v = serde_json::to_value(&cmd).unwrap();
        assert_eq!(v["op"], "input_reply");
        assert_eq!(v["value"], "42");
    }
}
