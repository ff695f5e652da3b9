//! The sandbox driver contract (C1).
//!
//! A driver owns one interpreter in an isolated context: a separate OS
//! thread or process with restricted filesystem/network capabilities. The
//! manager never talks to it except through this trait and the event
//! channel handed to `initialize`.
//!
//! `execute`/`input_reply`/`interrupt`/`status`/`terminate` all take `&self`:
//! a driver is responsible for its own interior synchronization so that a
//! pending `execute` never blocks an `interrupt` or `input_reply` meant to
//! unblock it. Only `initialize` takes `&mut self`, since it runs once while
//! the driver is still exclusively owned, before the manager shares it.

use crate::driver::events::EventRecord;
use crate::types::{ExecutionId, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;

/// Where the interpreter runs relative to the orchestrator process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelMode {
    InProcess,
    Sandboxed,
}

impl fmt::Display for KernelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelMode::InProcess => write!(f, "in_process"),
            KernelMode::Sandboxed => write!(f, "sandboxed"),
        }
    }
}

impl std::str::FromStr for KernelMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "in_process" => Ok(KernelMode::InProcess),
            "sandboxed" => Ok(KernelMode::Sandboxed),
            other => Err(format!("unknown kernel mode: {}", other)),
        }
    }
}

/// Interpreter language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Javascript,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Javascript => write!(f, "javascript"),
        }
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::Javascript),
            other => Err(format!("unknown language: {}", other)),
        }
    }
}

/// A (mode, language) pair — the unit the allowed-type policy and the pool
/// key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelTypeKey {
    pub mode: KernelMode,
    pub language: Language,
}

impl fmt::Display for KernelTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.mode, self.language)
    }
}

/// Host directory mounted into the sandbox's guest filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemMount {
    pub host_root: String,
    pub guest_mount: String,
}

/// Capability grants for a kernel's driver process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
    #[serde(default)]
    pub net: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub run: bool,
}

impl Capabilities {
    /// Whether this is the zero-value default grant set — used by the pool
    /// eligibility check (non-default capability grants skip the pool).
    pub fn is_default(&self) -> bool {
        self.read.is_empty()
            && self.write.is_empty()
            && self.net.is_empty()
            && self.env.is_empty()
            && !self.run
    }
}

/// Options passed to `SandboxDriver::initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitOptions {
    pub filesystem: Option<FilesystemMount>,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub startup_script: Option<String>,
}

/// Driver lifecycle status, as queried by `status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Idle,
    Busy,
    Starting,
    Error,
}

/// Outcome of a single `execute` call, independent of the event stream
/// emitted alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    pub status: ExecuteStatus,
    pub ename: Option<String>,
    pub evalue: Option<String>,
    pub traceback: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteStatus {
    Ok,
    Error,
}

impl ExecuteOutcome {
    pub fn ok() -> Self {
        Self {
            status: ExecuteStatus::Ok,
            ename: None,
            evalue: None,
            traceback: None,
        }
    }

    pub fn error(ename: impl Into<String>, evalue: impl Into<String>, traceback: Vec<String>) -> Self {
        Self {
            status: ExecuteStatus::Error,
            ename: Some(ename.into()),
            evalue: Some(evalue.into()),
            traceback: Some(traceback),
        }
    }
}

/// The runtime-local side of a kernel (C1): owns the interpreter and emits
/// events. One instance per kernel; never shared.
///
/// All events produced by a call to `execute` must be sent on `events`
/// before the call returns, in interpreter-production order — the bridge and
/// manager rely on this to preserve per-kernel, per-execution ordering.
#[async_trait]
pub trait SandboxDriver: Send + Sync + fmt::Debug {
    /// One-shot. Subsequent calls must return an error. Runs before the
    /// driver is shared with any other call.
    async fn initialize(&mut self, opts: InitOptions, events: mpsc::Sender<EventRecord>) -> Result<()>;

    /// Run a code fragment. `parent` is echoed into every emitted event as
    /// the execution they belong to (via the bridge's per-kernel tagging).
    /// Callers are responsible for ensuring only one `execute` is in flight
    /// at a time per driver; a second concurrent call has unspecified
    /// behavior.
    async fn execute(&self, code: String, parent: ExecutionId) -> Result<ExecuteOutcome>;

    /// Deliver a reply to an outstanding `input_request`. Discarded if none
    /// is pending. Must not block on a concurrent `execute` call.
    async fn input_reply(&self, value: String);

    /// Signal cooperative interrupt. Returns `false` when the mode does not
    /// support interruption (in-process drivers). Must not block on a
    /// concurrent `execute` call.
    fn interrupt(&self) -> bool;

    fn status(&self) -> DriverStatus;

    fn mode(&self) -> KernelMode;

    /// Terminate the underlying process/thread immediately, regardless of
    /// any in-flight `execute`. Default no-op for drivers with nothing to
    /// forcibly kill.
    fn terminate(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capabilities_are_pool_eligible() {
        assert!(Capabilities::default().is_default());
        let custom = Capabilities {
            run: true,
            ..Default::default()
        };
        assert!(!custom.is_default());
    }

    #[test]
    fn kernel_type_key_displays_mode_then_language() {
        let key = KernelTypeKey {
            mode: KernelMode::Sandboxed,
            language: Language::Python,
        };
        assert_eq!(key.to_string(), "sandboxed-python");
    }

    #[test]
    fn mode_and_language_parse_their_display_form() {
        assert_eq!("sandboxed".parse::<KernelMode>().unwrap(), KernelMode::Sandboxed);
        assert_eq!("javascript".parse::<Language>().unwrap(), Language::Javascript);
        assert!("quantum".parse::<KernelMode>().is_err());
    }
}
