//! Kernel Instance (C3): the manager-side handle to one driver.
//!
//! Stored behind a plain `Arc`, not a mutex: every method but `rebrand` (used
//! only before the instance is shared) takes `&self`, relying on the driver's
//! own interior synchronization. `execute` is additionally serialized by a
//! per-instance gate so two concurrent calls can't both claim the driver's
//! single outcome slot, while `interrupt`/`input_reply`/`status` stay free to
//! run alongside an in-flight `execute`.

use crate::bridge::{EventBridge, DEFAULT_BRIDGE_CAPACITY};
use crate::driver::{
    DriverStatus, ExecuteOutcome, InitOptions, InterruptChannel, KernelMode, Language, ProcessDriver,
    ProcessDriverSpawnConfig, SandboxDriver,
};
use crate::events::EventBus;
use crate::types::{Error, ExecutionId, KernelId, Result};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as TokioMutex;

/// Summary row returned by `list(namespace)` and `info(id)`.
#[derive(Debug, Clone)]
pub struct KernelSummary {
    pub id: KernelId,
    pub mode: KernelMode,
    pub language: Language,
    pub status: DriverStatus,
    pub created: DateTime<Utc>,
    pub namespace: Option<String>,
}

/// The manager-side handle: identity, mode, language, creation time,
/// configuration, current interpreter status, destroy hook.
#[derive(Debug)]
pub struct KernelInstance {
    id: KernelId,
    mode: KernelMode,
    language: Language,
    created: DateTime<Utc>,
    options: InitOptions,
    driver: Arc<dyn SandboxDriver>,
    bridge: StdMutex<Option<EventBridge>>,
    from_pool: bool,
    ready: bool,
    execute_gate: TokioMutex<()>,
}

impl KernelInstance {
    /// Spawn a driver, wire it to the bus through a fresh bridge, run
    /// `initialize`, and — if configured — the one-time startup script.
    /// On any failure the bridge and driver are torn down before returning.
    ///
    /// Returns the driver's interrupt channel alongside the instance: the
    /// manager keeps its own copy outside this instance so `interrupt()`
    /// never has to contend with the execute gate.
    pub async fn create(
        id: KernelId,
        mode: KernelMode,
        language: Language,
        options: InitOptions,
        spawn_config: ProcessDriverSpawnConfig,
        bus: EventBus,
    ) -> Result<(Self, Option<InterruptChannel>)> {
        let mut driver = ProcessDriver::spawn(&spawn_config).await?;
        let interrupt_channel = driver.interrupt_channel();
        let (bridge, events_tx) = EventBridge::spawn(id.clone(), bus, DEFAULT_BRIDGE_CAPACITY);

        if let Err(e) = driver.initialize(options.clone(), events_tx).await {
            bridge.shutdown();
            return Err(e);
        }

        let instance = Self {
            id,
            mode,
            language,
            created: Utc::now(),
            options,
            driver: Arc::new(driver),
            bridge: StdMutex::new(Some(bridge)),
            from_pool: false,
            ready: false,
            execute_gate: TokioMutex::new(()),
        };

        if let Some(script) = instance.options.startup_script.clone() {
            if let Err(e) = instance.run_internal(script, ExecutionId::new()).await {
                instance.shutdown_in_place();
                return Err(e);
            }
        }

        let mut instance = instance;
        instance.ready = true;
        Ok((instance, interrupt_channel))
    }

    /// Same wiring as `create`, minus the subprocess spawn: used by manager
    /// tests to stand up an instance over an in-memory `SandboxDriver` double.
    #[cfg(test)]
    pub(crate) async fn create_with_driver(
        id: KernelId,
        mode: KernelMode,
        language: Language,
        options: InitOptions,
        mut driver: impl SandboxDriver + 'static,
        bus: EventBus,
    ) -> Result<Self> {
        let (bridge, events_tx) = EventBridge::spawn(id.clone(), bus, DEFAULT_BRIDGE_CAPACITY);
        if let Err(e) = driver.initialize(options.clone(), events_tx).await {
            bridge.shutdown();
            return Err(e);
        }
        Ok(Self {
            id,
            mode,
            language,
            created: Utc::now(),
            options,
            driver: Arc::new(driver),
            bridge: StdMutex::new(Some(bridge)),
            from_pool: false,
            ready: true,
            execute_gate: TokioMutex::new(()),
        })
    }

    /// Run code bypassing the readiness gate — used only for the one-time
    /// startup script, before `ready` is set.
    async fn run_internal(&self, code: String, parent: ExecutionId) -> Result<ExecuteOutcome> {
        let _permit = self.execute_gate.lock().await;
        self.driver.execute(code, parent).await
    }

    pub fn id(&self) -> &KernelId {
        &self.id
    }

    pub fn mode(&self) -> KernelMode {
        self.mode
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn options(&self) -> &InitOptions {
        &self.options
    }

    pub fn from_pool(&self) -> bool {
        self.from_pool
    }

    pub fn status(&self) -> DriverStatus {
        self.driver.status()
    }

    pub fn is_ready(&self) -> bool {
        self.ready && self.status() != DriverStatus::Error
    }

    pub fn summary(&self, namespace: Option<String>) -> KernelSummary {
        KernelSummary {
            id: self.id.clone(),
            mode: self.mode,
            language: self.language,
            status: self.status(),
            created: self.created,
            namespace,
        }
    }

    /// Whether this instance is eligible to be served from the pool for a
    /// request with these options: no custom filesystem mount,
    /// default capability grants, and no env overrides. Timeout eligibility
    /// is evaluated by the caller (manager), which compares against its
    /// configured defaults.
    pub fn matches_default_options(options: &InitOptions) -> bool {
        options.filesystem.is_none() && options.capabilities.is_default() && options.env.is_empty()
    }

    /// Rebrand a pool-sourced instance for a new caller: new effective ID,
    /// merged options, refreshed `created`. The driver and bridge — and
    /// therefore the destroy path — are untouched.
    /// Only valid while the instance is still exclusively owned, i.e. before
    /// it is wrapped in the `Arc` the manager shares with execution tasks.
    pub fn rebrand(&mut self, new_id: KernelId, merged_options: InitOptions) {
        self.id = new_id;
        self.options = merged_options;
        self.created = Utc::now();
        self.from_pool = true;
    }

    pub async fn execute(&self, code: String, parent: ExecutionId) -> Result<ExecuteOutcome> {
        if !self.is_ready() {
            return Err(Error::not_initialized(format!("kernel {} is not ready", self.id)));
        }
        let _permit = self.execute_gate.lock().await;
        self.driver.execute(code, parent).await
    }

    pub async fn input_reply(&self, value: String) {
        self.driver.input_reply(value).await;
    }

    /// Only sandboxed drivers honor this; in-process drivers return `false`.
    pub fn interrupt(&self) -> bool {
        self.driver.interrupt()
    }

    /// Kill the underlying driver process immediately, regardless of any
    /// execution currently in flight.
    pub fn terminate(&self) {
        self.driver.terminate();
    }

    /// Shut down the bridge. Idempotent; safe to call on an instance whose
    /// bridge was already shut down, and safe to call while other `Arc`
    /// clones of this instance are still held by an in-flight execution.
    pub fn shutdown_in_place(&self) {
        if let Some(bridge) = self.bridge.lock().expect("bridge mutex poisoned").take() {
            bridge.shutdown();
        }
    }

    /// Tear down the bridge and let the driver (and therefore the child
    /// process it owns) drop once every `Arc` clone is released.
    pub fn destroy(self) {
        self.shutdown_in_place();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_pool_eligible() {
        assert!(KernelInstance::matches_default_options(&InitOptions::default()));

        let mut custom = InitOptions::default();
        custom.env.insert("FOO".into(), "bar".into());
        assert!(!KernelInstance::matches_default_options(&custom));
    }
}
