//! Kernel Manager (C5): the single serialization point for every kernel
//! lifecycle and execution operation.
//!
//! All mutation of manager-owned state — the live map, the pool, the
//! execution tracker, the timer tables — happens through `&mut self` methods
//! called from exactly one place: the IPC layer's single-writer actor loop
//! (`ipc::server::run_kernel_actor`). Long-running driver work (an `execute`
//! call, a background pool refill) is spawned off that loop and reports back
//! through [`ManagerTick`], a second inbox the same actor selects on — so a
//! slow execution on one kernel never stalls commands for every other
//! kernel, while every actual state mutation still happens on a single
//! thread of control.

use crate::driver::{
    Capabilities, EventRecord, FilesystemMount, InitOptions, InterruptChannel, KernelMode, KernelTypeKey, Language,
    ProcessDriverSpawnConfig,
};
use crate::events::{EventBus, EventKind};
use crate::kernel::instance::{KernelInstance, KernelSummary};
use crate::kernel::policy::AllowedTypes;
use crate::kernel::pool::{Pool, PoolKeyStats, PooledEntry};
use crate::kernel::stream_buffer::{self, DEFAULT_RING_CAPACITY};
use crate::kernel::tracker::{ExecutionInfo, ExecutionTracker};
use crate::types::{Error, ExecutionId, HandlerId, KernelDefaults, KernelId, Result};
use crate::validation;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Safety-net bound on how long `executeStream`'s teardown waits for the
/// bridge to forward the terminal event before giving up and unsubscribing
/// anyway (covers a driver that disappears without emitting one).
const STREAM_TERMINAL_WAIT: Duration = Duration::from_secs(10);

/// Internal notification the manager's own background tasks (timers,
/// executions, pool refills) send back to the single actor loop, so every
/// resulting mutation is still serialized through `&mut self`.
#[derive(Debug)]
pub enum ManagerTick {
    InactivityFire(KernelId),
    StallFire(KernelId, ExecutionId),
    ExecutionFinished(KernelId, ExecutionId),
    PoolFilled(KernelTypeKey, Box<PooledEntry>),
}

/// Parameters for `create`.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub namespace: Option<String>,
    pub base_id: String,
    pub mode: KernelMode,
    pub language: Language,
    pub filesystem: Option<FilesystemMount>,
    pub capabilities: Capabilities,
    pub env: HashMap<String, String>,
    pub startup_script: Option<String>,
    pub inactivity_timeout_ms: Option<u64>,
    pub max_execution_time_ms: Option<u64>,
}

/// Snapshot returned by `info(id)`.
#[derive(Debug, Clone)]
pub struct KernelInfo {
    pub summary: KernelSummary,
    pub execution: ExecutionInfo,
}

static POOL_PLACEHOLDER_COUNTER: AtomicU64 = AtomicU64::new(1);

fn pool_placeholder_id(key: KernelTypeKey) -> KernelId {
    let n = POOL_PLACEHOLDER_COUNTER.fetch_add(1, Ordering::Relaxed);
    KernelId::compose(Some("__pool"), &format!("{}-{}", key, n))
}

struct LiveKernel {
    instance: Arc<KernelInstance>,
    interrupt: Option<InterruptChannel>,
    type_key: KernelTypeKey,
}

pub struct KernelManager {
    live: HashMap<KernelId, LiveKernel>,
    pool: Pool,
    policy: AllowedTypes,
    tracker: ExecutionTracker,
    bus: EventBus,
    kernel_defaults: KernelDefaults,
    /// Per-kernel (inactivity_timeout_ms, max_execution_time_ms), which may
    /// differ from the process-wide defaults when a create request overrides
    /// them.
    kernel_timeouts: HashMap<KernelId, (u64, u64)>,
    inactivity_timers: HashMap<KernelId, JoinHandle<()>>,
    stall_timers: HashMap<(KernelId, ExecutionId), JoinHandle<()>>,
    tick_tx: mpsc::Sender<ManagerTick>,
    stream_channel_capacity: usize,
}

impl std::fmt::Debug for KernelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelManager")
            .field("live_count", &self.live.len())
            .finish_non_exhaustive()
    }
}

impl KernelManager {
    /// Construct a manager and its tick channel. The caller (the IPC layer)
    /// wires the returned receiver into the same actor loop that drains
    /// incoming commands.
    pub fn new(
        policy: AllowedTypes,
        kernel_defaults: KernelDefaults,
        bus: EventBus,
        stream_channel_capacity: usize,
    ) -> (Self, mpsc::Receiver<ManagerTick>) {
        let (tick_tx, tick_rx) = mpsc::channel(1024);
        let pool = Pool::new(kernel_defaults.pool.size_per_key);
        let manager = Self {
            live: HashMap::new(),
            pool,
            policy,
            tracker: ExecutionTracker::new(),
            bus,
            kernel_defaults,
            kernel_timeouts: HashMap::new(),
            inactivity_timers: HashMap::new(),
            stall_timers: HashMap::new(),
            tick_tx,
            stream_channel_capacity,
        };
        (manager, tick_rx)
    }

    /// Kick off background pre-warming for every configured preload key.
    /// Results arrive asynchronously via `ManagerTick::PoolFilled`.
    pub fn spawn_preload(&self) {
        if !self.kernel_defaults.pool.enabled {
            return;
        }
        for kernel_type in &self.kernel_defaults.pool.preload_keys {
            let Ok(mode) = kernel_type.mode.parse::<KernelMode>() else {
                tracing::warn!("skipping preload key with unknown mode: {}", kernel_type.mode);
                continue;
            };
            let Ok(language) = kernel_type.language.parse::<Language>() else {
                tracing::warn!("skipping preload key with unknown language: {}", kernel_type.language);
                continue;
            };
            let key = KernelTypeKey { mode, language };
            self.spawn_refill(key, self.kernel_defaults.pool.size_per_key);
        }
    }

    fn spawn_config_for(&self, key: KernelTypeKey) -> ProcessDriverSpawnConfig {
        ProcessDriverSpawnConfig {
            binary: self.kernel_defaults.driver_binary.clone(),
            args: vec![
                "--mode".to_string(),
                key.mode.to_string(),
                "--language".to_string(),
                key.language.to_string(),
            ],
            mode: key.mode,
            language: key.language,
        }
    }

    fn spawn_refill(&self, key: KernelTypeKey, count: usize) {
        for _ in 0..count {
            let spawn_config = self.spawn_config_for(key);
            let bus = self.bus.clone();
            let tick_tx = self.tick_tx.clone();
            let startup_script = self.kernel_defaults.startup_script.clone();
            let id = pool_placeholder_id(key);
            tokio::spawn(async move {
                let options = InitOptions {
                    startup_script,
                    ..Default::default()
                };
                match KernelInstance::create(id, key.mode, key.language, options, spawn_config, bus).await {
                    Ok((instance, interrupt)) => {
                        let _ = tick_tx
                            .send(ManagerTick::PoolFilled(key, Box::new((instance, interrupt))))
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!("pool refill for {} failed: {}", key, e);
                    }
                }
            });
        }
    }

    // ---- lifecycle: create / destroy / destroyAll / restart -------------

    pub async fn create(&mut self, request: CreateRequest) -> Result<KernelSummary> {
        validation::validate_kernel_base(&request.base_id)?;
        if let Some(ns) = request.namespace.as_deref() {
            validation::validate_namespace(ns)?;
        }

        let effective_id = KernelId::compose(request.namespace.as_deref(), &request.base_id);
        if self.live.contains_key(&effective_id) {
            return Err(Error::policy_error(format!("kernel '{}' already exists", effective_id)));
        }

        let type_key = KernelTypeKey {
            mode: request.mode,
            language: request.language,
        };
        if !self.policy.is_allowed(&type_key) {
            return Err(Error::policy_error(format!(
                "kernel type '{}' is not in the allowed set",
                type_key
            )));
        }

        let options = InitOptions {
            filesystem: request.filesystem,
            capabilities: request.capabilities,
            env: request.env,
            startup_script: request
                .startup_script
                .or_else(|| self.kernel_defaults.startup_script.clone()),
        };

        let inactivity_timeout_ms = request
            .inactivity_timeout_ms
            .unwrap_or(self.kernel_defaults.inactivity_timeout_ms);
        let max_execution_time_ms = request
            .max_execution_time_ms
            .unwrap_or(self.kernel_defaults.max_execution_time_ms);

        let pool_eligible = self.kernel_defaults.pool.enabled
            && KernelInstance::matches_default_options(&options)
            && request.inactivity_timeout_ms.is_none()
            && request.max_execution_time_ms.is_none();

        let (instance, interrupt) = if pool_eligible {
            match self.pool.take(&type_key) {
                Some((mut instance, interrupt)) => {
                    instance.rebrand(effective_id.clone(), options.clone());
                    (instance, interrupt)
                }
                None => self.cold_start(effective_id.clone(), type_key, options).await?,
            }
        } else {
            self.cold_start(effective_id.clone(), type_key, options).await?
        };

        if pool_eligible && self.kernel_defaults.pool.auto_refill {
            self.spawn_refill(type_key, 1);
        }

        let summary = instance.summary(request.namespace);
        self.live.insert(
            effective_id.clone(),
            LiveKernel {
                instance: Arc::new(instance),
                interrupt,
                type_key,
            },
        );
        self.kernel_timeouts
            .insert(effective_id.clone(), (inactivity_timeout_ms, max_execution_time_ms));
        self.tracker.touch_activity(&effective_id);
        if inactivity_timeout_ms > 0 {
            self.schedule_inactivity_timer(effective_id, inactivity_timeout_ms);
        }

        Ok(summary)
    }

    async fn cold_start(
        &self,
        id: KernelId,
        type_key: KernelTypeKey,
        options: InitOptions,
    ) -> Result<(KernelInstance, Option<InterruptChannel>)> {
        let spawn_config = self.spawn_config_for(type_key);
        KernelInstance::create(id, type_key.mode, type_key.language, options, spawn_config, self.bus.clone()).await
    }

    /// Destroy a kernel. Idempotent: destroying an unknown ID is a no-op,
    /// not an error: destroy is safe to call twice.
    pub async fn destroy(&mut self, id: &KernelId) -> Result<()> {
        if !self.live.contains_key(id) {
            return Ok(());
        }
        // Subscriptions are removed before the live-map record.
        self.bus.remove_all_for_kernel(id);
        self.cancel_inactivity_timer(id);
        self.cancel_all_stall_alarms_for_kernel(id);

        let live = self.live.remove(id).expect("checked above");
        self.tracker.remove_kernel(id);
        self.kernel_timeouts.remove(id);

        // shutdown_in_place works through &self, so this is safe even if a
        // spawned execution task still holds its own clone of the Arc; the
        // driver process itself is torn down once every clone is dropped,
        // or immediately via terminate() for forceTerminate.
        live.instance.shutdown_in_place();
        Ok(())
    }

    pub async fn destroy_all(&mut self, namespace: Option<&str>) -> Result<usize> {
        let ids: Vec<KernelId> = self
            .live
            .keys()
            .filter(|id| id.in_namespace(namespace))
            .cloned()
            .collect();
        let count = ids.len();
        for id in ids {
            self.destroy(&id).await?;
        }

        if namespace.is_none() {
            for (instance, _interrupt) in self.pool.drain_all() {
                instance.destroy();
            }
        }
        Ok(count)
    }

    /// Destroy and recreate a kernel with the same effective ID and
    /// configuration. Subscriptions are *not* migrated — callers must
    /// resubscribe. Returns `false` if `id` is not live.
    pub async fn restart(&mut self, id: &KernelId) -> Result<bool> {
        let Some(live) = self.live.get(id) else {
            return Ok(false);
        };
        let type_key = live.type_key;
        let options = live.instance.options().clone();
        let (inactivity_timeout_ms, max_execution_time_ms) = *self
            .kernel_timeouts
            .get(id)
            .unwrap_or(&(self.kernel_defaults.inactivity_timeout_ms, self.kernel_defaults.max_execution_time_ms));

        self.destroy(id).await?;

        let (instance, interrupt) = self.cold_start(id.clone(), type_key, options).await?;
        self.live.insert(
            id.clone(),
            LiveKernel {
                instance: Arc::new(instance),
                interrupt,
                type_key,
            },
        );
        self.kernel_timeouts
            .insert(id.clone(), (inactivity_timeout_ms, max_execution_time_ms));
        self.tracker.touch_activity(id);
        if inactivity_timeout_ms > 0 {
            self.schedule_inactivity_timer(id.clone(), inactivity_timeout_ms);
        }
        Ok(true)
    }

    /// Publish a terminal `execute_error(KernelForcedTermination)`, kill the
    /// driver process immediately, and destroy the kernel.
    pub async fn force_terminate(&mut self, id: &KernelId, reason: Option<String>) -> Result<bool> {
        let Some(live) = self.live.get(id) else {
            return Ok(false);
        };
        self.bus.publish(
            id,
            EventRecord::ExecuteError {
                ename: "KernelForcedTermination".to_string(),
                evalue: reason.unwrap_or_else(|| "kernel was forcibly terminated".to_string()),
                traceback: Vec::new(),
            },
        );
        live.instance.terminate();
        self.destroy(id).await?;
        Ok(true)
    }

    // ---- execution --------------------------------------------------------

    /// Fire-and-record execution: the caller gets the allocated execution ID
    /// back immediately and observes events (if at all) via `onKernelEvent`
    /// subscriptions rather than a dedicated stream.
    pub async fn execute(&mut self, id: &KernelId, code: String) -> Result<ExecutionId> {
        let instance = self.live.get(id).ok_or_else(|| not_found(id))?.instance.clone();
        if !instance.is_ready() {
            return Err(Error::not_initialized(format!("kernel '{}' is not ready", id)));
        }

        let execution_id = ExecutionId::new();
        self.tracker.begin(id, execution_id.clone());
        self.reschedule_inactivity_timer(id);
        self.maybe_arm_stall(id, &execution_id);

        let tick_tx = self.tick_tx.clone();
        let kernel_id = id.clone();
        let exec_id = execution_id.clone();
        tokio::spawn(async move {
            let _ = instance.execute(code, exec_id.clone()).await;
            let _ = tick_tx.send(ManagerTick::ExecutionFinished(kernel_id, exec_id)).await;
        });

        Ok(execution_id)
    }

    /// Streaming execution: returns the execution ID alongside a receiver of
    /// every event produced by this specific execution, independent of any
    /// `onKernelEvent` subscriptions.
    pub async fn execute_stream(
        &mut self,
        id: &KernelId,
        code: String,
    ) -> Result<(ExecutionId, mpsc::Receiver<EventRecord>)> {
        let instance = self.live.get(id).ok_or_else(|| not_found(id))?.instance.clone();
        if !instance.is_ready() {
            return Err(Error::not_initialized(format!("kernel '{}' is not ready", id)));
        }

        let execution_id = ExecutionId::new();
        self.tracker.begin(id, execution_id.clone());
        self.reschedule_inactivity_timer(id);
        self.maybe_arm_stall(id, &execution_id);

        let (producer, out_rx) = stream_buffer::spawn(DEFAULT_RING_CAPACITY, self.stream_channel_capacity);
        let producer_for_close = producer.clone();
        let handler_id = HandlerId::next();

        // The bridge forwards events into this subscription asynchronously;
        // `instance.execute` resolving only means the driver produced an
        // outcome, not that the bridge has drained and published every event
        // up to and including the terminal one yet (bounded-channel sends
        // only need buffer space, not a consumer). So rather than tearing
        // the subscription down the instant `execute` returns, the
        // subscription itself signals the terminal event's arrival and the
        // teardown waits on that.
        let (terminal_tx, terminal_rx) = oneshot::channel();
        let terminal_tx = StdMutex::new(Some(terminal_tx));
        self.bus.subscribe(id.clone(), None, handler_id, move |_kid, event| {
            producer.push(event.clone());
            if event.is_terminal() {
                if let Some(tx) = terminal_tx.lock().expect("terminal-event mutex poisoned").take() {
                    let _ = tx.send(());
                }
            }
        })?;

        let tick_tx = self.tick_tx.clone();
        let bus = self.bus.clone();
        let kernel_id = id.clone();
        let exec_id = execution_id.clone();
        tokio::spawn(async move {
            let _ = instance.execute(code, exec_id.clone()).await;
            if tokio::time::timeout(STREAM_TERMINAL_WAIT, terminal_rx).await.is_err() {
                tracing::warn!(
                    "executeStream for kernel {} execution {} timed out waiting for the terminal event; tearing down anyway",
                    kernel_id,
                    exec_id
                );
            }
            producer_for_close.close();
            bus.unsubscribe(&kernel_id, None, handler_id);
            let _ = tick_tx.send(ManagerTick::ExecutionFinished(kernel_id, exec_id)).await;
        });

        Ok((execution_id, out_rx))
    }

    pub async fn input_reply(&mut self, id: &KernelId, value: String) -> Result<()> {
        let instance = self.live.get(id).ok_or_else(|| not_found(id))?.instance.clone();
        self.tracker.touch_activity(id);
        self.reschedule_inactivity_timer(id);
        instance.input_reply(value).await;
        Ok(())
    }

    /// Only meaningful for sandboxed kernels; returns `false` for unknown
    /// IDs or in-process kernels. Never waits on an in-flight `execute`.
    pub fn interrupt(&self, id: &KernelId) -> Result<bool> {
        let live = self.live.get(id).ok_or_else(|| not_found(id))?;
        match &live.interrupt {
            Some(channel) => {
                channel.signal();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn maybe_arm_stall(&mut self, id: &KernelId, execution_id: &ExecutionId) {
        let stall_ms = self.kernel_timeouts.get(id).map(|t| t.1).unwrap_or(0);
        if stall_ms > 0 {
            self.arm_stall_alarm(id.clone(), execution_id.clone(), stall_ms);
        }
    }

    // ---- introspection ------------------------------------------------

    pub async fn list(&self, namespace: Option<&str>) -> Vec<KernelSummary> {
        self.live
            .iter()
            .filter(|(id, _)| id.in_namespace(namespace))
            .map(|(id, live)| live.instance.summary(id.namespace().map(str::to_string)))
            .collect()
    }

    pub fn info(&self, id: &KernelId) -> Result<KernelInfo> {
        let live = self.live.get(id).ok_or_else(|| not_found(id))?;
        let max_execution_time_ms = self.kernel_timeouts.get(id).map(|t| t.1).unwrap_or(0);
        Ok(KernelInfo {
            summary: live.instance.summary(id.namespace().map(str::to_string)),
            execution: self.tracker.info(id, max_execution_time_ms),
        })
    }

    pub fn pool_stats(&self) -> HashMap<KernelTypeKey, PoolKeyStats> {
        self.pool.stats()
    }

    // ---- event subscriptions --------------------------------------------

    pub fn on_kernel_event<F>(&self, id: KernelId, event_type: Option<EventKind>, handler: F) -> Result<HandlerId>
    where
        F: Fn(&KernelId, &EventRecord) + Send + Sync + 'static,
    {
        let handler_id = HandlerId::next();
        self.bus.subscribe(id, event_type, handler_id, handler)?;
        Ok(handler_id)
    }

    pub fn off_kernel_event(&self, id: &KernelId, event_type: Option<EventKind>, handler_id: HandlerId) {
        self.bus.unsubscribe(id, event_type, handler_id);
    }

    // ---- timers ---------------------------------------------------------

    fn schedule_inactivity_timer(&mut self, id: KernelId, timeout_ms: u64) {
        if let Some(old) = self.inactivity_timers.remove(&id) {
            old.abort();
        }
        let tick_tx = self.tick_tx.clone();
        let fire_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            let _ = tick_tx.send(ManagerTick::InactivityFire(fire_id)).await;
        });
        self.inactivity_timers.insert(id, handle);
    }

    fn cancel_inactivity_timer(&mut self, id: &KernelId) {
        if let Some(handle) = self.inactivity_timers.remove(id) {
            handle.abort();
        }
    }

    /// Push the inactivity deadline out from "now", in response to an
    /// activity event (create/restart arm the first timer directly; every
    /// later touch — execute, executeStream, inputReply, execution
    /// completion — goes through here instead of waiting for the next fire).
    fn reschedule_inactivity_timer(&mut self, id: &KernelId) {
        let timeout_ms = self.kernel_timeouts.get(id).map(|t| t.0).unwrap_or(0);
        if timeout_ms > 0 {
            self.schedule_inactivity_timer(id.clone(), timeout_ms);
        }
    }

    fn arm_stall_alarm(&mut self, id: KernelId, execution_id: ExecutionId, timeout_ms: u64) {
        let tick_tx = self.tick_tx.clone();
        let fire_id = id.clone();
        let fire_exec = execution_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            let _ = tick_tx.send(ManagerTick::StallFire(fire_id, fire_exec)).await;
        });
        self.stall_timers.insert((id, execution_id), handle);
    }

    fn cancel_stall_alarm(&mut self, id: &KernelId, execution_id: &ExecutionId) {
        if let Some(handle) = self.stall_timers.remove(&(id.clone(), execution_id.clone())) {
            handle.abort();
        }
    }

    fn cancel_all_stall_alarms_for_kernel(&mut self, id: &KernelId) {
        let keys: Vec<_> = self
            .stall_timers
            .keys()
            .filter(|(kid, _)| kid == id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(handle) = self.stall_timers.remove(&key) {
                handle.abort();
            }
        }
    }

    /// Process a tick from the manager's own background tasks. Called from
    /// the same single-writer actor loop that handles IPC commands.
    pub async fn handle_tick(&mut self, tick: ManagerTick) {
        match tick {
            ManagerTick::InactivityFire(id) => self.on_inactivity_fire(id).await,
            ManagerTick::StallFire(id, execution_id) => self.on_stall_fire(id, execution_id),
            ManagerTick::ExecutionFinished(id, execution_id) => self.on_execution_finished(id, execution_id),
            ManagerTick::PoolFilled(key, entry) => self.on_pool_filled(key, *entry),
        }
    }

    async fn on_inactivity_fire(&mut self, id: KernelId) {
        if !self.live.contains_key(&id) {
            return;
        }
        if self.tracker.has_ongoing(&id) {
            // Defer eviction until the kernel goes idle again; the stall
            // alarm (not this timer) is responsible for flagging runaway
            // executions.
            let timeout_ms = self.kernel_timeouts.get(&id).map(|t| t.0).unwrap_or(0);
            if timeout_ms > 0 {
                self.schedule_inactivity_timer(id, timeout_ms);
            }
            return;
        }
        tracing::debug!("evicting idle kernel {}", id);
        let _ = self.destroy(&id).await;
    }

    fn on_stall_fire(&mut self, id: KernelId, execution_id: ExecutionId) {
        self.stall_timers.remove(&(id.clone(), execution_id.clone()));
        if !self.tracker.is_ongoing(&id, &execution_id) {
            return;
        }
        let max_execution_time_ms = self.kernel_timeouts.get(&id).map(|t| t.1).unwrap_or(0);
        self.bus.publish(
            &id,
            EventRecord::ExecutionStalled {
                execution_id,
                max_execution_time_ms,
            },
        );
    }

    fn on_execution_finished(&mut self, id: KernelId, execution_id: ExecutionId) {
        self.tracker.end(&id, &execution_id);
        self.reschedule_inactivity_timer(&id);
        self.cancel_stall_alarm(&id, &execution_id);
    }

    fn on_pool_filled(&mut self, key: KernelTypeKey, entry: PooledEntry) {
        if let Err((instance, _interrupt)) = self.pool.put(key, entry) {
            instance.destroy();
        }
    }
}

fn not_found(id: &KernelId) -> Error {
    Error::not_found(format!("kernel '{}' not found", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverStatus, ExecuteOutcome, SandboxDriver, StreamName};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn pool_placeholder_ids_are_unique() {
        let key = KernelTypeKey {
            mode: KernelMode::Sandboxed,
            language: Language::Python,
        };
        let a = pool_placeholder_id(key);
        let b = pool_placeholder_id(key);
        assert_ne!(a, b);
    }

    /// In-memory `SandboxDriver` double. Every `execute` immediately emits a
    /// `stream` event followed by a terminal `execute_result`/`execute_error`
    /// through the bridge it was handed at `initialize`, so tests don't need
    /// a real subprocess to exercise the manager's execution bookkeeping.
    #[derive(Debug)]
    struct FakeDriver {
        interrupted: AtomicBool,
        events: StdMutex<Option<mpsc::Sender<EventRecord>>>,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self {
                interrupted: AtomicBool::new(false),
                events: StdMutex::new(None),
            }
        }

        fn events_tx(&self) -> Option<mpsc::Sender<EventRecord>> {
            self.events.lock().expect("fake driver events mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl SandboxDriver for FakeDriver {
        async fn initialize(&mut self, _opts: InitOptions, events: mpsc::Sender<EventRecord>) -> Result<()> {
            *self.events.lock().expect("fake driver events mutex poisoned") = Some(events);
            Ok(())
        }

        async fn execute(&self, code: String, _parent: ExecutionId) -> Result<ExecuteOutcome> {
            if let Some(events) = self.events_tx() {
                let _ = events
                    .send(EventRecord::Stream {
                        name: StreamName::Stdout,
                        text: "running".to_string(),
                    })
                    .await;
            }
            if code == "raise" {
                if let Some(events) = self.events_tx() {
                    let _ = events
                        .send(EventRecord::ExecuteError {
                            ename: "ValueError".to_string(),
                            evalue: "boom".to_string(),
                            traceback: Vec::new(),
                        })
                        .await;
                }
                return Ok(ExecuteOutcome::error("ValueError", "boom", vec![]));
            }
            if let Some(events) = self.events_tx() {
                let _ = events
                    .send(EventRecord::ExecuteResult {
                        execution_count: 1,
                        data: Default::default(),
                        metadata: Default::default(),
                    })
                    .await;
            }
            Ok(ExecuteOutcome::ok())
        }

        async fn input_reply(&self, _value: String) {}

        fn interrupt(&self) -> bool {
            self.interrupted.store(true, Ordering::SeqCst);
            true
        }

        fn status(&self) -> DriverStatus {
            DriverStatus::Idle
        }

        fn mode(&self) -> KernelMode {
            KernelMode::Sandboxed
        }
    }

    fn test_defaults() -> KernelDefaults {
        KernelDefaults {
            pool: crate::types::config::PoolConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn manager_with_live_fake(id: KernelId) -> (KernelManager, mpsc::Receiver<ManagerTick>) {
        let (mut manager, tick_rx) = KernelManager::new(
            AllowedTypes::new([KernelTypeKey {
                mode: KernelMode::Sandboxed,
                language: Language::Python,
            }]),
            test_defaults(),
            EventBus::new(),
            16,
        );
        let instance = KernelInstance::create_with_driver(
            id.clone(),
            KernelMode::Sandboxed,
            Language::Python,
            InitOptions::default(),
            FakeDriver::new(),
            manager.bus.clone(),
        )
        .await
        .expect("fake instance inits");
        manager.live.insert(
            id,
            LiveKernel {
                instance: Arc::new(instance),
                interrupt: None,
                type_key: KernelTypeKey {
                    mode: KernelMode::Sandboxed,
                    language: Language::Python,
                },
            },
        );
        (manager, tick_rx)
    }

    #[tokio::test]
    async fn destroy_unknown_id_is_a_no_op() {
        let (mut manager, _tick_rx) = KernelManager::new(
            AllowedTypes::new([]),
            test_defaults(),
            EventBus::new(),
            16,
        );
        let id = KernelId::compose(None, "nope");
        assert!(manager.destroy(&id).await.is_ok());
    }

    #[tokio::test]
    async fn list_and_pool_stats_are_empty_for_a_fresh_manager() {
        let (manager, _tick_rx) = KernelManager::new(
            AllowedTypes::new([]),
            test_defaults(),
            EventBus::new(),
            16,
        );
        assert!(manager.list(None).await.is_empty());
        assert!(manager.pool_stats().is_empty());
    }

    #[tokio::test]
    async fn execute_runs_against_a_live_kernel_and_records_completion() {
        use pretty_assertions::assert_eq;

        let id = KernelId::compose(None, "fake-1");
        let (mut manager, mut tick_rx) = manager_with_live_fake(id.clone()).await;

        let execution_id = manager.execute(&id, "1 + 1".to_string()).await.unwrap();
        assert!(manager.tracker.is_ongoing(&id, &execution_id));

        let tick = tick_rx.recv().await.expect("execution reports a tick");
        match &tick {
            ManagerTick::ExecutionFinished(finished_id, finished_execution) => {
                assert_eq!(finished_id, &id);
                assert_eq!(finished_execution, &execution_id);
            }
            other => panic!("expected ExecutionFinished, got {:?}", other),
        }
        manager.handle_tick(tick).await;
        assert!(!manager.tracker.is_ongoing(&id, &execution_id));
    }

    #[tokio::test]
    async fn execute_stream_delivers_every_event_up_to_the_terminal_one() {
        let id = KernelId::compose(None, "fake-stream-1");
        let (mut manager, _tick_rx) = manager_with_live_fake(id.clone()).await;

        let (_execution_id, mut events) = manager.execute_stream(&id, "1 + 1".to_string()).await.unwrap();

        let mut saw_stream = false;
        let mut saw_terminal = false;
        while let Some(event) = events.recv().await {
            match event {
                EventRecord::Stream { .. } => saw_stream = true,
                EventRecord::ExecuteResult { .. } => saw_terminal = true,
                _ => {}
            }
        }

        assert!(saw_stream, "expected a stream event before the terminal one");
        assert!(saw_terminal, "terminal event must survive teardown, not be dropped by the race");
    }

    #[tokio::test]
    async fn execute_stream_delivers_the_terminal_error_for_a_failing_execution() {
        let id = KernelId::compose(None, "fake-stream-2");
        let (mut manager, _tick_rx) = manager_with_live_fake(id.clone()).await;

        let (_execution_id, mut events) = manager.execute_stream(&id, "raise".to_string()).await.unwrap();

        let mut saw_error = false;
        while let Some(event) = events.recv().await {
            if matches!(event, EventRecord::ExecuteError { ref ename, .. } if ename == "ValueError") {
                saw_error = true;
            }
        }
        assert!(saw_error, "terminal execute_error must survive teardown");
    }

    #[tokio::test]
    async fn info_reports_last_activity_after_an_execution() {
        let id = KernelId::compose(None, "fake-4");
        let (mut manager, mut tick_rx) = manager_with_live_fake(id.clone()).await;

        let before = manager.info(&id).unwrap().execution.last_activity;

        let execution_id = manager.execute(&id, "1 + 1".to_string()).await.unwrap();
        let tick = tick_rx.recv().await.expect("execution reports a tick");
        manager.handle_tick(tick).await;
        let _ = execution_id;

        let after = manager.info(&id).unwrap().execution.last_activity;
        assert!(after.is_some());
        assert!(after > before);
    }

    #[tokio::test]
    async fn interrupt_returns_false_without_an_interrupt_channel() {
        let id = KernelId::compose(None, "fake-2");
        let (manager, _tick_rx) = manager_with_live_fake(id.clone()).await;
        assert!(!manager.interrupt(&id).unwrap());
    }

    #[tokio::test]
    async fn interrupt_on_unknown_kernel_is_not_found() {
        let (manager, _tick_rx) = KernelManager::new(
            AllowedTypes::new([]),
            test_defaults(),
            EventBus::new(),
            16,
        );
        let id = KernelId::compose(None, "missing");
        assert!(manager.interrupt(&id).is_err());
    }

    #[tokio::test]
    async fn destroy_removes_a_live_kernel() {
        let id = KernelId::compose(None, "fake-3");
        let (mut manager, _tick_rx) = manager_with_live_fake(id.clone()).await;
        assert_eq!(manager.list(None).await.len(), 1);
        manager.destroy(&id).await.unwrap();
        assert!(manager.list(None).await.is_empty());
    }
}
