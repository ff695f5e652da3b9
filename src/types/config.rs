//! Configuration structures.
//!
//! Configuration is loaded from environment variables and config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Global orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Kernel defaults and policy.
    #[serde(default)]
    pub kernel: KernelDefaults,

    /// IPC transport configuration.
    #[serde(default)]
    pub ipc: IpcConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IPC server bind address (TCP).
    pub listen_addr: String,

    /// Metrics endpoint bind address.
    pub metrics_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50051".to_string(),
            metrics_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// A single allowed (mode, language) kernel type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct KernelType {
    pub mode: String,
    pub language: String,
}

/// Pool pre-warming configuration (per-key sizing for kernel pool C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Whether the pool pre-warms any kernels at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum idle, pre-warmed kernels held per (mode, language) key.
    pub size_per_key: usize,

    /// Maximum total kernels (live + pooled) the process will hold.
    pub max_total: usize,

    /// Whether a pool key refills itself in the background after a hand-out.
    #[serde(default = "default_true")]
    pub auto_refill: bool,

    /// (mode, language) keys to pre-warm at manager start-up.
    #[serde(default)]
    pub preload_keys: Vec<KernelType>,
}

fn default_true() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size_per_key: 2,
            max_total: 64,
            auto_refill: true,
            preload_keys: Vec::new(),
        }
    }
}

/// Filesystem exposure defaults applied to newly created kernels.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilesystemDefaults {
    /// Host directory mounted as the kernel's working directory, if any.
    pub working_dir: Option<String>,

    /// Whether the kernel may write outside its working directory.
    #[serde(default)]
    pub read_only: bool,
}

/// Capability defaults applied to newly created kernels.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapabilityDefaults {
    /// Whether outbound network access is permitted.
    #[serde(default)]
    pub network: bool,

    /// Whether subprocess spawning from inside the sandbox is permitted.
    #[serde(default)]
    pub subprocess: bool,
}

/// Kernel defaults and policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelDefaults {
    /// The (mode, language) combinations the orchestrator will create.
    /// A create request outside this set is rejected with `PolicyError`.
    pub allowed_kernel_types: Vec<KernelType>,

    /// Pool pre-warming policy.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Milliseconds of inactivity before an idle live kernel is evicted.
    pub inactivity_timeout_ms: u64,

    /// Milliseconds an execution may run before being flagged `execution_stalled`.
    pub max_execution_time_ms: u64,

    /// Filesystem defaults.
    #[serde(default)]
    pub filesystem: FilesystemDefaults,

    /// Capability defaults.
    #[serde(default)]
    pub capabilities: CapabilityDefaults,

    /// Environment variables injected into every kernel's driver process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Code executed once, immediately after kernel init, before the first
    /// caller-submitted execution.
    pub startup_script: Option<String>,

    /// Sandbox-runtime binary launched for every driver process. Its wire
    /// protocol is a private detail between this process and that binary.
    #[serde(default = "default_driver_binary")]
    pub driver_binary: String,
}

fn default_driver_binary() -> String {
    "sandbox-runtime-driver".to_string()
}

impl Default for KernelDefaults {
    fn default() -> Self {
        Self {
            allowed_kernel_types: vec![
                KernelType {
                    mode: "in_process".to_string(),
                    language: "python".to_string(),
                },
                KernelType {
                    mode: "sandboxed".to_string(),
                    language: "python".to_string(),
                },
                KernelType {
                    mode: "sandboxed".to_string(),
                    language: "javascript".to_string(),
                },
            ],
            pool: PoolConfig::default(),
            inactivity_timeout_ms: 10 * 60 * 1000,
            max_execution_time_ms: 30_000,
            filesystem: FilesystemDefaults::default(),
            capabilities: CapabilityDefaults::default(),
            env: HashMap::new(),
            startup_script: None,
            driver_binary: default_driver_binary(),
        }
    }
}

/// IPC transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,

    /// Bounded channel capacity for streaming responses (executeStream).
    pub stream_channel_capacity: usize,

    /// Bounded channel capacity for the single-writer kernel-actor command
    /// queue. Backpressure here is the process-wide admission point.
    pub kernel_queue_capacity: usize,

    /// Maximum concurrent TCP connections. New connections beyond this limit
    /// are held until a slot opens (backpressure via semaphore).
    pub max_connections: usize,

    /// Read timeout in seconds per frame. Connections idle beyond this
    /// duration are dropped (prevents slowloris-style resource exhaustion).
    pub read_timeout_secs: u64,

    /// Write timeout in seconds per frame. Slow consumers that cannot
    /// accept a response within this window are dropped.
    pub write_timeout_secs: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 5 * 1024 * 1024,
            stream_channel_capacity: 64,
            kernel_queue_capacity: 256,
            max_connections: 1000,
            read_timeout_secs: 30,
            write_timeout_secs: 10,
        }
    }
}
