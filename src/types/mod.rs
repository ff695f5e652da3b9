//! Core types for the kernel orchestrator.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (KernelId, ExecutionId, HandlerId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for the server, observability, and kernel policy

mod config;
mod errors;
mod ids;

pub use config::{
    CapabilityDefaults, Config, FilesystemDefaults, IpcConfig, KernelDefaults, KernelType,
    ObservabilityConfig, PoolConfig, ServerConfig,
};
pub use errors::{Error, Result};
pub use ids::{ExecutionId, HandlerId, KernelId};
