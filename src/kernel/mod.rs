//! Kernel subsystem: the manager (C5) and the building blocks it owns —
//! instances (C3), the pool (C4), the execution tracker (C6), and the
//! allowed-type policy.

pub mod instance;
pub mod manager;
pub mod policy;
pub mod pool;
pub mod recovery;
pub mod stream_buffer;
pub mod tracker;

pub use instance::{KernelInstance, KernelSummary};
pub use manager::{CreateRequest, KernelInfo, KernelManager, ManagerTick};
pub use policy::AllowedTypes;
pub use pool::{Pool, PoolKeyStats, PooledEntry};
pub use recovery::with_recovery;
pub use tracker::{ExecutionInfo, ExecutionTracker};
