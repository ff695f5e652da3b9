//! # kernelhost-core — multi-tenant code-execution kernel orchestrator
//!
//! Owns the lifecycle of sandboxed interpreter kernels on behalf of many
//! tenants: creation and pooling, code execution and its event stream,
//! interrupts, forced termination, and idle/stall eviction.
//!
//! - Sandbox drivers (`driver`) own one interpreter each, in process or in a
//!   spawned sandbox subprocess.
//! - The event bridge (`bridge`) tags driver events with kernel/execution
//!   identity before they reach the bus.
//! - The event bus (`events`) fans a kernel's events out to subscribers by a
//!   stable handler identity.
//! - The kernel manager (`kernel::manager`) is the single point of
//!   serialization for all state mutation, reached through one actor loop.
//! - The IPC layer (`ipc`) is length-prefixed msgpack over TCP.
//!
//! ## Architecture
//!
//! The kernel follows a single-actor model where `KernelManager` owns all
//! mutable state, reached only through its own command and tick channels:
//! ```text
//!                    ┌─────────────────────────────────┐
//!   IPC requests  →  │         Kernel Actor             │
//!   Timer/exec ticks →  ┌─────────┐ ┌─────────┐        │
//!                    │  │  Pool   │ │ Tracker │        │
//!                    │  └─────────┘ └─────────┘        │
//!                    │  ┌─────────┐ ┌─────────┐        │
//!                    │  │ Policy  │ │EventBus │        │
//!                    │  └─────────┘ └─────────┘        │
//!                    └─────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod driver;
pub mod events;
pub mod ipc;
pub mod kernel;
pub mod types;
pub mod validation;

pub mod observability;

pub use types::{Config, Error, Result};
