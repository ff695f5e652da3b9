//! Event infrastructure — the shared per-kernel subscription bus.

pub mod bus;

pub use bus::{EventBus, EventKind};
