//! Sandbox Driver (C1) and its supporting types.
//!
//! A driver owns one interpreter in an isolated context and is reached only
//! through the [`SandboxDriver`] trait and the event channel handed to
//! `initialize`. [`ProcessDriver`] is the one implementation shipped here;
//! it shells out to an external sandbox-runtime binary rather than
//! reimplementing an interpreter.

pub mod events;
pub mod interrupt_channel;
pub mod process;
pub mod traits;

pub use events::{EventRecord, StreamName};
pub use interrupt_channel::{InterruptChannel, INTERRUPT_SIGNAL};
pub use process::{ProcessDriver, ProcessDriverSpawnConfig};
pub use traits::{
    Capabilities, DriverStatus, ExecuteOutcome, ExecuteStatus, FilesystemMount, InitOptions,
    KernelMode, KernelTypeKey, Language, SandboxDriver,
};
