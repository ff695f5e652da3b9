//! Interrupt Channel (C7): a single shared byte between manager and driver.
//!
//! A literal shared-memory region would do this job too, but this crate
//! forbids `unsafe_code`, so the channel is realized as a safe
//! `Arc<AtomicU8>` instead. The observable contract is unchanged: the writer
//! sets a nonzero sentinel, the reader (the driver's interpreter polling
//! hook) reads and clears it. No other values are defined.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Writer's sentinel value.
pub const INTERRUPT_SIGNAL: u8 = 2;

/// Shared interrupt byte. Creation is always infallible (best-effort);
/// absence of a channel simply means `interrupt()` returns `false`.
#[derive(Debug, Clone)]
pub struct InterruptChannel(Arc<AtomicU8>);

impl InterruptChannel {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(0)))
    }

    /// Writer side: signal cooperative interruption.
    pub fn signal(&self) {
        self.0.store(INTERRUPT_SIGNAL, Ordering::SeqCst);
    }

    /// Reader side: read and clear. Any nonzero value is a request to
    /// interrupt; finer-grained values are left to the driver to interpret.
    pub fn poll_and_clear(&self) -> Option<u8> {
        let value = self.0.swap(0, Ordering::SeqCst);
        if value == 0 {
            None
        } else {
            Some(value)
        }
    }

    /// Non-clearing peek, for diagnostics.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst) != 0
    }
}

impl Default for InterruptChannel {
    fn default() -> Self {
        Self::new()
    }
}
