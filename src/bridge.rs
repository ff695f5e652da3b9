//! Event Bridge (C2): the per-kernel bidirectional channel between a
//! [`SandboxDriver`](crate::driver::SandboxDriver) and the manager.
//!
//! The driver-to-manager direction is realized as the `mpsc::Sender<EventRecord>`
//! handed to `SandboxDriver::initialize`; this module owns the receiving end,
//! tags every event with the owning kernel's ID, forwards it onto the shared
//! event bus in arrival order, and — if the channel closes because the
//! driver disappeared — synthesizes a terminal `execute_error(DriverGone)`
//! so no subscriber is left waiting forever. Manager-to-driver control
//! messages (`execute`, `inputReply`, `interrupt`) are ordinary method calls
//! on the driver handle and do not need a queue of their own: the driver
//! trait's `&mut self` methods are the "control" direction of the bridge.

use crate::driver::EventRecord;
use crate::events::bus::EventBus;
use crate::types::KernelId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default bound for the driver → manager event channel. One bridge per
/// kernel; this is independent of the per-execution ring buffer in
/// `kernel::instance`, which bounds how much of that stream a slow
/// `executeStream` consumer may lag behind by.
pub const DEFAULT_BRIDGE_CAPACITY: usize = 256;

/// Handle to a running bridge. Dropping this does not stop the forwarding
/// task; call [`EventBridge::shutdown`] explicitly as part of `destroy`'s
/// cleanup stack.
#[derive(Debug)]
pub struct EventBridge {
    forward_task: JoinHandle<()>,
}

impl EventBridge {
    /// Create a bridge for `kernel_id`, forwarding onto `bus`. Returns the
    /// sender half to hand to `SandboxDriver::initialize`. The bridge itself
    /// holds no sender, so the forwarding task's channel closes as soon as
    /// the driver drops its copy.
    pub fn spawn(kernel_id: KernelId, bus: EventBus, capacity: usize) -> (Self, mpsc::Sender<EventRecord>) {
        let (events_tx, mut events_rx) = mpsc::channel(capacity);
        let driver_facing_tx = events_tx;

        let forward_task = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                bus.publish(&kernel_id, event);
            }
            // Channel closed: every sender (the driver's copy, and our own
            // retained copy below) was dropped. The driver is gone.
            bus.publish(
                &kernel_id,
                EventRecord::ExecuteError {
                    ename: "DriverGone".to_string(),
                    evalue: "sandbox driver terminated".to_string(),
                    traceback: Vec::new(),
                },
            );
        });

        (Self { forward_task }, driver_facing_tx)
    }

    /// Stop forwarding. Idempotent; safe to call even if the driver side
    /// already closed the channel and the task has already exited.
    pub fn shutdown(self) {
        self.forward_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::bus::EventBus;
    use crate::types::HandlerId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn forwards_events_tagged_with_kernel_id() {
        let bus = EventBus::new();
        let kernel_id = KernelId::compose(None, "k1");
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();

        let handler_id = HandlerId::next();
        bus.subscribe(kernel_id.clone(), None, handler_id, move |_kid, _event| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let (bridge, driver_tx) = EventBridge::spawn(kernel_id.clone(), bus.clone(), DEFAULT_BRIDGE_CAPACITY);
        driver_tx
            .send(EventRecord::Stream {
                name: crate::driver::StreamName::Stdout,
                text: "hi".into(),
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        bridge.shutdown();
    }

    #[tokio::test]
    async fn closing_the_driver_side_emits_driver_gone() {
        let bus = EventBus::new();
        let kernel_id = KernelId::compose(None, "k2");
        let got_driver_gone = Arc::new(AtomicUsize::new(0));
        let flag = got_driver_gone.clone();

        bus.subscribe(kernel_id.clone(), None, HandlerId::next(), move |_kid, event| {
            if matches!(event, EventRecord::ExecuteError { ename, .. } if ename == "DriverGone") {
                flag.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        let (_bridge, driver_tx) = EventBridge::spawn(kernel_id, bus, DEFAULT_BRIDGE_CAPACITY);
        drop(driver_tx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(got_driver_gone.load(Ordering::SeqCst), 1);
    }
}
