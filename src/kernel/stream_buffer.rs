//! Per-execution ring buffer feeding `executeStream` consumers.
//!
//! Bus subscription callbacks are synchronous (they run inside the bus's
//! internal lock), so they cannot `.await` a bounded channel send directly.
//! Instead each record is pushed into a small ring buffer guarded by a plain
//! mutex; a pump task drains it into the outbound channel the IPC layer
//! reads from. On overflow the oldest droppable record is coalesced away and
//! a one-time `backpressure_drop` marker is queued.

use crate::driver::EventRecord;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, Notify};

/// Default per-execution bound: 256 events, whichever bound (event count or
/// byte size) is hit first — the byte-size half is approximated by capping
/// individual `stream` text chunks upstream in the driver rather than
/// measured here.
pub const DEFAULT_RING_CAPACITY: usize = 256;

struct Ring {
    buffer: Mutex<VecDeque<EventRecord>>,
    dropped: AtomicU64,
    cap: usize,
    notify: Notify,
    closed: std::sync::atomic::AtomicBool,
}

/// Producer handle: push events from the bus subscription callback.
#[derive(Clone)]
pub struct StreamBufferProducer {
    ring: std::sync::Arc<Ring>,
}

impl StreamBufferProducer {
    pub fn push(&self, event: EventRecord) {
        let mut buf = self.ring.buffer.lock().expect("stream ring mutex poisoned");
        if buf.len() >= self.ring.cap {
            if let Some(pos) = buf.iter().position(|e| !e.is_undroppable()) {
                buf.remove(pos);
                self.ring.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        buf.push_back(event);
        drop(buf);
        self.ring.notify.notify_one();
    }

    /// Signal no more events are coming; wakes the pump to flush and exit.
    pub fn close(&self) {
        self.ring.closed.store(true, Ordering::SeqCst);
        self.ring.notify.notify_one();
    }
}

/// Create a ring buffer and spawn the pump task forwarding into a freshly
/// created bounded `mpsc` channel of `output_capacity`. Returns the producer
/// handle (for the bus subscription) and the consumer-facing receiver.
pub fn spawn(cap: usize, output_capacity: usize) -> (StreamBufferProducer, mpsc::Receiver<EventRecord>) {
    let ring = std::sync::Arc::new(Ring {
        buffer: Mutex::new(VecDeque::with_capacity(cap.min(1024))),
        dropped: AtomicU64::new(0),
        cap,
        notify: Notify::new(),
        closed: std::sync::atomic::AtomicBool::new(false),
    });
    let producer = StreamBufferProducer { ring: ring.clone() };
    let (out_tx, out_rx) = mpsc::channel(output_capacity);

    tokio::spawn(async move {
        loop {
            let mut drained = Vec::new();
            {
                let mut buf = ring.buffer.lock().expect("stream ring mutex poisoned");
                while let Some(event) = buf.pop_front() {
                    drained.push(event);
                }
            }

            let dropped = ring.dropped.swap(0, Ordering::Relaxed);
            if dropped > 0 {
                if out_tx
                    .send(EventRecord::BackpressureDrop { dropped_count: dropped })
                    .await
                    .is_err()
                {
                    break;
                }
            }

            for event in drained {
                if out_tx.send(event).await.is_err() {
                    return;
                }
            }

            if ring.closed.load(Ordering::SeqCst) {
                let remaining_empty = ring.buffer.lock().expect("stream ring mutex poisoned").is_empty();
                if remaining_empty {
                    break;
                }
            }

            ring.notify.notified().await;
        }
    });

    (producer, out_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::StreamName;

    #[tokio::test]
    async fn forwards_events_in_order() {
        let (producer, mut rx) = spawn(DEFAULT_RING_CAPACITY, 64);
        producer.push(EventRecord::Stream {
            name: StreamName::Stdout,
            text: "a".into(),
        });
        producer.push(EventRecord::Stream {
            name: StreamName::Stdout,
            text: "b".into(),
        });
        producer.close();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(
            first,
            EventRecord::Stream {
                name: StreamName::Stdout,
                text: "a".into()
            }
        );
        assert_eq!(
            second,
            EventRecord::Stream {
                name: StreamName::Stdout,
                text: "b".into()
            }
        );
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn overflow_drops_oldest_droppable_and_marks_backpressure() {
        let (producer, mut rx) = spawn(2, 64);
        producer.push(EventRecord::Stream {
            name: StreamName::Stdout,
            text: "a".into(),
        });
        producer.push(EventRecord::Stream {
            name: StreamName::Stdout,
            text: "b".into(),
        });
        producer.push(EventRecord::Stream {
            name: StreamName::Stdout,
            text: "c".into(),
        });
        producer.close();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, EventRecord::BackpressureDrop { dropped_count: 1 }));
    }

    #[tokio::test]
    async fn undroppable_events_survive_overflow() {
        let (producer, mut rx) = spawn(1, 64);
        producer.push(EventRecord::Stream {
            name: StreamName::Stdout,
            text: "a".into(),
        });
        producer.push(EventRecord::ExecuteResult {
            execution_count: 1,
            data: Default::default(),
            metadata: Default::default(),
        });
        producer.close();

        let mut got_result = false;
        while let Some(event) = rx.recv().await {
            if matches!(event, EventRecord::ExecuteResult { .. }) {
                got_result = true;
            }
        }
        assert!(got_result);
    }
}
