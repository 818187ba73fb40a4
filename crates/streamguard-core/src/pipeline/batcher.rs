// ── Outgoing event batcher ──
//
// Buffers domain events and hands them to the bus in batches: as soon as
// `max_batch_size` events are waiting, or `flush_interval` after the
// first event of a batch arrived, whichever comes first. Arrival order
// is preserved across batches. Listeners run with no batcher lock held,
// so a listener may push or flush again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::BatchPolicy;
use crate::events::{DomainEvent, DomainEventBus};
use crate::lock;

pub struct EventBatcher {
    policy: BatchPolicy,
    buffer: Mutex<Vec<DomainEvent>>,
    /// Flushed events awaiting delivery, in arrival order.
    outbox: Mutex<VecDeque<DomainEvent>>,
    /// Set while one caller drains the outbox; others only enqueue.
    delivering: AtomicBool,
    armed: Notify,
    bus: Arc<DomainEventBus>,
}

impl EventBatcher {
    pub fn new(policy: BatchPolicy, bus: Arc<DomainEventBus>) -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(Vec::with_capacity(policy.max_batch_size)),
            policy,
            outbox: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
            armed: Notify::new(),
            bus,
        })
    }

    /// Spawn the interval-flush timer. Without it, batches only go out
    /// on the size threshold or a manual [`flush`](Self::flush).
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let batcher = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = batcher.armed.notified() => {}
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(batcher.policy.flush_interval) => {}
                }
                batcher.flush();
            }
            trace!("batch timer exiting");
        })
    }

    pub fn push(&self, event: DomainEvent) {
        let full = {
            let mut buffer = lock(&self.buffer);
            buffer.push(event);
            if buffer.len() == 1 {
                self.armed.notify_one();
            }
            buffer.len() >= self.policy.max_batch_size
        };
        if full {
            self.flush();
        }
    }

    /// Deliver everything buffered right now. Returns the batch size.
    ///
    /// If another caller is already delivering (including a listener
    /// flushing from inside delivery), the batch is queued behind its
    /// events and this call returns without waiting for it.
    pub fn flush(&self) -> usize {
        let n = {
            let mut buffer = lock(&self.buffer);
            let n = buffer.len();
            // Still under the buffer lock: batches enter the outbox in order.
            lock(&self.outbox).extend(buffer.drain(..));
            n
        };
        if n > 0 {
            trace!(size = n, "flushing event batch");
        }
        self.drain_outbox();
        n
    }

    fn drain_outbox(&self) {
        loop {
            if self
                .delivering
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                return;
            }
            loop {
                let next = lock(&self.outbox).pop_front();
                let Some(event) = next else { break };
                self.bus.emit(event);
            }
            self.delivering.store(false, Ordering::Release);
            // Something may have been queued between the last pop and the store.
            if lock(&self.outbox).is_empty() {
                return;
            }
        }
    }

    pub fn pending(&self) -> usize {
        lock(&self.buffer).len()
    }
}

impl std::fmt::Debug for EventBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBatcher")
            .field("policy", &self.policy)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
