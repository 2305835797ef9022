//! Toggle notifications may be raised on any thread that changes an object's reference
//! count. The notifier registered with the object system only queues them; the bridge
//! applies them on its own thread whenever the runtime context is entered, left, pumped
//! or collected.

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::trace;

use crate::metrics::BridgeMetrics;
use crate::native::ToggleNotify;
use crate::types::NativeHandle;

/// A toggle notification waiting to be applied.
///
/// `generation` names the toggle registration that raised it. An event can arrive after
/// its proxy was released, while the address is already wrapped again; the generation
/// tells the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleEvent {
    pub object: NativeHandle,
    pub generation: u64,
    pub is_last_ref: bool,
}

#[derive(Debug)]
pub struct ToggleQueue {
    pending: Mutex<VecDeque<ToggleEvent>>,
    next_generation: AtomicU64,
    runtime_thread: ThreadId,
    metrics: Arc<BridgeMetrics>,
}

impl ToggleQueue {
    /// The calling thread becomes the runtime thread.
    pub fn new(metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            next_generation: AtomicU64::new(1),
            runtime_thread: thread::current().id(),
            metrics,
        }
    }

    /// A notifier for one proxy's toggle reference, tagged with a fresh generation.
    pub fn register(self: &Arc<Self>) -> ToggleRegistration {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        ToggleRegistration {
            generation,
            notify: Arc::new(ToggleSender {
                queue: self.clone(),
                generation,
            }),
        }
    }

    pub fn push(&self, event: ToggleEvent) {
        if thread::current().id() != self.runtime_thread {
            BridgeMetrics::bump(&self.metrics.foreign_toggles);
        }
        self.pending.lock().push_back(event);
    }

    pub fn pop(&self) -> Option<ToggleEvent> {
        self.pending.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// The notifier handed to [`ObjectSystem::add_toggle_ref`](crate::native::ObjectSystem::add_toggle_ref)
/// for one proxy, kept with its cache entry until the toggle reference is removed.
#[derive(Clone)]
pub struct ToggleRegistration {
    pub generation: u64,
    pub notify: Arc<dyn ToggleNotify>,
}

impl Debug for ToggleRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ToggleRegistration({})", self.generation)
    }
}

struct ToggleSender {
    queue: Arc<ToggleQueue>,
    generation: u64,
}

impl ToggleNotify for ToggleSender {
    fn notify(&self, object: NativeHandle, is_last_ref: bool) {
        trace!(%object, generation = self.generation, is_last_ref, "toggle notification queued");
        self.queue.push(ToggleEvent {
            object,
            generation: self.generation,
            is_last_ref,
        });
    }
}
