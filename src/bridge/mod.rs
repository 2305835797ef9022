//! The bridge context: the arena holding the identity cache, plus everything outside
//! the garbage-collected heap that cache maintenance needs.

use std::cell::Cell;
use std::sync::Arc;
use std::time::Instant;

use gc_arena::{lock::RefLock, Arena, Collect, DynamicRootSet, Finalization, Gc, Rootable};
use tracing::debug;

use crate::config::BridgeConfig;
use crate::metrics::{BridgeMetrics, MetricsSnapshot};
use crate::native::ObjectSystem;
use crate::types::TypeRegistry;

pub mod cache;
pub mod facade;
pub mod gate;
mod lifetime;
pub mod marshal;

pub use cache::IdentityCache;
pub use facade::{Context, Conversion, QueryMode, QueryResult, StashedProxy};
pub use gate::{ToggleEvent, ToggleQueue, ToggleRegistration};
pub use marshal::{EnvMarshaller, FieldInfo, Marshaller};

#[derive(Collect)]
#[collect(no_drop)]
pub struct BridgeRoot<'gc> {
    pub(crate) roots: DynamicRootSet<'gc>,
    pub(crate) cache: Gc<'gc, RefLock<IdentityCache<'gc>>>,
}

impl<'gc> BridgeRoot<'gc> {
    /// Releases every proxy the collector is about to reclaim.
    fn finalize_dead(&self, fc: &Finalization<'gc>, state: &BridgeState) {
        let dead = self.cache.borrow_mut(fc).sweep_dead(fc);
        if !dead.is_empty() {
            debug!(count = dead.len(), "releasing collected proxies");
        }
        for (object, toggle) in dead {
            state.release_or_leak(object, toggle.as_ref());
        }
    }
}

pub type BridgeArena = Arena<Rootable![BridgeRoot<'_>]>;

/// Non-GC state shared by every context entered on a [`Bridge`].
pub struct BridgeState {
    pub(crate) objects: Arc<dyn ObjectSystem>,
    pub(crate) types: TypeRegistry,
    pub(crate) marshaller: Box<dyn Marshaller>,
    pub(crate) queue: Arc<ToggleQueue>,
    pub(crate) config: BridgeConfig,
    pub(crate) metrics: Arc<BridgeMetrics>,
    pub(crate) created_since_collect: Cell<usize>,
}

impl BridgeState {
    fn new(
        objects: Arc<dyn ObjectSystem>,
        config: BridgeConfig,
        marshaller: Box<dyn Marshaller>,
    ) -> Self {
        let metrics = Arc::new(BridgeMetrics::new());
        let queue = Arc::new(ToggleQueue::new(metrics.clone()));
        Self {
            objects,
            types: TypeRegistry::new(),
            marshaller,
            queue,
            config,
            metrics,
            created_since_collect: Cell::new(0),
        }
    }
}

/// A scripting runtime instance bound to one object system.
///
/// All proxy operations happen inside [`Bridge::enter`]. The thread that creates the
/// bridge is the runtime thread; toggle notifications raised elsewhere are queued and
/// applied the next time the bridge runs.
pub struct Bridge {
    arena: BridgeArena,
    state: BridgeState,
    closed: bool,
}

impl Bridge {
    pub fn new(objects: Arc<dyn ObjectSystem>, config: BridgeConfig) -> Self {
        Self::with_marshaller(objects, config, Box::new(EnvMarshaller))
    }

    pub fn with_marshaller(
        objects: Arc<dyn ObjectSystem>,
        config: BridgeConfig,
        marshaller: Box<dyn Marshaller>,
    ) -> Self {
        let arena = BridgeArena::new(|mc| BridgeRoot {
            roots: DynamicRootSet::new(mc),
            cache: Gc::new(mc, RefLock::new(IdentityCache::new())),
        });
        debug!(?config, "bridge started");
        Self {
            arena,
            state: BridgeState::new(objects, config, marshaller),
            closed: false,
        }
    }

    /// Runs `f` inside the runtime context. Pending toggle notifications are applied
    /// before `f` runs and again after it returns.
    pub fn enter<F, T>(&mut self, f: F) -> T
    where
        F: for<'gc> FnOnce(Context<'gc, '_>) -> T,
    {
        let state = &self.state;
        let result = self.arena.mutate(|mc, root| {
            let ctx = Context::new(mc, root, state);
            ctx.pump();
            let result = f(ctx);
            ctx.pump();
            result
        });

        if let Some(threshold) = self.state.config.collect_threshold {
            if self.state.created_since_collect.get() >= threshold {
                self.collect();
            }
        }
        result
    }

    /// Applies queued toggle notifications.
    pub fn pump(&mut self) {
        let state = &self.state;
        self.arena
            .mutate(|mc, root| Context::new(mc, root, state).pump());
    }

    /// Runs a full collection cycle, releasing the native reference of every proxy that
    /// is no longer reachable.
    pub fn collect(&mut self) {
        let start_time = Instant::now();
        self.pump();

        let state = &self.state;
        let mut marked = None;
        while marked.is_none() {
            marked = self.arena.mark_all();
        }
        if let Some(marked) = marked {
            marked.finalize(|fc, root| root.finalize_dead(fc, state));
        }
        self.arena.collect_all();

        self.state.created_since_collect.set(0);
        let duration = start_time.elapsed();
        self.state.metrics.record_collection(duration);
        debug!(?duration, "collection finished");

        self.pump();
    }

    /// Releases every remaining proxy. Dropping the bridge does the same.
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let state = &self.state;
        let released = self.arena.mutate(|mc, root| {
            Context::new(mc, root, state).pump();
            let live = root.cache.borrow_mut(mc).drain_live(mc);
            let mut released = 0;
            for (proxy, toggle) in live {
                if proxy.mark_released() {
                    state.release_or_leak(proxy.native(), toggle.as_ref());
                    released += 1;
                }
            }
            released
        });
        debug!(released, "bridge closed");
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.state.types
    }

    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.state.types
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.metrics.snapshot()
    }

    /// Number of toggle notifications waiting to be applied.
    pub fn pending_toggles(&self) -> usize {
        self.state.queue.len()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
pub(crate) fn test_state(objects: Arc<dyn ObjectSystem>) -> BridgeState {
    BridgeState::new(
        objects,
        BridgeConfig::default().without_auto_collect(),
        Box::new(EnvMarshaller),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::HostObjects;

    fn bridge(host: &Arc<HostObjects>) -> Bridge {
        Bridge::new(host.clone(), BridgeConfig::default().without_auto_collect())
    }

    #[test]
    fn test_late_toggle_from_released_proxy_is_ignored() {
        let host = Arc::new(HostObjects::new());
        let mut bridge = bridge(&host);

        let first = host.new_instance(host.object_type(), true);
        bridge.enter(|ctx| {
            ctx.native_to_handle(Some(first), false);
        });
        let stale = bridge
            .arena
            .mutate(|_, root| root.cache.borrow().generation(first))
            .unwrap();
        bridge.collect();
        assert!(!host.is_alive(first));

        // wrapped at an address that used to belong to the released proxy
        let second = host.new_instance(host.object_type(), true);
        bridge.enter(|ctx| {
            ctx.native_to_handle(Some(second), false);
        });
        let current = bridge
            .arena
            .mutate(|_, root| root.cache.borrow().generation(second))
            .unwrap();
        assert_ne!(stale, current);

        bridge.state.queue.push(ToggleEvent {
            object: second,
            generation: stale,
            is_last_ref: false,
        });
        assert!(!bridge.enter(|ctx| ctx.is_strongly_cached(second)));

        bridge.collect();
        assert!(!host.is_alive(second));
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn test_types_visible_from_bridge() {
        let host = Arc::new(HostObjects::new());
        let widget = host.define_type("DemoWidget", host.object_type());
        let mut bridge = bridge(&host);
        assert!(bridge.types().is_empty());

        bridge
            .types_mut()
            .register(crate::types::TypeDescriptor::new("Demo.Widget", widget));
        assert_eq!(bridge.types().len(), 1);
        assert_eq!(
            bridge.types().descriptor(widget).map(|d| d.name.as_str()),
            Some("Demo.Widget")
        );
    }
}
