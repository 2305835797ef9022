//! Identity cache: native handle -> proxy.
//!
//! The weak map is the source of truth for identity and never keeps a proxy alive. The
//! strong map overlays it for objects the native side still references, so their proxies
//! (and the state stored in their env tables) survive collection.

use std::collections::HashMap;

use gc_arena::{Collect, Finalization, GcWeak, Mutation};
use tracing::trace;

use super::gate::ToggleRegistration;
use crate::error::BridgeError;
use crate::types::NativeHandle;
use crate::value::{Proxy, ProxyRecord};

#[derive(Collect)]
#[collect(no_drop)]
struct CacheEntry<'gc> {
    proxy: GcWeak<'gc, ProxyRecord<'gc>>,
    /// Toggle reference registered for this proxy, for object-kind instances.
    #[collect(require_static)]
    toggle: Option<ToggleRegistration>,
}

impl<'gc> CacheEntry<'gc> {
    fn generation(&self) -> Option<u64> {
        self.toggle.as_ref().map(|t| t.generation)
    }
}

#[derive(Collect, Default)]
#[collect(no_drop)]
pub struct IdentityCache<'gc> {
    weak: HashMap<NativeHandle, CacheEntry<'gc>>,
    strong: HashMap<NativeHandle, Proxy<'gc>>,
}

impl<'gc> IdentityCache<'gc> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live proxy for `handle`; a dead weak entry counts as absent.
    pub fn lookup(&self, mc: &Mutation<'gc>, handle: NativeHandle) -> Option<Proxy<'gc>> {
        self.weak
            .get(&handle)
            .and_then(|e| e.proxy.upgrade(mc))
            .map(Proxy::from_gc)
    }

    pub fn insert_weak(
        &mut self,
        handle: NativeHandle,
        proxy: Proxy<'gc>,
        toggle: Option<ToggleRegistration>,
    ) -> Result<(), BridgeError> {
        if self.weak.contains_key(&handle) {
            return Err(BridgeError::StaleCacheEntry(handle));
        }
        self.weak.insert(
            handle,
            CacheEntry {
                proxy: proxy.downgrade(),
                toggle,
            },
        );
        trace!(%handle, "cached proxy");
        Ok(())
    }

    /// Replaces whatever entry `handle` had, returning its toggle registration. Only valid
    /// once lookup has proved it dead.
    pub fn overwrite_weak(
        &mut self,
        handle: NativeHandle,
        proxy: Proxy<'gc>,
        toggle: Option<ToggleRegistration>,
    ) -> Option<ToggleRegistration> {
        self.strong.remove(&handle);
        self.weak
            .insert(
                handle,
                CacheEntry {
                    proxy: proxy.downgrade(),
                    toggle,
                },
            )
            .and_then(|old| old.toggle)
    }

    /// Generation of the toggle registration cached for `handle`.
    pub fn generation(&self, handle: NativeHandle) -> Option<u64> {
        self.weak.get(&handle).and_then(CacheEntry::generation)
    }

    /// Retains the proxy cached for `handle` if its toggle registration is `generation`.
    /// Returns whether anything changed.
    pub fn promote(&mut self, mc: &Mutation<'gc>, handle: NativeHandle, generation: u64) -> bool {
        if self.strong.contains_key(&handle) || self.generation(handle) != Some(generation) {
            return false;
        }
        let Some(proxy) = self.lookup(mc, handle) else {
            return false;
        };
        self.strong.insert(handle, proxy);
        trace!(%handle, generation, "promoted proxy to strong");
        true
    }

    pub fn demote(&mut self, handle: NativeHandle, generation: u64) -> bool {
        if self.generation(handle) != Some(generation) {
            return false;
        }
        let demoted = self.strong.remove(&handle).is_some();
        if demoted {
            trace!(%handle, generation, "demoted proxy to weak");
        }
        demoted
    }

    pub fn forget(&mut self, handle: NativeHandle) -> Option<ToggleRegistration> {
        self.strong.remove(&handle);
        self.weak.remove(&handle).and_then(|e| e.toggle)
    }

    /// Drops weak entries whose proxy is about to be reclaimed and returns their handles.
    pub fn sweep_dead(&mut self, fc: &Finalization<'gc>) -> Vec<(NativeHandle, Option<ToggleRegistration>)> {
        let dead: Vec<_> = self
            .weak
            .iter()
            .filter(|(_, e)| e.proxy.is_dead(fc))
            .map(|(h, _)| *h)
            .collect();
        dead.into_iter()
            .map(|handle| {
                trace!(%handle, "swept dead proxy");
                let toggle = self.weak.remove(&handle).and_then(|e| e.toggle);
                (handle, toggle)
            })
            .collect()
    }

    /// Empties both maps, returning every proxy that is still alive.
    pub fn drain_live(&mut self, mc: &Mutation<'gc>) -> Vec<(Proxy<'gc>, Option<ToggleRegistration>)> {
        self.strong.clear();
        self.weak
            .drain()
            .filter_map(|(_, e)| Some((Proxy::from_gc(e.proxy.upgrade(mc)?), e.toggle)))
            .collect()
    }

    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.weak.contains_key(&handle)
    }

    pub fn is_strong(&self, handle: NativeHandle) -> bool {
        self.strong.contains_key(&handle)
    }

    pub fn weak_len(&self) -> usize {
        self.weak.len()
    }

    pub fn strong_len(&self) -> usize {
        self.strong.len()
    }
}
