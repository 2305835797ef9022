//! Native reference ownership: taking a reference when a proxy is created and giving it
//! back when the proxy goes away.
//!
//! Object-kind instances are tracked through a toggle reference. Other fundamental types go
//! through their registered ref/unref functions, falling back to the lifetime hooks of
//! their nearest descriptor.

use tracing::{debug, warn};

use super::gate::ToggleRegistration;
use super::BridgeState;
use crate::error::LifetimeError;
use crate::metrics::BridgeMetrics;
use crate::native::{FundamentalInfo, ObjectSystem};
use crate::types::{LifetimeHook, LoadedHook, NativeHandle, TypeTag};

impl BridgeState {
    fn objects(&self) -> &dyn ObjectSystem {
        &*self.objects
    }

    /// Info registered for the tag itself, otherwise for its fundamental type.
    fn fundamental_functions(&self, tag: TypeTag) -> Option<FundamentalInfo> {
        let objects = self.objects();
        objects
            .fundamental_info(tag)
            .or_else(|| objects.fundamental_info(objects.type_fundamental(tag)))
    }

    /// Takes one reference on `object`, sinking a floating one if present.
    pub(crate) fn acquire_ownership(&self, object: NativeHandle) -> Result<(), LifetimeError> {
        let objects = self.objects();
        let tag = objects.type_of(object);

        if objects.is_object(tag) {
            objects.ref_sink(object);
            return Ok(());
        }

        if let Some(ref_function) = self.fundamental_functions(tag).and_then(|i| i.ref_function) {
            // SAFETY: the object system registered this function for the object's type.
            unsafe { ref_function(object.as_ptr()) };
            return Ok(());
        }

        if let Some(LoadedHook::Refsink(refsink)) =
            self.types.load_hook(objects, tag, LifetimeHook::Refsink)
        {
            // SAFETY: the hook was resolved for a descriptor in the object's ancestry.
            unsafe { refsink(object.as_ptr()) };
            return Ok(());
        }

        Err(LifetimeError::Unsupported {
            op: "ref",
            type_name: objects.type_name(tag),
        })
    }

    /// Gives back the reference the bridge holds on `object`.
    ///
    /// With a `toggle` registration the toggle reference of an object-kind instance is
    /// removed; otherwise a plain reference is dropped.
    pub(crate) fn release(
        &self,
        object: NativeHandle,
        toggle: Option<&ToggleRegistration>,
    ) -> Result<(), LifetimeError> {
        let objects = self.objects();
        let tag = objects.type_of(object);

        if objects.is_object(tag) {
            match toggle {
                Some(toggle) => objects.remove_toggle_ref(object, &toggle.notify),
                None => objects.unref_object(object),
            }
            return Ok(());
        }

        if let Some(unref) = self.fundamental_functions(tag).and_then(|i| i.unref_function) {
            // SAFETY: the bridge owns the reference being dropped.
            unsafe { unref(object.as_ptr()) };
            return Ok(());
        }

        if let Some(LoadedHook::Unref(unref)) =
            self.types.load_hook(objects, tag, LifetimeHook::Unref)
        {
            // SAFETY: as above; the hook belongs to the object's nearest descriptor.
            unsafe { unref(object.as_ptr()) };
            return Ok(());
        }

        Err(LifetimeError::Unsupported {
            op: "unref",
            type_name: objects.type_name(tag),
        })
    }

    /// Returns whether the bridge now owns a reference.
    pub(crate) fn take_ownership(&self, object: NativeHandle) -> bool {
        match self.acquire_ownership(object) {
            Ok(()) => true,
            Err(err) => {
                warn!(%object, "{err}, borrowing it instead");
                false
            }
        }
    }

    pub(crate) fn release_or_leak(&self, object: NativeHandle, toggle: Option<&ToggleRegistration>) {
        match self.release(object, toggle) {
            Ok(()) => {
                BridgeMetrics::bump(&self.metrics.releases);
                debug!(%object, toggle = ?toggle.map(|t| t.generation), "released native reference");
            }
            Err(err) => {
                BridgeMetrics::bump(&self.metrics.leaks);
                warn!(%object, "{err}, leaking it");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::bridge::test_state;
    use crate::native::{FundamentalInfo, HostObjects, ObjectSystem};
    use crate::types::{CustomLifetime, TypeDescriptor};

    #[test]
    fn test_object_kind_sinks_floating_reference() {
        let host = Arc::new(HostObjects::new());
        let state = test_state(host.clone());
        let obj = host.new_instance(host.object_type(), true);

        state.acquire_ownership(obj).unwrap();
        assert_eq!(host.ref_count(obj), Some(1));
        assert_eq!(host.is_floating(obj), Some(false));

        state.release(obj, None).unwrap();
        assert!(!host.is_alive(obj));
    }

    #[test]
    fn test_fundamental_falls_back_to_its_fundamental_info() {
        let host = Arc::new(HostObjects::new());
        let param = host.define_fundamental("GParam", Some(HostObjects::instance_functions()));
        let derived = host.define_type("GParamInt", param);
        let state = test_state(host.clone());
        let obj = host.new_instance(derived, false);

        state.acquire_ownership(obj).unwrap();
        assert_eq!(host.ref_count(obj), Some(2));
        state.release(obj, None).unwrap();
        assert_eq!(host.ref_count(obj), Some(1));
        host.unref_object(obj);
    }

    #[test]
    fn test_info_without_functions_does_not_fall_back() {
        let host = Arc::new(HostObjects::new());
        let param = host.define_fundamental("GParam", Some(HostObjects::instance_functions()));
        let derived = host.define_type("GParamInt", param);
        host.set_fundamental_info(derived, FundamentalInfo::default());
        let state = test_state(host.clone());
        let obj = host.new_instance(derived, false);

        assert!(state.acquire_ownership(obj).is_err());
        host.unref_object(obj);
    }

    #[test]
    fn test_custom_hooks_from_descriptor() {
        let host = Arc::new(HostObjects::new());
        let boxed = host.define_fundamental("Boxed", None);
        let rect = host.define_type("Rectangle", boxed);
        let functions = HostObjects::instance_functions();
        let mut state = test_state(host.clone());
        state.types.register(TypeDescriptor::new("Boxed", boxed).with_lifetime(CustomLifetime {
            refsink: functions.ref_function,
            unref: functions.unref_function,
            keepalive: None,
        }));
        let obj = host.new_instance(rect, false);

        assert!(state.take_ownership(obj));
        assert_eq!(host.ref_count(obj), Some(2));
        state.release_or_leak(obj, None);
        state.release_or_leak(obj, None);
        assert!(!host.is_alive(obj));
        assert_eq!(state.metrics.snapshot().releases, 2);
    }

    #[test]
    fn test_unsupported_type_is_borrowed_and_leaked() {
        let host = Arc::new(HostObjects::new());
        let opaque = host.define_fundamental("Opaque", None);
        let state = test_state(host.clone());
        let obj = host.new_instance(opaque, false);

        let err = state.acquire_ownership(obj).unwrap_err();
        assert_eq!(err.to_string(), "no way to ref type `Opaque`");
        assert!(!state.take_ownership(obj));
        state.release_or_leak(obj, None);

        assert_eq!(host.ref_count(obj), Some(1));
        assert_eq!(state.metrics.snapshot().leaks, 1);
        host.unref_object(obj);
    }
}
