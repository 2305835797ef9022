//! In-process reference-counted object host.
//!
//! [`HostObjects`] implements [`ObjectSystem`] with the semantics the bridge expects from
//! a real object system: atomic reference counts, floating references, toggle references
//! that fire on 1 ⇄ 2 transitions from whichever thread changed the count, fundamental
//! types with C-ABI ref/unref entry points, interfaces and class structures.
//!
//! Instances are heap allocations whose address is their [`NativeHandle`]; they are freed
//! when the last reference goes away.

use std::collections::HashSet;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{trace, warn};

use super::{FundamentalInfo, ObjectSystem, ToggleNotify};
use crate::types::{NativeHandle, TypeTag};

/// Class structure handed out by [`ObjectSystem::class_struct`].
#[repr(C)]
#[derive(Debug)]
pub struct HostClass {
    pub tag: TypeTag,
}

struct HostType {
    name: String,
    parent: Option<TypeTag>,
    fundamental: Option<TypeTag>,
    interface: bool,
    interfaces: Vec<TypeTag>,
    info: Option<FundamentalInfo>,
    class: Box<HostClass>,
}

#[derive(Default)]
struct HostShared {
    live: Mutex<HashSet<usize>>,
    disposed: AtomicUsize,
}

struct HostInstance {
    tag: TypeTag,
    refs: AtomicUsize,
    floating: AtomicBool,
    toggles: Mutex<Vec<Arc<dyn ToggleNotify>>>,
    shared: Arc<HostShared>,
}

impl HostInstance {
    fn handle(&self) -> Option<NativeHandle> {
        NativeHandle::from_ptr(self as *const Self)
    }

    // Count changes that can cross 1 <-> 2 happen under the toggle lock, and the
    // notification is sent before it is released, so observers see transitions in order.
    fn acquire(&self) {
        let toggles = self.toggles.lock();
        let old = self.refs.fetch_add(1, Ordering::AcqRel);
        if old == 1 {
            Self::toggle(&toggles, self.handle(), false);
        }
    }

    /// # Safety
    /// `ptr` must point to a live instance on which the caller owns a reference.
    unsafe fn release(ptr: *const HostInstance) {
        // SAFETY: the caller's reference keeps the instance alive until the decrement.
        let this = unsafe { &*ptr };
        let old = {
            let toggles = this.toggles.lock();
            let old = this.refs.fetch_sub(1, Ordering::AcqRel);
            if old == 2 {
                // whoever holds the last reference may free the instance once we unlock
                Self::toggle(&toggles, this.handle(), true);
            }
            old
        };
        match old {
            0 => panic!("reference count underflow on {:p}", ptr),
            1 => {
                // SAFETY: that was the last reference.
                unsafe { Self::destroy(ptr) }
            }
            _ => {}
        }
    }

    /// # Safety
    /// `ptr` must come from `Box::into_raw` and have no references left.
    unsafe fn destroy(ptr: *const HostInstance) {
        // SAFETY: ownership of the allocation returns to us once the count hits zero.
        let boxed = unsafe { Box::from_raw(ptr as *mut HostInstance) };
        boxed.shared.live.lock().remove(&(ptr as usize));
        boxed.shared.disposed.fetch_add(1, Ordering::AcqRel);
        trace!(object = ?ptr, "host instance disposed");
    }

    fn toggle(toggles: &[Arc<dyn ToggleNotify>], handle: Option<NativeHandle>, is_last_ref: bool) {
        // only a single toggle reference receives notifications
        if let ([notify], Some(handle)) = (toggles, handle) {
            notify.notify(handle, is_last_ref);
        }
    }
}

/// C-ABI `ref` entry point for host instances of any fundamental type.
///
/// # Safety
/// `ptr` must be null or a live host instance.
pub unsafe extern "C" fn host_instance_ref(ptr: *mut c_void) -> *mut c_void {
    // SAFETY: guaranteed by the caller.
    if let Some(this) = unsafe { (ptr as *const HostInstance).as_ref() } {
        this.acquire();
    }
    ptr
}

/// C-ABI `unref` entry point for host instances of any fundamental type.
///
/// # Safety
/// `ptr` must be null or a live host instance on which the caller owns a reference.
pub unsafe extern "C" fn host_instance_unref(ptr: *mut c_void) {
    if !ptr.is_null() {
        // SAFETY: guaranteed by the caller.
        unsafe { HostInstance::release(ptr as *const HostInstance) }
    }
}

pub struct HostObjects {
    types: RwLock<Vec<HostType>>,
    shared: Arc<HostShared>,
    object: TypeTag,
}

impl HostObjects {
    /// Creates a host with the base object kind already defined as `Object`.
    pub fn new() -> Self {
        let mut host = Self {
            types: RwLock::new(vec![]),
            shared: Arc::new(HostShared::default()),
            object: TypeTag::new(1).unwrap_or_else(|| unreachable!()),
        };
        host.object = host.push_type("Object", None, None, false, None);
        host
    }

    /// ref/unref entry points that work on every host instance.
    pub fn instance_functions() -> FundamentalInfo {
        FundamentalInfo {
            ref_function: Some(host_instance_ref),
            unref_function: Some(host_instance_unref),
        }
    }

    pub fn object_type(&self) -> TypeTag {
        self.object
    }

    fn push_type(
        &self,
        name: &str,
        parent: Option<TypeTag>,
        fundamental: Option<TypeTag>,
        interface: bool,
        info: Option<FundamentalInfo>,
    ) -> TypeTag {
        let mut types = self.types.write();
        let tag = TypeTag::new(types.len() + 1).unwrap_or_else(|| unreachable!());
        types.push(HostType {
            name: name.to_string(),
            parent,
            fundamental,
            interface,
            interfaces: vec![],
            info,
            class: Box::new(HostClass { tag }),
        });
        tag
    }

    fn with_type<T>(&self, tag: TypeTag, op: impl FnOnce(&HostType) -> T) -> Option<T> {
        self.types.read().get(tag.raw() - 1).map(op)
    }

    /// Defines a type deriving from `parent`; it inherits the parent's fundamental.
    pub fn define_type(&self, name: &str, parent: TypeTag) -> TypeTag {
        let fundamental = self.type_fundamental(parent);
        self.push_type(name, Some(parent), Some(fundamental), false, None)
    }

    /// Defines a new fundamental type, optionally with registered ref/unref functions.
    pub fn define_fundamental(&self, name: &str, info: Option<FundamentalInfo>) -> TypeTag {
        self.push_type(name, None, None, false, info)
    }

    pub fn define_interface(&self, name: &str) -> TypeTag {
        self.push_type(name, None, None, true, None)
    }

    pub fn implement(&self, tag: TypeTag, interface: TypeTag) {
        if let Some(t) = self.types.write().get_mut(tag.raw() - 1) {
            t.interfaces.push(interface);
        }
    }

    pub fn set_fundamental_info(&self, tag: TypeTag, info: FundamentalInfo) {
        if let Some(t) = self.types.write().get_mut(tag.raw() - 1) {
            t.info = Some(info);
        }
    }

    /// Allocates an instance holding one reference, floating or not.
    pub fn new_instance(&self, tag: TypeTag, floating: bool) -> NativeHandle {
        let instance = Box::new(HostInstance {
            tag,
            refs: AtomicUsize::new(1),
            floating: AtomicBool::new(floating),
            toggles: Mutex::new(vec![]),
            shared: self.shared.clone(),
        });
        let ptr = Box::into_raw(instance);
        self.shared.live.lock().insert(ptr as usize);
        NativeHandle::from_ptr(ptr).unwrap_or_else(|| unreachable!())
    }

    pub fn is_alive(&self, object: NativeHandle) -> bool {
        self.shared.live.lock().contains(&object.addr())
    }

    /// Current reference count, or `None` once the instance has been freed.
    pub fn ref_count(&self, object: NativeHandle) -> Option<usize> {
        let live = self.shared.live.lock();
        if !live.contains(&object.addr()) {
            return None;
        }
        // SAFETY: instances leave the live set before they are freed, and we hold its lock.
        let instance = unsafe { Self::instance(object) };
        Some(instance.refs.load(Ordering::Acquire))
    }

    pub fn is_floating(&self, object: NativeHandle) -> Option<bool> {
        let live = self.shared.live.lock();
        if !live.contains(&object.addr()) {
            return None;
        }
        // SAFETY: see `ref_count`.
        let instance = unsafe { Self::instance(object) };
        Some(instance.floating.load(Ordering::Acquire))
    }

    pub fn toggle_refs(&self, object: NativeHandle) -> usize {
        let live = self.shared.live.lock();
        if !live.contains(&object.addr()) {
            return 0;
        }
        // SAFETY: see `ref_count`.
        let instance = unsafe { Self::instance(object) };
        let count = instance.toggles.lock().len();
        count
    }

    pub fn live_count(&self) -> usize {
        self.shared.live.lock().len()
    }

    pub fn disposed_count(&self) -> usize {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// # Safety
    /// `object` must be a live host instance for the whole lifetime `'a`.
    unsafe fn instance<'a>(object: NativeHandle) -> &'a HostInstance {
        // SAFETY: guaranteed by the caller.
        unsafe { &*(object.as_ptr() as *const HostInstance) }
    }
}

impl Default for HostObjects {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectSystem for HostObjects {
    fn type_of(&self, object: NativeHandle) -> TypeTag {
        // SAFETY: the object system contract only hands us live instances.
        unsafe { Self::instance(object) }.tag
    }

    fn type_parent(&self, tag: TypeTag) -> Option<TypeTag> {
        self.with_type(tag, |t| t.parent).flatten()
    }

    fn type_name(&self, tag: TypeTag) -> String {
        self.with_type(tag, |t| t.name.clone())
            .unwrap_or_else(|| format!("<invalid {tag}>"))
    }

    fn type_fundamental(&self, tag: TypeTag) -> TypeTag {
        self.with_type(tag, |t| t.fundamental).flatten().unwrap_or(tag)
    }

    fn is_interface(&self, tag: TypeTag) -> bool {
        self.with_type(tag, |t| t.interface).unwrap_or(false)
    }

    fn is_object(&self, tag: TypeTag) -> bool {
        self.type_fundamental(tag) == self.object
    }

    fn type_is_a(&self, tag: TypeTag, ancestor: TypeTag) -> bool {
        let interface = self.is_interface(ancestor);
        std::iter::successors(Some(tag), |t| self.type_parent(*t)).any(|t| {
            t == ancestor
                || (interface
                    && self
                        .with_type(t, |ty| ty.interfaces.contains(&ancestor))
                        .unwrap_or(false))
        })
    }

    fn fundamental_info(&self, tag: TypeTag) -> Option<FundamentalInfo> {
        self.with_type(tag, |t| t.info).flatten()
    }

    fn ref_sink(&self, object: NativeHandle) {
        // SAFETY: the object system contract only hands us live instances.
        let instance = unsafe { Self::instance(object) };
        if !instance.floating.swap(false, Ordering::AcqRel) {
            instance.acquire();
        }
    }

    fn ref_object(&self, object: NativeHandle) {
        // SAFETY: the object system contract only hands us live instances.
        unsafe { Self::instance(object) }.acquire();
    }

    fn unref_object(&self, object: NativeHandle) {
        // SAFETY: the caller gives up a reference it owns.
        unsafe { HostInstance::release(object.as_ptr() as *const HostInstance) }
    }

    fn add_toggle_ref(&self, object: NativeHandle, notify: Arc<dyn ToggleNotify>) {
        // SAFETY: the object system contract only hands us live instances.
        let instance = unsafe { Self::instance(object) };
        instance.acquire();
        instance.toggles.lock().push(notify);
    }

    fn remove_toggle_ref(&self, object: NativeHandle, notify: &Arc<dyn ToggleNotify>) {
        // SAFETY: the toggle reference being removed keeps the instance alive.
        let instance = unsafe { Self::instance(object) };
        let removed = {
            let mut toggles = instance.toggles.lock();
            match toggles.iter().position(|t| Arc::ptr_eq(t, notify)) {
                Some(index) => {
                    toggles.remove(index);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.unref_object(object);
        } else {
            warn!(%object, "no toggle reference registered for this notifier");
        }
    }

    fn class_struct(&self, object: NativeHandle, tag: TypeTag) -> Option<NativeHandle> {
        if !self.type_is_a(self.type_of(object), tag) {
            return None;
        }
        self.with_type(tag, |t| NativeHandle::from_ptr(&*t.class as *const HostClass))
            .flatten()
    }
}
