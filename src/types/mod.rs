use std::ffi::c_void;
use std::fmt::{Debug, Display, Formatter};
use std::num::NonZeroUsize;

use gc_arena::{unsafe_empty_collect, Collect};

pub mod registry;

pub use registry::{
    CustomLifetime, LifetimeHook, LoadedHook, Resolved, TypeDescriptor, TypeRegistry,
};

/// Address of an object owned by the external object system.
///
/// This is the identity key of the proxy cache. The bridge never dereferences it; it is
/// only ever handed back to the [`ObjectSystem`](crate::native::ObjectSystem).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NativeHandle(NonZeroUsize);
unsafe_empty_collect!(NativeHandle);

impl NativeHandle {
    /// Returns `None` for a null pointer.
    pub fn from_ptr<T>(ptr: *const T) -> Option<Self> {
        NonZeroUsize::new(ptr as usize).map(Self)
    }

    pub fn from_addr(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(Self)
    }

    pub fn addr(self) -> usize {
        self.0.get()
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }
}

impl Debug for NativeHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeHandle({:#x})", self.addr())
    }
}

impl Display for NativeHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.addr())
    }
}

/// Runtime type identifier of a native object. Zero is reserved for "invalid", which is
/// expressed as `Option<TypeTag>` instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeTag(NonZeroUsize);
unsafe_empty_collect!(TypeTag);

impl TypeTag {
    pub fn new(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    pub fn raw(self) -> usize {
        self.0.get()
    }
}

impl Debug for TypeTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypeTag({})", self.raw())
    }
}

impl Display for TypeTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw())
    }
}
