//! The external object system the bridge proxies into.
//!
//! Everything the bridge knows about native objects goes through [`ObjectSystem`]: type
//! tags and their ancestry, reference counting, toggle references and the per-type
//! ref/unref entry points of non-object fundamental types.

use std::ffi::c_void;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::types::{NativeHandle, TypeTag};

pub mod host;
pub mod library;

pub use host::HostObjects;
pub use library::NativeLibraries;

/// Takes one reference on an instance and returns it.
pub type RefFunction = unsafe extern "C" fn(*mut c_void) -> *mut c_void;
/// Drops one reference from an instance.
pub type UnrefFunction = unsafe extern "C" fn(*mut c_void);

/// Repository information for a fundamental type that is not the base object kind.
#[derive(Clone, Copy, Default)]
pub struct FundamentalInfo {
    pub ref_function: Option<RefFunction>,
    pub unref_function: Option<UnrefFunction>,
}

impl Debug for FundamentalInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundamentalInfo")
            .field("ref_function", &self.ref_function.is_some())
            .field("unref_function", &self.unref_function.is_some())
            .finish()
    }
}

/// Observer registered through [`ObjectSystem::add_toggle_ref`].
///
/// Called whenever the object's reference count crosses between exactly one and more
/// than one, possibly from any thread. The object system may hold internal locks during
/// the call, so implementations must not call back into it.
pub trait ToggleNotify: Send + Sync {
    fn notify(&self, object: NativeHandle, is_last_ref: bool);
}

pub trait ObjectSystem {
    /// Concrete type of a live instance.
    fn type_of(&self, object: NativeHandle) -> TypeTag;

    fn type_parent(&self, tag: TypeTag) -> Option<TypeTag>;

    fn type_name(&self, tag: TypeTag) -> String;

    fn type_fundamental(&self, tag: TypeTag) -> TypeTag;

    fn is_interface(&self, tag: TypeTag) -> bool;

    /// Whether `tag` is the base toggle-capable reference-counted kind or derives from it.
    fn is_object(&self, tag: TypeTag) -> bool;

    fn type_is_a(&self, tag: TypeTag, ancestor: TypeTag) -> bool {
        std::iter::successors(Some(tag), |t| self.type_parent(*t)).any(|t| t == ancestor)
    }

    /// Ref/unref entry points registered for exactly this tag, if any.
    fn fundamental_info(&self, tag: TypeTag) -> Option<FundamentalInfo>;

    /// Takes a reference, claiming the floating one if the instance still has it.
    fn ref_sink(&self, object: NativeHandle);

    fn ref_object(&self, object: NativeHandle);

    fn unref_object(&self, object: NativeHandle);

    /// Adds a reference that reports count transitions to `notify`.
    fn add_toggle_ref(&self, object: NativeHandle, notify: Arc<dyn ToggleNotify>);

    /// Removes a toggle reference previously added with the same `notify`, dropping the
    /// reference it held.
    fn remove_toggle_ref(&self, object: NativeHandle, notify: &Arc<dyn ToggleNotify>);

    /// Class structure of `object` as seen through `tag`, or the interface vtable when
    /// `tag` is an interface.
    fn class_struct(&self, object: NativeHandle, tag: TypeTag) -> Option<NativeHandle>;
}
