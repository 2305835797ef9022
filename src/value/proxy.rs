use std::cell::Cell;
use std::fmt::{Debug, Formatter};

use gc_arena::{Collect, Gc, GcWeak};

use super::{GCHandle, Table};
use crate::types::NativeHandle;

/// GC-allocated record standing in for one native object.
///
/// The record does not own `native` by itself; the reference it represents is managed by
/// the bridge and given back when the record is released or collected.
#[derive(Collect)]
#[collect(no_drop)]
pub struct ProxyRecord<'gc> {
    pub native: NativeHandle,
    #[collect(require_static)]
    released: Cell<bool>,
    pub env: Table<'gc>,
}

#[derive(Collect, Clone, Copy)]
#[collect(no_drop)]
#[repr(transparent)]
pub struct Proxy<'gc>(Gc<'gc, ProxyRecord<'gc>>);

impl<'gc> Proxy<'gc> {
    pub fn new(gc: GCHandle<'gc>, native: NativeHandle) -> Self {
        Self(Gc::new(
            gc,
            ProxyRecord {
                native,
                released: Cell::new(false),
                env: Table::new(gc),
            },
        ))
    }

    pub fn from_gc(record: Gc<'gc, ProxyRecord<'gc>>) -> Self {
        Self(record)
    }

    pub fn as_gc(self) -> Gc<'gc, ProxyRecord<'gc>> {
        self.0
    }

    pub fn downgrade(self) -> GcWeak<'gc, ProxyRecord<'gc>> {
        Gc::downgrade(self.0)
    }

    pub fn native(&self) -> NativeHandle {
        self.0.native
    }

    pub fn env(&self) -> Table<'gc> {
        self.0.env
    }

    /// Whether the native reference behind this proxy was already given back.
    pub fn is_released(&self) -> bool {
        self.0.released.get()
    }

    /// Returns `false` if the proxy was already released.
    pub(crate) fn mark_released(&self) -> bool {
        !self.0.released.replace(true)
    }

    pub fn ptr_eq(a: Self, b: Self) -> bool {
        Gc::ptr_eq(a.0, b.0)
    }
}

impl PartialEq for Proxy<'_> {
    fn eq(&self, other: &Self) -> bool {
        Gc::ptr_eq(self.0, other.0)
    }
}

impl Eq for Proxy<'_> {}

impl Debug for Proxy<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "proxy {} @ {:?}", self.native(), Gc::as_ptr(self.0))?;
        if self.is_released() {
            f.write_str(" (released)")?;
        }
        Ok(())
    }
}
