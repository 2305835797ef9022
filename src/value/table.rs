use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use gc_arena::{lock::RefLock, Collect, Gc};

use super::{GCHandle, Value};

/// String-keyed table, used as the per-proxy environment.
#[derive(Collect, Clone, Copy)]
#[collect(no_drop)]
#[repr(transparent)]
pub struct Table<'gc>(Gc<'gc, RefLock<HashMap<String, Value<'gc>>>>);

impl<'gc> Table<'gc> {
    pub fn new(gc: GCHandle<'gc>) -> Self {
        Self(Gc::new(gc, RefLock::new(HashMap::new())))
    }

    pub fn get(&self, key: &str) -> Value<'gc> {
        self.0.borrow().get(key).copied().unwrap_or(Value::Nil)
    }

    /// Stores `value` under `key`; storing nil removes the key.
    pub fn set(&self, gc: GCHandle<'gc>, key: impl Into<String>, value: Value<'gc>) {
        let mut map = self.0.borrow_mut(gc);
        let key = key.into();
        if value.is_nil() {
            map.remove(&key);
        } else {
            map.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

impl Debug for Table<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "table @ {:?} ({} entries)", Gc::as_ptr(self.0), self.len())
    }
}
