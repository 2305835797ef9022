//! Script-side values the bridge hands out and accepts.

use gc_arena::{Collect, Gc, Mutation};

use crate::types::NativeHandle;

pub mod proxy;
pub mod table;

pub use proxy::{Proxy, ProxyRecord};
pub use table::Table;

pub type GCHandle<'gc> = &'gc Mutation<'gc>;

#[derive(Collect, Clone, Copy, Debug)]
#[collect(no_drop)]
pub enum Value<'gc> {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(Gc<'gc, String>),
    Table(Table<'gc>),
    Proxy(Proxy<'gc>),
    /// Raw native pointer that is not wrapped in a proxy.
    Pointer(NativeHandle),
}

impl<'gc> Value<'gc> {
    pub fn string(gc: GCHandle<'gc>, s: impl Into<String>) -> Self {
        Value::String(Gc::new(gc, s.into()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Proxy(_) => "proxy",
            Value::Pointer(_) => "pointer",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_proxy(&self) -> Option<Proxy<'gc>> {
        match self {
            Value::Proxy(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl<'gc> From<Proxy<'gc>> for Value<'gc> {
    fn from(proxy: Proxy<'gc>) -> Self {
        Value::Proxy(proxy)
    }
}

impl<'gc> From<Table<'gc>> for Value<'gc> {
    fn from(table: Table<'gc>) -> Self {
        Value::Table(table)
    }
}

impl From<bool> for Value<'_> {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value<'_> {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value<'_> {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}
