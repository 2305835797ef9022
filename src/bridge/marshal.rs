//! The seam to the marshalling layer that converts members and raw fields.

use super::Context;
use crate::error::BridgeError;
use crate::types::{NativeHandle, TypeDescriptor};
use crate::value::{Proxy, Value};

/// Raw field of a native instance, as described by type introspection data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub offset: usize,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, offset: usize) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }
}

pub trait Marshaller {
    /// Reads (`value` is `None`) or writes a member of `proxy`, whose type resolved to
    /// `descriptor`. Writes return nil.
    fn access<'gc>(
        &self,
        ctx: Context<'gc, '_>,
        descriptor: &TypeDescriptor,
        proxy: Proxy<'gc>,
        member: &str,
        value: Option<Value<'gc>>,
    ) -> Result<Value<'gc>, BridgeError>;

    fn field<'gc>(
        &self,
        ctx: Context<'gc, '_>,
        object: NativeHandle,
        field: &FieldInfo,
        value: Option<Value<'gc>>,
    ) -> Result<Value<'gc>, BridgeError>;
}

/// Serves members from the proxy's env table. Raw fields are refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvMarshaller;

impl Marshaller for EnvMarshaller {
    fn access<'gc>(
        &self,
        ctx: Context<'gc, '_>,
        _descriptor: &TypeDescriptor,
        proxy: Proxy<'gc>,
        member: &str,
        value: Option<Value<'gc>>,
    ) -> Result<Value<'gc>, BridgeError> {
        let env = proxy.env();
        match value {
            None => Ok(env.get(member)),
            Some(value) => {
                env.set(ctx.mutation(), member, value);
                Ok(Value::Nil)
            }
        }
    }

    fn field<'gc>(
        &self,
        _ctx: Context<'gc, '_>,
        object: NativeHandle,
        field: &FieldInfo,
        _value: Option<Value<'gc>>,
    ) -> Result<Value<'gc>, BridgeError> {
        Err(BridgeError::Marshal {
            member: field.name.clone(),
            reason: format!("no field marshalling available for {object}"),
        })
    }
}
