//! Script-facing proxy operations.

use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use gc_arena::{DynamicRoot, Gc, Mutation, Rootable};
use tracing::{debug, error, trace};

use super::gate::ToggleEvent;
use super::marshal::FieldInfo;
use super::{BridgeRoot, BridgeState};
use crate::error::BridgeError;
use crate::metrics::BridgeMetrics;
use crate::native::ObjectSystem;
use crate::types::{NativeHandle, TypeDescriptor, TypeRegistry, TypeTag};
use crate::value::{Proxy, ProxyRecord, Table, Value};

/// A proxy kept alive outside of [`Bridge::enter`](super::Bridge::enter).
pub type StashedProxy = DynamicRoot<Rootable![Gc<'_, ProxyRecord<'_>>]>;

/// How a script value should be converted back into a native pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conversion {
    /// Required type, if any.
    pub expected: Option<TypeTag>,
    /// Accept nil as a null pointer.
    pub optional: bool,
    /// Report a mismatch as `None` instead of an error.
    pub no_throw: bool,
}

impl Conversion {
    pub fn to(expected: TypeTag) -> Self {
        Self {
            expected: Some(expected),
            ..Self::default()
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn no_throw(mut self) -> Self {
        self.no_throw = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Tag,
    Descriptor,
    Class,
    Env,
}

impl FromStr for QueryMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tag" => Ok(QueryMode::Tag),
            "descriptor" => Ok(QueryMode::Descriptor),
            "class" => Ok(QueryMode::Class),
            "env" => Ok(QueryMode::Env),
            other => Err(BridgeError::InvalidQueryMode(other.to_string())),
        }
    }
}

pub enum QueryResult<'gc> {
    Tag(TypeTag),
    Descriptor(Arc<TypeDescriptor>),
    Class {
        record: Option<String>,
        pointer: Option<NativeHandle>,
    },
    Env(Table<'gc>),
}

impl Debug for QueryResult<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryResult::Tag(tag) => write!(f, "Tag({tag})"),
            QueryResult::Descriptor(d) => write!(f, "Descriptor({})", d.name),
            QueryResult::Class { record, pointer } => f
                .debug_struct("Class")
                .field("record", record)
                .field("pointer", pointer)
                .finish(),
            QueryResult::Env(env) => write!(f, "Env({env:?})"),
        }
    }
}

/// Handle to the runtime context, valid for one [`Bridge::enter`](super::Bridge::enter).
#[derive(Clone, Copy)]
pub struct Context<'gc, 'b> {
    mc: &'gc Mutation<'gc>,
    root: &'gc BridgeRoot<'gc>,
    state: &'b BridgeState,
}

impl<'gc, 'b> Context<'gc, 'b> {
    pub(crate) fn new(
        mc: &'gc Mutation<'gc>,
        root: &'gc BridgeRoot<'gc>,
        state: &'b BridgeState,
    ) -> Self {
        Self { mc, root, state }
    }

    pub fn mutation(self) -> &'gc Mutation<'gc> {
        self.mc
    }

    pub fn objects(self) -> &'b dyn ObjectSystem {
        &*self.state.objects
    }

    pub fn types(self) -> &'b TypeRegistry {
        &self.state.types
    }

    /// Wraps a possibly-null native pointer. A null pointer becomes nil.
    ///
    /// With `assume_owned` the caller hands over one reference it already holds.
    pub fn native_to_handle(self, object: Option<NativeHandle>, assume_owned: bool) -> Value<'gc> {
        match object {
            Some(object) => Value::Proxy(self.proxy_for(object, assume_owned)),
            None => Value::Nil,
        }
    }

    /// Returns the unique proxy for `object`, creating it on first sight.
    pub fn proxy_for(self, object: NativeHandle, assume_owned: bool) -> Proxy<'gc> {
        let state = self.state;

        if let Some(proxy) = self.lookup(object) {
            BridgeMetrics::bump(&state.metrics.cache_hits);
            // a proxy keeps exactly one reference and it already has it
            if assume_owned {
                state.release_or_leak(object, None);
            }
            return proxy;
        }

        let objects = self.objects();
        let tag = objects.type_of(object);
        let toggle = objects.is_object(tag).then(|| state.queue.register());

        let proxy = Proxy::new(self.mc, object);
        {
            let mut cache = self.root.cache.borrow_mut(self.mc);
            if let Err(err) = cache.insert_weak(object, proxy, toggle.clone()) {
                assert!(!state.config.strict_cache, "{err}");
                error!(%object, "{err}, overwriting");
                cache.overwrite_weak(object, proxy, toggle.clone());
            }
        }

        let owned = assume_owned || state.take_ownership(object);

        if let Some(toggle) = toggle {
            objects.add_toggle_ref(object, toggle.notify);
            self.on_toggle(ToggleEvent {
                object,
                generation: toggle.generation,
                is_last_ref: false,
            });
            if owned {
                objects.unref_object(object);
            }
        }

        BridgeMetrics::bump(&state.metrics.proxies_created);
        state
            .created_since_collect
            .set(state.created_since_collect.get() + 1);
        debug!(%object, type_name = %objects.type_name(tag), owned, "created proxy");
        proxy
    }

    /// Extracts the native pointer behind `value`, checking it against `conversion`.
    /// `position` is the argument number used in error messages.
    pub fn handle_to_native(
        self,
        value: Value<'gc>,
        position: usize,
        conversion: Conversion,
    ) -> Result<Option<NativeHandle>, BridgeError> {
        if conversion.optional && value.is_nil() {
            return Ok(None);
        }

        if let Some(proxy) = Self::live_proxy(value) {
            let object = proxy.native();
            let matches = match conversion.expected {
                Some(expected) => {
                    let objects = self.objects();
                    objects.type_is_a(objects.type_of(object), expected)
                }
                None => true,
            };
            if matches {
                return Ok(Some(object));
            }
        }

        if conversion.no_throw {
            return Ok(None);
        }
        Err(self.type_mismatch(value, position, conversion.expected))
    }

    /// Gives back the native reference held by a proxy. Later calls do nothing.
    pub fn finalize(self, value: Value<'gc>) -> bool {
        let Some(proxy) = value.as_proxy() else {
            return false;
        };
        if proxy.is_released() {
            return false;
        }
        // apply notifications raised while this object was still ours
        self.pump();
        proxy.mark_released();
        let toggle = self.root.cache.borrow_mut(self.mc).forget(proxy.native());
        self.state.release_or_leak(proxy.native(), toggle.as_ref());
        true
    }

    /// Human-readable description: `proxy 0x…:Name(RawTypeName)`, or `pointer 0x…` for an
    /// unwrapped native pointer.
    pub fn describe(self, value: Value<'gc>) -> String {
        let proxy = match value {
            Value::Proxy(proxy) => proxy,
            Value::Pointer(object) => return format!("pointer {object}"),
            _ => return value.type_name().to_string(),
        };
        let object = proxy.native();
        if proxy.is_released() {
            return format!("proxy {object}:<released>");
        }

        let objects = self.objects();
        let tag = objects.type_of(object);
        let name = match self.types().classify(objects, tag) {
            Some(resolved) => resolved.descriptor.name.clone(),
            None => "<???>".to_string(),
        };
        format!("proxy {object}:{name}({})", objects.type_name(tag))
    }

    /// Reads `member` (when `new_value` is `None`) or writes it through the marshaller.
    pub fn access(
        self,
        value: Value<'gc>,
        member: &str,
        new_value: Option<Value<'gc>>,
    ) -> Result<Value<'gc>, BridgeError> {
        let proxy = self.check_proxy(value, 1)?;
        let objects = self.objects();
        let tag = objects.type_of(proxy.native());
        let Some(resolved) = self.types().classify(objects, tag) else {
            return Err(self.type_mismatch(value, 1, Some(tag)));
        };
        self.state
            .marshaller
            .access(self, &resolved.descriptor, proxy, member, new_value)
    }

    /// Raw field access on the native instance.
    pub fn field(
        self,
        value: Value<'gc>,
        field: &FieldInfo,
        new_value: Option<Value<'gc>>,
    ) -> Result<Value<'gc>, BridgeError> {
        let proxy = self.check_proxy(value, 1)?;
        self.state
            .marshaller
            .field(self, proxy.native(), field, new_value)
    }

    /// Inspects a proxy. `tag` overrides the instance's own type for the `tag`,
    /// `descriptor` and `class` modes. Returns `None` for anything but a live proxy or
    /// when the type has no descriptor.
    pub fn query(
        self,
        value: Value<'gc>,
        mode: QueryMode,
        tag: Option<TypeTag>,
    ) -> Option<QueryResult<'gc>> {
        let proxy = Self::live_proxy(value)?;
        let objects = self.objects();
        let object = proxy.native();
        let tag = tag.unwrap_or_else(|| objects.type_of(object));

        match mode {
            QueryMode::Tag => Some(QueryResult::Tag(tag)),
            QueryMode::Env => Some(QueryResult::Env(proxy.env())),
            QueryMode::Descriptor | QueryMode::Class => {
                let resolved = self.types().classify(objects, tag)?;
                Some(match mode {
                    QueryMode::Class => QueryResult::Class {
                        record: resolved.descriptor.class_record.clone(),
                        pointer: objects.class_struct(object, tag),
                    },
                    _ => QueryResult::Descriptor(resolved.descriptor),
                })
            }
        }
    }

    /// [`query`](Self::query) with a script-supplied mode string and tag value.
    pub fn query_with(
        self,
        value: Value<'gc>,
        mode: &str,
        tag: Value<'gc>,
    ) -> Result<Option<QueryResult<'gc>>, BridgeError> {
        let mode = mode.parse()?;
        Ok(self.query(value, mode, self.types().tag_of(&tag)))
    }

    /// Applies a toggle notification: the last external reference going away lets the
    /// proxy be collected, a new one retains it. Events from a toggle registration other
    /// than the cached proxy's are dropped.
    pub fn on_toggle(self, event: ToggleEvent) {
        let ToggleEvent {
            object,
            generation,
            is_last_ref,
        } = event;
        let mut cache = self.root.cache.borrow_mut(self.mc);
        if cache.generation(object) != Some(generation) {
            trace!(%object, generation, "ignoring toggle from a released proxy");
            return;
        }
        if is_last_ref {
            if cache.demote(object, generation) {
                BridgeMetrics::bump(&self.state.metrics.demotions);
            }
        } else if cache.promote(self.mc, object, generation) {
            BridgeMetrics::bump(&self.state.metrics.promotions);
        }
    }

    /// Applies every queued toggle notification.
    pub fn pump(self) {
        while let Some(event) = self.state.queue.pop() {
            self.on_toggle(event);
        }
    }

    pub fn lookup(self, object: NativeHandle) -> Option<Proxy<'gc>> {
        self.root.cache.borrow().lookup(self.mc, object)
    }

    pub fn is_cached(self, object: NativeHandle) -> bool {
        self.root.cache.borrow().contains(object)
    }

    pub fn is_strongly_cached(self, object: NativeHandle) -> bool {
        self.root.cache.borrow().is_strong(object)
    }

    /// `(weak, strong)` entry counts of the identity cache.
    pub fn cache_len(self) -> (usize, usize) {
        let cache = self.root.cache.borrow();
        (cache.weak_len(), cache.strong_len())
    }

    pub fn stash(self, proxy: Proxy<'gc>) -> StashedProxy {
        self.root.roots.stash(self.mc, proxy.as_gc())
    }

    pub fn fetch(self, stashed: &StashedProxy) -> Proxy<'gc> {
        Proxy::from_gc(*self.root.roots.fetch(stashed))
    }

    fn live_proxy(value: Value<'gc>) -> Option<Proxy<'gc>> {
        value.as_proxy().filter(|p| !p.is_released())
    }

    fn check_proxy(self, value: Value<'gc>, position: usize) -> Result<Proxy<'gc>, BridgeError> {
        Self::live_proxy(value).ok_or_else(|| self.type_mismatch(value, position, None))
    }

    fn type_mismatch(self, value: Value<'gc>, position: usize, expected: Option<TypeTag>) -> BridgeError {
        BridgeError::TypeMismatch {
            position,
            expected: self.types().expected_name(self.objects(), expected),
            actual: value.type_name().to_string(),
        }
    }
}
