use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use libloading::Library;
use tracing::trace;

use super::TypeTag;
use crate::native::{ObjectSystem, RefFunction, UnrefFunction};
use crate::value::Value;

/// Lifetime entry points for types the object system itself cannot ref or unref.
///
/// Resolved once when the descriptor is registered. `keepalive` pins the shared library
/// the functions were loaded from.
#[derive(Clone, Default)]
pub struct CustomLifetime {
    pub refsink: Option<RefFunction>,
    pub unref: Option<UnrefFunction>,
    pub keepalive: Option<Arc<Library>>,
}

impl Debug for CustomLifetime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomLifetime")
            .field("refsink", &self.refsink.is_some())
            .field("unref", &self.unref.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifetimeHook {
    Refsink,
    Unref,
}

/// Script-visible description of a native type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub name: String,
    pub tag: TypeTag,
    pub class_record: Option<String>,
    pub lifetime: CustomLifetime,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            tag,
            class_record: None,
            lifetime: CustomLifetime::default(),
        }
    }

    pub fn with_class_record(mut self, record: impl Into<String>) -> Self {
        self.class_record = Some(record.into());
        self
    }

    pub fn with_lifetime(mut self, lifetime: CustomLifetime) -> Self {
        self.lifetime = lifetime;
        self
    }
}

/// A descriptor together with the tag in the ancestry chain where it was registered.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub tag: TypeTag,
    pub descriptor: Arc<TypeDescriptor>,
}

#[derive(Default)]
pub struct TypeRegistry {
    descriptors: HashMap<TypeTag, Arc<TypeDescriptor>>,
    by_name: HashMap<String, TypeTag>,
    resolved: RefCell<HashMap<TypeTag, Option<Resolved>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.by_name
            .insert(descriptor.name.clone(), descriptor.tag);
        self.descriptors.insert(descriptor.tag, descriptor.clone());
        self.resolved.get_mut().clear();
        descriptor
    }

    pub fn descriptor(&self, tag: TypeTag) -> Option<&Arc<TypeDescriptor>> {
        self.descriptors.get(&tag)
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<TypeDescriptor>> {
        self.by_name.get(name).and_then(|t| self.descriptors.get(t))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Nearest registered descriptor walking from `tag` up through its parents.
    pub fn classify(&self, objects: &dyn ObjectSystem, tag: TypeTag) -> Option<Resolved> {
        if let Some(cached) = self.resolved.borrow().get(&tag) {
            return cached.clone();
        }

        let found = std::iter::successors(Some(tag), |t| objects.type_parent(*t)).find_map(|t| {
            self.descriptors.get(&t).map(|d| Resolved {
                tag: t,
                descriptor: d.clone(),
            })
        });
        trace!(%tag, found = ?found.as_ref().map(|r| &r.descriptor.name), "classified type");

        self.resolved.borrow_mut().insert(tag, found.clone());
        found
    }

    /// Custom lifetime hook for `tag`, taken from its nearest descriptor.
    pub fn load_hook(
        &self,
        objects: &dyn ObjectSystem,
        tag: TypeTag,
        hook: LifetimeHook,
    ) -> Option<LoadedHook> {
        let resolved = self.classify(objects, tag)?;
        let lifetime = &resolved.descriptor.lifetime;
        match hook {
            LifetimeHook::Refsink => lifetime.refsink.map(LoadedHook::Refsink),
            LifetimeHook::Unref => lifetime.unref.map(LoadedHook::Unref),
        }
    }

    /// Name used when reporting type errors.
    pub fn expected_name(&self, objects: &dyn ObjectSystem, tag: Option<TypeTag>) -> String {
        let Some(tag) = tag else {
            return "object".to_string();
        };
        match self.classify(objects, tag) {
            Some(resolved) if resolved.tag == tag => resolved.descriptor.name.clone(),
            Some(resolved) => format!("{}({})", resolved.descriptor.name, objects.type_name(tag)),
            None => objects.type_name(tag),
        }
    }

    /// Interprets a script value as a type tag: integers are raw tags, strings name a
    /// registered descriptor.
    pub fn tag_of(&self, value: &Value<'_>) -> Option<TypeTag> {
        match value {
            Value::Integer(raw) => usize::try_from(*raw).ok().and_then(TypeTag::new),
            Value::String(name) => self.by_name(name).map(|d| d.tag),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LoadedHook {
    Refsink(RefFunction),
    Unref(UnrefFunction),
}
