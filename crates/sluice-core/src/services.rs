//! Singleton services handed to migrations by the hosting application.
//!
//! Bindings are keyed by type. A migration that needs shared context (for
//! example the schema it should create tables in) resolves it from the
//! registry while it is being constructed.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SluiceError};

struct Binding {
    type_name: &'static str,
    instance: Arc<dyn Any + Send + Sync>,
}

/// Registry of single-assignment service bindings.
#[derive(Default)]
pub struct ServiceRegistry {
    bindings: HashMap<TypeId, Binding>,
}

impl ServiceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a service instance to its type.
    pub fn bind<T: Any + Send + Sync>(&mut self, instance: T) -> Result<()> {
        self.bind_arc(Arc::new(instance))
    }

    /// Bind an already shared service instance.
    pub fn bind_arc<T: Any + Send + Sync>(&mut self, instance: Arc<T>) -> Result<()> {
        let key = TypeId::of::<T>();
        if self.bindings.contains_key(&key) {
            return Err(SluiceError::DuplicateBinding(type_name::<T>()));
        }

        self.bindings.insert(
            key,
            Binding {
                type_name: type_name::<T>(),
                instance,
            },
        );
        Ok(())
    }

    /// Resolve the instance bound to `T`.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.bindings
            .get(&TypeId::of::<T>())
            .and_then(|binding| binding.instance.clone().downcast::<T>().ok())
            .ok_or(SluiceError::UnresolvedBinding(type_name::<T>()))
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.bindings.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Names of all bound types, sorted.
    pub fn bound_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.bindings.values().map(|b| b.type_name).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("bindings", &self.bound_types())
            .finish()
    }
}

/// The schema a run targets. Every runner binds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaName(Option<String>);

impl SchemaName {
    pub fn new(schema: Option<&str>) -> Self {
        Self(schema.map(str::to_string))
    }

    pub fn get(&self) -> Option<&str> {
        self.0.as_deref()
    }
}
