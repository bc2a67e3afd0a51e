// src/registry.rs
//
// Explicit service registration with per-scope lifetime.
//
// DESIGN PRINCIPLES:
// 1. Explicit - every binding is registered by code at startup, no scanning
// 2. Scoped - one instance per scope, a new one in the next scope
// 3. Type-safe - bindings are keyed by TypeId and resolved through generics
//
// A scope maps to one logical unit of work (typically one request).
// Dropping the scope drops its instances, which releases any unit of work
// and its session.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;
use uuid::Uuid;

use crate::error::{DataError, DataResult};
use crate::store::{SqliteSession, SqliteStore};
use crate::uow::UnitOfWork;

/// The unit of work as handed out by a scope. The async mutex keeps the
/// single-writer rule when several handlers of one scope share it.
pub type SharedUnitOfWork = tokio::sync::Mutex<UnitOfWork<SqliteSession>>;

type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Box<dyn Fn(&Scope) -> DataResult<Instance> + Send + Sync>;

struct Binding {
    type_name: &'static str,
    factory: Factory,
}

#[derive(Default)]
pub struct Registry {
    bindings: HashMap<TypeId, Binding>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `T` to a constructor. The factory receives the resolving scope so
    /// it can pull its own dependencies from it.
    ///
    /// To bind an interface, register `Arc<dyn Trait>` with a factory that
    /// resolves the concrete type and coerces it; the concrete type stays
    /// resolvable on its own and both share one instance per scope.
    ///
    /// Registering the same type twice is an error.
    pub fn add_scoped<T, F>(&mut self, factory: F) -> DataResult<&mut Self>
    where
        T: Any + Send + Sync,
        F: Fn(&Scope) -> DataResult<T> + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        if self.is_registered::<T>() {
            return Err(DataError::Registration(format!(
                "{} is already registered",
                type_name::<T>()
            )));
        }

        let erased: Factory = Box::new(move |scope: &Scope| -> DataResult<Instance> {
            let instance: Instance = Arc::new(factory(scope)?);
            Ok(instance)
        });

        self.bindings.insert(
            type_id,
            Binding {
                type_name: type_name::<T>(),
                factory: erased,
            },
        );
        debug!("event=register module=registry type={}", type_name::<T>());

        Ok(self)
    }

    /// Bind the store and a per-scope unit of work opened from it.
    pub fn add_unit_of_work(&mut self, store: SqliteStore) -> DataResult<&mut Self> {
        self.add_scoped::<SqliteStore, _>(move |_| Ok(store.clone()))?;
        self.add_scoped::<SharedUnitOfWork, _>(|scope| {
            let store = scope.resolve::<SqliteStore>()?;
            Ok(tokio::sync::Mutex::new(store.unit_of_work()?))
        })
    }

    pub fn is_registered<T: Any>(&self) -> bool {
        self.bindings.contains_key(&TypeId::of::<T>())
    }

    pub fn create_scope(self: &Arc<Self>) -> Scope {
        let id = Uuid::new_v4();
        debug!("event=scope_open module=registry scope={}", id);

        Scope {
            id,
            registry: Arc::clone(self),
            instances: Mutex::new(HashMap::new()),
            resolving: Mutex::new(Vec::new()),
        }
    }
}

pub struct Scope {
    id: Uuid,
    registry: Arc<Registry>,
    instances: Mutex<HashMap<TypeId, Instance>>,
    resolving: Mutex<Vec<TypeId>>,
}

fn poisoned() -> DataError {
    DataError::Registration("scope lock poisoned".to_string())
}

impl Scope {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The scope's instance of `T`, constructed on first use.
    pub fn resolve<T: Any + Send + Sync>(&self) -> DataResult<Arc<T>> {
        let type_id = TypeId::of::<T>();

        let cached = self
            .instances
            .lock()
            .map_err(|_| poisoned())?
            .get(&type_id)
            .cloned();
        if let Some(instance) = cached {
            return downcast::<T>(instance);
        }

        let binding = self.registry.bindings.get(&type_id).ok_or_else(|| {
            DataError::Registration(format!("{} is not registered", type_name::<T>()))
        })?;

        {
            let mut resolving = self.resolving.lock().map_err(|_| poisoned())?;
            if resolving.contains(&type_id) {
                return Err(DataError::Registration(format!(
                    "circular dependency while resolving {}",
                    binding.type_name
                )));
            }
            resolving.push(type_id);
        }

        // Factory runs without holding the instance lock so it can resolve
        // its own dependencies
        let built = (binding.factory)(self);

        self.resolving
            .lock()
            .map_err(|_| poisoned())?
            .retain(|id| *id != type_id);

        let instance = self
            .instances
            .lock()
            .map_err(|_| poisoned())?
            .entry(type_id)
            .or_insert(built?)
            .clone();

        debug!(
            "event=resolve module=registry scope={} type={}",
            self.id, binding.type_name
        );
        downcast::<T>(instance)
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        debug!("event=scope_close module=registry scope={}", self.id);
    }
}

fn downcast<T: Any + Send + Sync>(instance: Instance) -> DataResult<Arc<T>> {
    instance.downcast::<T>().map_err(|_| {
        DataError::Registration(format!("binding does not produce {}", type_name::<T>()))
    })
}
