//! Request-scoped key/value store.
//!
//! Upstream middleware and the payment layer exchange values (a computed
//! price, the settled payment) through a [`RequestScope`] living in the
//! request's extensions. It is created on first use and dropped with the
//! request.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use http::Extensions;

type ScopedValue = Arc<dyn Any + Send + Sync>;

/// A shared, type-erased map keyed by string identifiers.
///
/// Clones share the same map, so a value inserted by one layer is visible
/// to every later layer handling the same request.
#[derive(Clone, Default)]
pub struct RequestScope {
    values: Arc<DashMap<String, ScopedValue>>,
}

impl RequestScope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the scope stored in `extensions`, inserting a new one if absent.
    pub fn ensure(extensions: &mut Extensions) -> Self {
        extensions.get_or_insert_with(Self::new).clone()
    }

    /// Returns the scope stored in `extensions`, if any.
    #[must_use]
    pub fn from_extensions(extensions: &Extensions) -> Option<Self> {
        extensions.get::<Self>().cloned()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.values.insert(key.into(), Arc::new(value));
    }

    /// Returns the value under `key` if present and of type `T`.
    #[must_use]
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = Arc::clone(self.values.get(key)?.value());
        value.downcast::<T>().ok()
    }

    /// Returns `true` if any value is stored under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Removes the value under `key`, returning whether one was present.
    pub fn remove(&self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.values.iter().map(|entry| entry.key().clone()).collect();
        f.debug_struct("RequestScope").field("keys", &keys).finish()
    }
}
