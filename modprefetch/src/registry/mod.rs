//! Static table of loadable units.
//!
//! The registry maps a [`LoadableKey`] to the [`Loader`] that produces the
//! unit and the [`PreloadPolicy`] that governs speculative loads of it. It is
//! built once at startup and never changes; the engine does not discover keys
//! on its own.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use modprefetch::error::LoadError;
//! use modprefetch::registry::{LoadableRegistry, PreloadPolicy};
//!
//! let registry = LoadableRegistry::builder()
//!     .register("billing", || async { Ok::<_, LoadError>(Bytes::from_static(b"billing")) }, PreloadPolicy::high())
//!     .register("triage", || async { Ok::<_, LoadError>(Bytes::from_static(b"triage")) }, PreloadPolicy::low())
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(registry.len(), 2);
//! assert!(registry.contains(&"billing".into()));
//! ```

mod policy;

pub use policy::{Predicate, PreloadPolicy, Priority};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{LoadError, RegistryError};

/// Opaque identifier of one loadable unit.
///
/// Cheap to clone; stable for the lifetime of the process.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadableKey(Arc<str>);

impl LoadableKey {
    /// Create a key from any string.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LoadableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for LoadableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LoadableKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for LoadableKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl serde::Serialize for LoadableKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Boxed future type returned by loaders.
pub type LoadFuture = Pin<Box<dyn Future<Output = Result<Bytes, LoadError>> + Send + 'static>>;

/// Zero-argument operation that asynchronously produces a unit's bytes.
///
/// Any `Fn() -> impl Future<Output = Result<Bytes, LoadError>>` closure is a
/// loader, so hosts rarely implement this trait by hand.
pub trait Loader: Send + Sync {
    /// Start one load attempt.
    fn load(&self) -> LoadFuture;
}

impl<F, Fut> Loader for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Bytes, LoadError>> + Send + 'static,
{
    fn load(&self) -> LoadFuture {
        Box::pin(self())
    }
}

/// A loaded unit as held in the cache.
#[derive(Debug)]
pub struct Module {
    /// Key the unit was loaded for.
    pub key: LoadableKey,
    /// Bytes produced by the loader.
    pub payload: Bytes,
    /// Number of attempts it took (1 = first try).
    pub attempts: u32,
    /// Wall time from first attempt to success, including backoff.
    pub load_duration: Duration,
}

/// Shared handle to a loaded unit. Every caller for a key receives the same `Arc`.
pub type ModuleRef = Arc<Module>;

struct Registration {
    loader: Arc<dyn Loader>,
    policy: PreloadPolicy,
}

/// Immutable key → (loader, policy) table.
pub struct LoadableRegistry {
    entries: HashMap<LoadableKey, Registration>,
    order: Vec<LoadableKey>,
}

impl fmt::Debug for LoadableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadableRegistry")
            .field("keys", &self.order)
            .finish_non_exhaustive()
    }
}

impl LoadableRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Loader for `key`, if registered.
    pub fn loader(&self, key: &LoadableKey) -> Option<Arc<dyn Loader>> {
        self.entries.get(key).map(|r| Arc::clone(&r.loader))
    }

    /// Policy for `key`, if registered.
    pub fn policy(&self, key: &LoadableKey) -> Option<&PreloadPolicy> {
        self.entries.get(key).map(|r| &r.policy)
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &LoadableKey) -> bool {
        self.entries.contains_key(key)
    }

    /// All keys, in registration order.
    pub fn keys(&self) -> &[LoadableKey] {
        &self.order
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Builder for [`LoadableRegistry`].
///
/// Records the first error and reports it from [`build`](Self::build), so
/// registrations can be chained.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<LoadableKey, Registration>,
    order: Vec<LoadableKey>,
    error: Option<RegistryError>,
}

impl RegistryBuilder {
    /// Register a loader closure or [`Loader`] implementation.
    pub fn register<L>(self, key: impl Into<LoadableKey>, loader: L, policy: PreloadPolicy) -> Self
    where
        L: Loader + 'static,
    {
        self.register_arc(key, Arc::new(loader), policy)
    }

    /// Register an already shared loader.
    pub fn register_arc(
        mut self,
        key: impl Into<LoadableKey>,
        loader: Arc<dyn Loader>,
        policy: PreloadPolicy,
    ) -> Self {
        let key = key.into();
        if self.entries.contains_key(&key) {
            self.error.get_or_insert(RegistryError::DuplicateKey(key));
            return self;
        }
        self.order.push(key.clone());
        self.entries.insert(key, Registration { loader, policy });
        self
    }

    /// Finish building.
    pub fn build(self) -> Result<LoadableRegistry, RegistryError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(LoadableRegistry {
            entries: self.entries,
            order: self.order,
        })
    }
}
