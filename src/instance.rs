//! Per-instance storage of bound callers.

use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::bridge::{Placeholder, Snapshot};
use crate::cache::CacheMap;
use crate::error::Result;
use crate::value::Value;

/// An object whose methods can be cached.
///
/// An instance exposes up to two places where bound callers live. The
/// attribute storage is preferred. Types that cannot carry injected
/// attributes may hand out a side table instead. A type exposing neither
/// still works, but every access then binds a fresh caller with a fresh
/// cache.
pub trait Instance: Send + Sync + 'static {
    /// The instance's attribute storage.
    fn attributes(&self) -> Option<&Storage> {
        None
    }

    /// Storage owned by the instance for types without attribute storage.
    fn side_table(&self) -> Option<&Storage> {
        None
    }
}

/// An instance whose cached methods share their results through a parent.
pub trait Child: Instance {
    /// The object holding the shared cache.
    fn parent(&self) -> &dyn Instance;

    /// The identity of this instance within the parent's cache.
    ///
    /// Distinct instances with equal keys share their cached results.
    fn key(&self) -> Value;
}

/// A bound caller, as held by [`Storage`].
pub trait Caller: Any + Send + Sync {
    /// The name of the cached method.
    fn name(&self) -> &str;

    /// Capture the cache contents, if the caller keeps them on
    /// serialization.
    fn snapshot(&self) -> Result<Option<Snapshot>>;

    /// Fill the cache from a snapshot.
    fn seed(&self, snapshot: Snapshot) -> Result<()>;
}

enum Slot {
    Bound {
        caller: Arc<dyn Caller>,
        any: Arc<dyn Any + Send + Sync>,
    },
    Cache(Arc<dyn Any + Send + Sync>),
    Unresolved(Placeholder),
}

/// Named slots for bound callers and their caches.
///
/// Serializing a storage writes every bound caller as its name and an
/// optional snapshot of its cache. Deserializing yields placeholders that are
/// resolved on first access.
#[derive(Default)]
pub struct Storage {
    slots: RwLock<FxHashMap<String, Slot>>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether anything is stored under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.read().contains_key(name)
    }

    /// Whether `name` holds a placeholder left by deserialization.
    pub fn is_unresolved(&self, name: &str) -> bool {
        matches!(self.slots.read().get(name), Some(Slot::Unresolved(_)))
    }

    /// Remove a slot. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.slots.write().remove(name).is_some()
    }

    /// The names of all slots, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.slots.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn caller<C: Caller>(&self, name: &str) -> Option<Arc<C>> {
        match self.slots.read().get(name) {
            Some(Slot::Bound { any, .. }) => any.clone().downcast().ok(),
            _ => None,
        }
    }

    pub(crate) fn take_placeholder(&self, name: &str) -> Option<Placeholder> {
        let mut slots = self.slots.write();
        if !matches!(slots.get(name), Some(Slot::Unresolved(_))) {
            return None;
        }
        match slots.remove(name) {
            Some(Slot::Unresolved(placeholder)) => Some(placeholder),
            _ => None,
        }
    }

    /// Install `caller` unless a caller of the same type got there first.
    /// Returns the installed caller.
    pub(crate) fn install<C: Caller>(&self, name: &str, caller: Arc<C>) -> Arc<C> {
        let mut slots = self.slots.write();
        if let Some(Slot::Bound { any, .. }) = slots.get(name) {
            if let Ok(existing) = any.clone().downcast::<C>() {
                return existing;
            }
        }
        slots.insert(
            name.into(),
            Slot::Bound { caller: caller.clone(), any: caller.clone() },
        );
        caller
    }

    /// The cache map stored under `name`, created on first use.
    pub(crate) fn cache_map<V>(&self, name: &str) -> Arc<CacheMap<V>>
    where
        V: Send + Sync + 'static,
    {
        if let Some(Slot::Cache(any)) = self.slots.read().get(name) {
            if let Ok(map) = any.clone().downcast::<CacheMap<V>>() {
                return map;
            }
        }

        let mut slots = self.slots.write();
        match slots.get(name) {
            Some(Slot::Cache(any)) => {
                if let Ok(map) = any.clone().downcast::<CacheMap<V>>() {
                    return map;
                }
                tracing::warn!(slot = name, "replacing cache map of a different type");
            }
            Some(_) => tracing::warn!(slot = name, "replacing non-cache slot with a cache map"),
            None => {}
        }

        let map = Arc::new(CacheMap::<V>::new());
        slots.insert(name.into(), Slot::Cache(map.clone()));
        map
    }
}

impl Debug for Storage {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let slots = self.slots.read();
        let mut names: Vec<_> = slots.iter().collect();
        names.sort_by(|(a, _), (b, _)| a.cmp(b));
        let mut map = f.debug_map();
        for (name, slot) in names {
            let state = match slot {
                Slot::Bound { .. } => "bound",
                Slot::Cache(_) => "cache",
                Slot::Unresolved(_) => "unresolved",
            };
            map.entry(name, &state);
        }
        map.finish()
    }
}

#[derive(Serialize, Deserialize)]
struct SlotState {
    name: String,
    snapshot: Option<Snapshot>,
}

impl Serialize for Storage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut states = Vec::new();
        for (name, slot) in self.slots.read().iter() {
            let snapshot = match slot {
                Slot::Bound { caller, .. } => caller.snapshot().map_err(S::Error::custom)?,
                Slot::Unresolved(placeholder) => placeholder.snapshot().cloned(),
                Slot::Cache(_) => continue,
            };
            states.push(SlotState { name: name.clone(), snapshot });
        }
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Storage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let states = Vec::<SlotState>::deserialize(deserializer)?;
        let mut slots = FxHashMap::default();
        for SlotState { name, snapshot } in states {
            let placeholder = Placeholder::new(name.clone(), snapshot);
            if slots.insert(name, Slot::Unresolved(placeholder)).is_some() {
                return Err(D::Error::custom("duplicate cached method in storage"));
            }
        }
        Ok(Self { slots: RwLock::new(slots) })
    }
}

/// How a binder looks for an existing caller.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Lookup {
    /// Attribute access: the attributes first, then the side table.
    Attribute,
    /// Unbound invocation: the side table first, then the attributes.
    Descriptor,
    /// Only the storage a caller would be installed into.
    Direct,
}

/// Find or create the caller for `name` on `instance`.
///
/// A placeholder left by deserialization is taken out first. The fresh
/// caller that replaces it is seeded with the placeholder's snapshot.
pub(crate) fn bind<T, C, F>(instance: &T, name: &str, lookup: Lookup, make: F) -> Result<Arc<C>>
where
    T: Instance + ?Sized,
    C: Caller,
    F: FnOnce() -> Result<Arc<C>>,
{
    let attributes = instance.attributes();
    let side_table = instance.side_table();
    let target = attributes.or(side_table);

    let placeholder = attributes
        .and_then(|storage| storage.take_placeholder(name))
        .or_else(|| side_table.and_then(|storage| storage.take_placeholder(name)));

    if placeholder.is_none() {
        let order = match lookup {
            Lookup::Attribute => [attributes, side_table],
            Lookup::Descriptor => [side_table, attributes],
            Lookup::Direct => [target, None],
        };
        if let Some(caller) = order.into_iter().flatten().find_map(|s| s.caller::<C>(name)) {
            return Ok(caller);
        }
    }

    let caller = make()?;
    let caller = match target {
        Some(storage) => {
            tracing::debug!(
                method = name,
                storage = if attributes.is_some() { "attributes" } else { "side table" },
                "binding cached method"
            );
            storage.install(name, caller)
        }
        None => {
            tracing::debug!(method = name, "instance has no storage, caller is not retained");
            caller
        }
    };

    if let Some(placeholder) = placeholder {
        tracing::debug!(method = name, "resolving placeholder");
        if let Some(snapshot) = placeholder.into_snapshot() {
            caller.seed(snapshot)?;
        }
    }

    Ok(caller)
}
