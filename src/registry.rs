//! Resolution of cached functions by their qualified name.
//!
//! A serialized [`FunctionCache`] is nothing but its [`Reduced`] form: the
//! owner and name it is registered under plus, optionally, its entries.
//! Deserializing resolves the name back to the live, registered cache and
//! merges the entries into it.

use std::any::Any;
use std::ops::Deref;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::Store;
use crate::error::{Error, Result};
use crate::function::FunctionCache;
use crate::key::Key;

type Entry = &'static (dyn Any + Send + Sync);

static REGISTRY: RwLock<Lazy<FxHashMap<String, Entry>>> =
    RwLock::new(Lazy::new(FxHashMap::default));

/// The serialized form of a cached function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reduced {
    pub owner: String,
    pub name: String,
    /// The encoded entries, if the cache was built with `do_pickle`.
    pub cache: Option<Vec<u8>>,
}

impl Reduced {
    /// The qualified name the function is resolved by.
    pub fn path(&self) -> String {
        if self.owner.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.owner, self.name)
        }
    }
}

pub(crate) fn register<V>(path: String, cache: &'static FunctionCache<V>)
where
    V: Clone + Send + Sync + 'static,
{
    tracing::debug!(%path, "registering cached function");
    let previous = REGISTRY.write().insert(path, cache);
    let current: *const FunctionCache<V> = cache;
    if previous.is_some_and(|previous| !std::ptr::addr_eq(previous as *const _, current)) {
        tracing::warn!("replaced a previously registered cached function");
    }
}

/// Resolve a reduced function to its registered cache.
///
/// Entries carried by `reduced` are merged into the live cache, overwriting
/// entries with equal keys.
pub fn reconstruct<V>(reduced: &Reduced) -> Result<&'static FunctionCache<V>>
where
    V: Clone + Send + Sync + DeserializeOwned + 'static,
{
    let path = reduced.path();
    let entry = REGISTRY.read().get(&path).copied();
    let cache = entry
        .and_then(|entry| entry.downcast_ref::<FunctionCache<V>>())
        .ok_or_else(|| Error::UnknownCallable { path: path.clone() })?;

    if let Some(bytes) = &reduced.cache {
        let entries: Vec<(Key, V)> = bincode::deserialize(bytes)?;
        tracing::debug!(%path, count = entries.len(), "restoring cached entries");
        for (key, value) in entries {
            cache.cache().set(key, value)?;
        }
    }

    Ok(cache)
}

/// The qualified names of all registered functions, sorted.
pub fn registered() -> Vec<String> {
    let mut paths: Vec<_> = REGISTRY.read().deref().keys().cloned().collect();
    paths.sort();
    paths
}
