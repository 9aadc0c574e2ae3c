use std::collections::HashSet;
use std::fmt::{self, Debug, Formatter};

use parking_lot::RwLock;
use rayon::prelude::*;

use crate::args::Args;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::passthroughhasher::{BuildPassthroughHasher, KeyMap};

/// Where memoized results live.
///
/// Every cache in this crate delegates to a store. A store only maps keys to
/// values; key normalization and the call protocol live in the caches.
pub trait Store<V>: Send + Sync {
    /// Look up a value. A missing entry is `Ok(None)`.
    fn get(&self, key: &Key) -> Result<Option<V>>;

    /// Whether an entry exists.
    fn contains(&self, key: &Key) -> Result<bool>;

    /// Insert or overwrite an entry.
    fn set(&self, key: Key, value: V) -> Result<()>;

    /// Store a freshly computed value and return the value that ends up being
    /// cached. Stores that can detect a concurrent insert keep the first value.
    fn settle(&self, key: Key, value: V) -> Result<V>;

    /// Remove an entry, if present.
    fn remove(&self, key: &Key) -> Result<()>;

    /// Remove all entries.
    fn clear(&self) -> Result<()>;
}

/// The in-memory store used by function and method caches.
pub struct CacheMap<V>(RwLock<KeyMap<V>>);

impl<V> CacheMap<V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self(RwLock::new(KeyMap::default()))
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.0.read().contains_key(key)
    }

    pub fn insert(&self, key: Key, value: V) -> Option<V> {
        self.0.write().insert(key, value)
    }

    pub fn remove(&self, key: &Key) -> Option<V> {
        self.0.write().remove(key)
    }

    pub fn clear(&self) {
        self.0.write().clear();
    }

    /// The keys currently cached.
    pub fn keys(&self) -> Vec<Key> {
        self.0.read().keys().cloned().collect()
    }
}

impl<V: Clone> CacheMap<V> {
    pub fn get(&self, key: &Key) -> Option<V> {
        self.0.read().get(key).cloned()
    }

    /// A copy of all entries.
    pub fn entries(&self) -> Vec<(Key, V)> {
        self.0.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Insert entries, overwriting existing ones.
    pub fn extend(&self, entries: impl IntoIterator<Item = (Key, V)>) {
        self.0.write().extend(entries);
    }
}

impl<V> Default for CacheMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Debug for CacheMap<V> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("CacheMap").field("len", &self.len()).finish()
    }
}

impl<V: Clone + Send + Sync> Store<V> for CacheMap<V> {
    fn get(&self, key: &Key) -> Result<Option<V>> {
        Ok(CacheMap::get(self, key))
    }

    fn contains(&self, key: &Key) -> Result<bool> {
        Ok(self.contains_key(key))
    }

    fn set(&self, key: Key, value: V) -> Result<()> {
        self.insert(key, value);
        Ok(())
    }

    fn settle(&self, key: Key, value: V) -> Result<V> {
        // A concurrent call with the same arguments may have inserted a value
        // in the meantime. The first one wins so that all callers observe the
        // same result.
        Ok(self.0.write().entry(key).or_insert(value).clone())
    }

    fn remove(&self, key: &Key) -> Result<()> {
        CacheMap::remove(self, key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        CacheMap::clear(self);
        Ok(())
    }
}

/// Executes a computation or uses a cached result for it.
///
/// No lock is held while `compute` runs, so cached computations may call
/// other cached computations, including themselves.
pub(crate) fn memoized<V, S, F>(name: &str, store: &S, key: Key, compute: F) -> Result<V>
where
    S: Store<V> + ?Sized,
    F: FnOnce() -> Result<V>,
{
    if let Some(output) = store.get(&key)? {
        tracing::trace!(function = name, ?key, "cache hit");

        #[cfg(feature = "testing")]
        crate::testing::register_hit();

        return Ok(output);
    }

    tracing::trace!(function = name, ?key, "cache miss");

    // Errors propagate before anything is stored.
    let output = compute()?;
    let output = store.settle(key, output)?;

    #[cfg(feature = "testing")]
    crate::testing::register_miss();

    Ok(output)
}

/// Look up a value without computing it.
pub(crate) fn lookup<V, S>(store: &S, key: &Key) -> Result<V>
where
    S: Store<V> + ?Sized,
{
    store.get(key)?.ok_or_else(|| Error::not_cached(key))
}

/// Computes and stores all not yet cached calls of `arg_list`.
///
/// With `parallelism > 1` the computations run on a dedicated thread pool.
/// Results are stored sequentially afterwards, and only if every computation
/// succeeded.
pub(crate) fn precompute<V, S, N, F>(
    name: &str,
    store: &S,
    arg_list: impl IntoIterator<Item = Args>,
    parallelism: usize,
    normalize: N,
    compute: F,
) -> Result<()>
where
    V: Send,
    S: Store<V> + ?Sized,
    N: Fn(&Args) -> Result<(Key, Args)>,
    F: Fn(&Args) -> Result<V> + Sync,
{
    let mut seen = HashSet::with_hasher(BuildPassthroughHasher);
    let mut todo = Vec::new();
    for args in arg_list {
        let (key, fixed) = normalize(&args)?;
        if store.contains(&key)? || !seen.insert(key.clone()) {
            continue;
        }
        todo.push((key, fixed));
    }

    if todo.is_empty() {
        return Ok(());
    }

    tracing::debug!(function = name, count = todo.len(), parallelism, "precomputing");

    let outputs: Vec<V> = if parallelism <= 1 {
        todo.iter().map(|(_, args)| compute(args)).collect::<Result<_>>()?
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism)
            .thread_name(|idx| format!("cachefunc-precompute-{idx}"))
            .build()?;
        pool.install(|| {
            todo.par_iter()
                .map(|(_, args)| compute(args))
                .collect::<Result<Vec<_>>>()
        })?
    };

    for ((key, _), output) in todo.into_iter().zip(outputs) {
        store.settle(key, output)?;
    }

    Ok(())
}
