use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::cache::Store;
use crate::error::Result;
use crate::function::FunctionCache;
use crate::key::Key;
use crate::passthroughhasher::KeyMap;

/// How many results a weak cache keeps alive by default.
pub const DEFAULT_WEAK_CAPACITY: usize = 128;

/// Dead entries are not purged before the map reaches this size.
const MIN_PURGE: usize = 16;

/// A memoized function that holds its results weakly.
///
/// Results are returned as `Arc`s and only stay cached while someone holds
/// on to them. The most recently computed results are additionally kept
/// alive by the store itself.
pub type WeakFunctionCache<V> = FunctionCache<Arc<V>, WeakStore<V>>;

/// A store of weak references with a bounded ring of strong references.
pub struct WeakStore<V> {
    map: RwLock<WeakMap<V>>,
    retained: Mutex<VecDeque<Arc<V>>>,
    capacity: usize,
}

struct WeakMap<V> {
    entries: KeyMap<Weak<V>>,
    /// The size at which dead entries are purged next.
    threshold: usize,
}

impl<V> WeakStore<V> {
    /// Create a store keeping the `capacity` most recent results alive.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: RwLock::new(WeakMap { entries: KeyMap::default(), threshold: MIN_PURGE }),
            retained: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of entries whose value is still alive.
    pub fn len(&self) -> usize {
        self.map.read().entries.values().filter(|weak| weak.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of results currently kept alive by the store.
    pub fn retained(&self) -> usize {
        self.retained.lock().len()
    }

    fn retain(&self, value: Arc<V>) {
        if self.capacity == 0 {
            return;
        }
        let mut retained = self.retained.lock();
        if retained.len() == self.capacity {
            retained.pop_front();
        }
        retained.push_back(value);
    }
}

impl<V> WeakMap<V> {
    fn insert(&mut self, key: Key, value: &Arc<V>) {
        self.entries.insert(key, Arc::downgrade(value));
        if self.entries.len() >= self.threshold {
            self.entries.retain(|_, weak| weak.strong_count() > 0);
            self.threshold = (2 * self.entries.len()).max(MIN_PURGE);
        }
    }
}

impl<V> Default for WeakStore<V> {
    fn default() -> Self {
        Self::new(DEFAULT_WEAK_CAPACITY)
    }
}

impl<V> Debug for WeakStore<V> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("WeakStore")
            .field("len", &self.len())
            .field("retained", &self.retained())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<V: Send + Sync> Store<Arc<V>> for WeakStore<V> {
    fn get(&self, key: &Key) -> Result<Option<Arc<V>>> {
        Ok(self.map.read().entries.get(key).and_then(Weak::upgrade))
    }

    fn contains(&self, key: &Key) -> Result<bool> {
        self.get(key).map(|value| value.is_some())
    }

    fn set(&self, key: Key, value: Arc<V>) -> Result<()> {
        self.map.write().insert(key, &value);
        Ok(())
    }

    fn settle(&self, key: Key, value: Arc<V>) -> Result<Arc<V>> {
        {
            let mut map = self.map.write();
            if let Some(existing) = map.entries.get(&key).and_then(Weak::upgrade) {
                return Ok(existing);
            }
            map.insert(key, &value);
        }
        self.retain(value.clone());
        Ok(value)
    }

    fn remove(&self, key: &Key) -> Result<()> {
        self.map.write().entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.map.write().entries.clear();
        self.retained.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyRepr;
    use crate::value::Atom;

    fn key(n: i64) -> Key {
        Key::new(KeyRepr::Custom(Atom::from(n)))
    }

    #[test]
    fn test_ring_drops_oldest() {
        let store = WeakStore::new(2);
        for i in 0..3 {
            store.settle(key(i), Arc::new(i)).unwrap();
        }
        assert_eq!(store.retained(), 2);
        assert!(store.get(&key(0)).unwrap().is_none());
        assert_eq!(*store.get(&key(2)).unwrap().unwrap(), 2);
    }

    #[test]
    fn test_set_is_weak_only() {
        let store = WeakStore::new(4);
        let value = Arc::new("kept");
        store.set(key(1), value.clone()).unwrap();
        assert!(store.contains(&key(1)).unwrap());
        assert_eq!(store.retained(), 0);
        drop(value);
        assert!(!store.contains(&key(1)).unwrap());
    }

    #[test]
    fn test_dead_entries_are_purged() {
        let store = WeakStore::new(0);
        for i in 0..100 {
            store.settle(key(i), Arc::new(i)).unwrap();
        }
        assert!(store.map.read().entries.len() < MIN_PURGE);
        assert!(store.is_empty());
    }
}
