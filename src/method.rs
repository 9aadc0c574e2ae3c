use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Weak};

use crate::args::{Args, Signature};
use crate::bridge::{self, Codec, Snapshot};
use crate::cache::{self, CacheMap};
use crate::error::{Error, Result};
use crate::instance::{self, Caller, Instance, Lookup, Storage};
use crate::key::{Key, KeyFn, KeyNormalizer};
use crate::value::Atom;

/// A wrapped method.
pub type MethodFn<T, V> = Arc<dyn Fn(&T, &Args) -> Result<V> + Send + Sync>;

/// Moves the cache of a method from the instance to a shared parent.
pub(crate) struct ParentHooks<T> {
    /// The identity of the instance within the parent cache.
    pub key: fn(&T) -> Result<Atom>,
    /// The storage of the parent.
    pub storage: fn(&T) -> Option<&Storage>,
}

impl<T> Clone for ParentHooks<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ParentHooks<T> {}

pub(crate) struct MethodInner<T, V> {
    name: String,
    func: MethodFn<T, V>,
    normalizer: KeyNormalizer,
    codec: Option<Codec<V>>,
    parent: Option<ParentHooks<T>>,
}

/// A method whose results are cached per instance.
///
/// The method itself holds no results. Accessing it through an instance binds
/// a [`CachedMethodCaller`], which is installed into the instance storage and
/// shares one cache map with every other caller of the same instance. The
/// receiver never takes part in the key.
pub struct CachedMethod<T, V> {
    inner: Arc<MethodInner<T, V>>,
}

impl<T, V> CachedMethod<T, V>
where
    T: Instance,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_parts(
        name: String,
        signature: Signature,
        key: Option<KeyFn>,
        codec: Option<Codec<V>>,
        func: MethodFn<T, V>,
        parent: Option<ParentHooks<T>>,
    ) -> Self {
        Self {
            inner: Arc::new(MethodInner {
                normalizer: KeyNormalizer::new(name.clone(), signature, key),
                name,
                func,
                codec,
                parent,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the cache contents survive serialization of the instance.
    pub fn do_pickle(&self) -> bool {
        self.inner.codec.is_some()
    }

    /// The caller bound to `instance`.
    pub fn get(&self, instance: &Arc<T>) -> Result<Arc<CachedMethodCaller<T, V>>> {
        self.bind(instance, Lookup::Attribute)
    }

    /// Invoke the method on `instance`, without accessing it as an attribute
    /// first. Shares cache entries with [`get`](Self::get).
    pub fn call(&self, instance: &Arc<T>, args: &Args) -> Result<V> {
        self.bind(instance, Lookup::Descriptor)?.call(args)
    }

    pub(crate) fn bind(
        &self,
        instance: &Arc<T>,
        lookup: Lookup,
    ) -> Result<Arc<CachedMethodCaller<T, V>>> {
        instance::bind(&**instance, &self.inner.name, lookup, || {
            Ok(Arc::new(self.make(instance)))
        })
    }

    fn make(&self, instance: &Arc<T>) -> CachedMethodCaller<T, V> {
        let name = &self.inner.name;
        let cache = match &self.inner.parent {
            Some(hooks) => (hooks.storage)(&**instance)
                .map(|storage| storage.cache_map(&format!("_cache__element_{name}"))),
            None => instance
                .attributes()
                .map(|storage| storage.cache_map(&format!("_cache__{name}"))),
        };
        CachedMethodCaller {
            method: self.inner.clone(),
            instance: Arc::downgrade(instance),
            cache: cache.unwrap_or_default(),
        }
    }
}

impl<T, V> Clone for CachedMethod<T, V> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T, V> Debug for CachedMethod<T, V> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("CachedMethod")
            .field("name", &self.inner.name)
            .field("signature", self.inner.normalizer.signature())
            .field("do_pickle", &self.inner.codec.is_some())
            .finish()
    }
}

/// A cached method bound to one instance.
///
/// Holds the instance weakly, so installing the caller into the instance
/// does not keep the instance alive.
pub struct CachedMethodCaller<T, V> {
    method: Arc<MethodInner<T, V>>,
    instance: Weak<T>,
    cache: Arc<CacheMap<V>>,
}

impl<T, V> CachedMethodCaller<T, V>
where
    T: Instance,
    V: Clone + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.method.name
    }

    /// The instance this caller is bound to.
    pub fn instance(&self) -> Result<Arc<T>> {
        self.instance
            .upgrade()
            .ok_or_else(|| Error::InstanceDropped { name: self.method.name.clone() })
    }

    /// The cache map of the instance (or of its parent).
    pub fn cache(&self) -> &CacheMap<V> {
        &self.cache
    }

    /// Call the method or return the cached result.
    pub fn call(&self, args: &Args) -> Result<V> {
        let instance = self.instance()?;
        let (key, fixed) = self.normalize(&*instance, args)?;
        cache::memoized(&self.method.name, &*self.cache, key, || {
            (self.method.func)(&*instance, &fixed)
        })
    }

    /// Return the cached result without computing it.
    pub fn cached(&self, args: &Args) -> Result<V> {
        cache::lookup(&*self.cache, &self.get_key(args)?)
    }

    pub fn is_in_cache(&self, args: &Args) -> Result<bool> {
        Ok(self.cache.contains_key(&self.get_key(args)?))
    }

    /// Store `value` as the result for `args`.
    pub fn set_cache(&self, value: V, args: &Args) -> Result<()> {
        self.cache.insert(self.get_key(args)?, value);
        Ok(())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// The key `args` normalize to.
    pub fn get_key(&self, args: &Args) -> Result<Key> {
        let key = self.method.normalizer.key(args)?;
        match &self.method.parent {
            Some(hooks) => Ok(key.scoped((hooks.key)(&*self.instance()?)?)),
            None => Ok(key),
        }
    }

    /// Compute the results for all calls in `arg_list` that are not cached
    /// yet, on `parallelism` threads.
    pub fn precompute(
        &self,
        arg_list: impl IntoIterator<Item = Args>,
        parallelism: usize,
    ) -> Result<()> {
        let instance = self.instance()?;
        cache::precompute(
            &self.method.name,
            &*self.cache,
            arg_list,
            parallelism,
            |args| self.normalize(&*instance, args),
            |fixed| (self.method.func)(&*instance, fixed),
        )
    }

    fn normalize(&self, instance: &T, args: &Args) -> Result<(Key, Args)> {
        let (key, fixed) = self.method.normalizer.normalize(args)?;
        match &self.method.parent {
            Some(hooks) => Ok((key.scoped((hooks.key)(instance)?), fixed)),
            None => Ok((key, fixed)),
        }
    }
}

impl<T, V> Caller for CachedMethodCaller<T, V>
where
    T: Instance,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.method.name
    }

    fn snapshot(&self) -> Result<Option<Snapshot>> {
        match &self.method.codec {
            Some(codec) => codec.snapshot_entries(&self.cache.entries()).map(Some),
            None => Ok(None),
        }
    }

    fn seed(&self, snapshot: Snapshot) -> Result<()> {
        let codec = self
            .method
            .codec
            .as_ref()
            .ok_or_else(|| bridge::missing_codec(&self.method.name))?;
        let entries = codec.entries(&snapshot)?;
        tracing::debug!(method = %self.method.name, count = entries.len(), "seeding cache");
        self.cache.extend(entries);
        Ok(())
    }
}

impl<T, V> Debug for CachedMethodCaller<T, V> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("CachedMethodCaller")
            .field("name", &self.method.name)
            .field("alive", &(self.instance.strong_count() > 0))
            .field("cache", &self.cache)
            .finish()
    }
}
