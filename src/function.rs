use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::args::{Args, Signature};
use crate::bridge::Codec;
use crate::builder::cached;
use crate::cache::{self, CacheMap, Store};
use crate::error::Result;
use crate::key::{Key, KeyNormalizer};
use crate::registry::{self, Reduced};

/// A wrapped free function.
pub type Func<V> = Arc<dyn Fn(&Args) -> Result<V> + Send + Sync>;

/// A memoized free function.
///
/// Calls are normalized into a [`Key`] and looked up in the store `S`. On a
/// miss the function runs with the canonical arguments and its result is
/// stored. Errors returned by the function propagate unchanged and leave the
/// store untouched.
///
/// ```
/// use cachefunc::{args, cached, Signature};
///
/// let square = cached("square")
///     .signature(Signature::new().param("x"))
///     .function(|args| Ok(args.extract::<i64>(0)?.pow(2)));
///
/// assert_eq!(square.call(&args![7]).unwrap(), 49);
/// assert!(square.is_in_cache(&args![; x = 7]).unwrap());
/// ```
pub struct FunctionCache<V, S = CacheMap<V>> {
    name: String,
    owner: String,
    func: Func<V>,
    normalizer: KeyNormalizer,
    store: S,
    codec: Option<Codec<V>>,
}

impl<V> FunctionCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Memoize `func` without declaring a signature.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Args) -> Result<V> + Send + Sync + 'static,
    {
        cached(name).function(func)
    }

    /// Serialize the cache into its reconstruction artifact.
    ///
    /// The entries are only included if the cache was built with
    /// `do_pickle`.
    pub fn reduce(&self) -> Result<Reduced> {
        let cache = match &self.codec {
            Some(codec) => Some(codec.encode_entries(&self.store.entries())?),
            None => None,
        };
        Ok(Reduced {
            owner: self.owner.clone(),
            name: self.name.clone(),
            cache,
        })
    }

    /// Make this cache resolvable through [`registry::reconstruct`].
    pub fn register(&'static self) {
        registry::register(self.path(), self);
    }
}

impl<V, S> FunctionCache<V, S>
where
    V: Clone + Send + Sync + 'static,
    S: Store<V>,
{
    pub(crate) fn from_parts(
        name: String,
        owner: String,
        signature: Signature,
        key: Option<crate::key::KeyFn>,
        store: S,
        codec: Option<Codec<V>>,
        func: Func<V>,
    ) -> Self {
        Self {
            normalizer: KeyNormalizer::new(name.clone(), signature, key),
            name,
            owner,
            func,
            store,
            codec,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module or type the function belongs to, if declared.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The qualified name under which the cache is registered.
    pub fn path(&self) -> String {
        if self.owner.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.owner, self.name)
        }
    }

    pub fn signature(&self) -> &Signature {
        self.normalizer.signature()
    }

    /// The underlying store.
    pub fn cache(&self) -> &S {
        &self.store
    }

    /// Whether the cache contents survive serialization.
    pub fn do_pickle(&self) -> bool {
        self.codec.is_some()
    }

    /// Call the function or return the cached result.
    pub fn call(&self, args: &Args) -> Result<V> {
        let (key, fixed) = self.normalizer.normalize(args)?;
        cache::memoized(&self.name, &self.store, key, || (self.func)(&fixed))
    }

    /// Return the cached result without computing it.
    pub fn cached(&self, args: &Args) -> Result<V> {
        cache::lookup(&self.store, &self.normalizer.key(args)?)
    }

    pub fn is_in_cache(&self, args: &Args) -> Result<bool> {
        self.store.contains(&self.normalizer.key(args)?)
    }

    /// Store `value` as the result for `args`.
    pub fn set_cache(&self, value: V, args: &Args) -> Result<()> {
        self.store.set(self.normalizer.key(args)?, value)
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.store.clear()
    }

    /// The key `args` normalize to.
    pub fn get_key(&self, args: &Args) -> Result<Key> {
        self.normalizer.key(args)
    }

    /// Compute the results for all calls in `arg_list` that are not cached
    /// yet, on `parallelism` threads.
    pub fn precompute(
        &self,
        arg_list: impl IntoIterator<Item = Args>,
        parallelism: usize,
    ) -> Result<()> {
        cache::precompute(
            &self.name,
            &self.store,
            arg_list,
            parallelism,
            |args| self.normalizer.normalize(args),
            |fixed| (self.func)(fixed),
        )
    }
}

impl<V, S: Debug> Debug for FunctionCache<V, S> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("FunctionCache")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("store", &self.store)
            .field("do_pickle", &self.codec.is_some())
            .finish()
    }
}
