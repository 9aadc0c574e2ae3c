//! The decoration surface.
//!
//! Every cache in this crate is built through [`cached`]. The builder collects
//! the options shared by all kinds of caches and a terminator picks the kind.
//!
//! ```
//! use cachefunc::{args, cached, Signature};
//!
//! let add = cached("add")
//!     .signature(Signature::new().param("a").param_default("b", 1))
//!     .do_pickle(true)
//!     .function(|args| Ok(args.extract::<i64>(0)? + args.extract::<i64>(1)?));
//!
//! assert_eq!(add.call(&args![2]).unwrap(), 3);
//! assert_eq!(add.cached(&args![2, 1]).unwrap(), 3);
//! ```

use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::args::{Args, Signature};
use crate::bridge::Codec;
use crate::cache::{CacheMap, Store};
use crate::disk::{DiskCachedFunction, FileCache};
use crate::error::Result;
use crate::function::FunctionCache;
use crate::instance::{Child, Instance};
use crate::key::KeyFn;
use crate::method::CachedMethod;
use crate::noargs::CachedMethodNoArgs;
use crate::parent::CachedInParentMethod;
use crate::special::CachedSpecialMethod;
use crate::value::Value;
use crate::weak::{WeakFunctionCache, WeakStore};

/// Start building a cache called `name`.
pub fn cached<V>(name: impl Into<String>) -> Builder<V> {
    Builder {
        name: name.into(),
        owner: String::new(),
        signature: Signature::variadic(),
        key: None,
        codec: None,
    }
}

/// Options shared by all kinds of caches.
pub struct Builder<V> {
    name: String,
    owner: String,
    signature: Signature,
    key: Option<KeyFn>,
    codec: Option<Codec<V>>,
}

impl<V> Builder<V> {
    /// The module or type the cached function belongs to.
    ///
    /// Together with the name, this is the path the function is registered
    /// and reconstructed under.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Declare the parameters. Without a declared signature, arguments are
    /// only normalized by sorting keywords.
    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    /// Compute keys with a custom function of the canonical arguments.
    pub fn key<F>(mut self, key: F) -> Self
    where
        F: Fn(&Args) -> Result<Value> + Send + Sync + 'static,
    {
        self.key = Some(Arc::new(key));
        self
    }
}

impl<V: Serialize + DeserializeOwned> Builder<V> {
    /// Keep the cache contents when the cache or its instance is
    /// serialized.
    pub fn do_pickle(mut self, do_pickle: bool) -> Self {
        self.codec = do_pickle.then(Codec::new);
        self
    }
}

impl<V> Builder<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Memoize a free function in memory.
    pub fn function<F>(self, func: F) -> FunctionCache<V>
    where
        F: Fn(&Args) -> Result<V> + Send + Sync + 'static,
    {
        self.function_in(CacheMap::new(), func)
    }

    /// Memoize a free function in a custom store.
    pub fn function_in<S, F>(self, store: S, func: F) -> FunctionCache<V, S>
    where
        S: Store<V>,
        F: Fn(&Args) -> Result<V> + Send + Sync + 'static,
    {
        FunctionCache::from_parts(
            self.name,
            self.owner,
            self.signature,
            self.key,
            store,
            self.codec,
            Arc::new(func),
        )
    }

    /// Memoize a method per instance.
    pub fn method<T, F>(self, func: F) -> CachedMethod<T, V>
    where
        T: Instance,
        F: Fn(&T, &Args) -> Result<V> + Send + Sync + 'static,
    {
        CachedMethod::from_parts(
            self.name,
            self.signature,
            self.key,
            self.codec,
            Arc::new(func),
            None,
        )
    }

    /// Memoize an operator-like method per instance.
    pub fn special_method<T, F>(self, func: F) -> CachedSpecialMethod<T, V>
    where
        T: Instance,
        F: Fn(&T, &Args) -> Result<V> + Send + Sync + 'static,
    {
        CachedSpecialMethod::from_parts(
            self.name,
            self.signature,
            self.key,
            self.codec,
            Arc::new(func),
        )
    }

    /// Memoize a method in the parent of the instance.
    pub fn in_parent_method<T, F>(self, func: F) -> CachedInParentMethod<T, V>
    where
        T: Child,
        F: Fn(&T, &Args) -> Result<V> + Send + Sync + 'static,
    {
        CachedInParentMethod::from_parts(
            self.name,
            self.signature,
            self.key,
            self.codec,
            Arc::new(func),
        )
    }

    /// Memoize a method without arguments per instance.
    ///
    /// The signature and key options have no effect.
    pub fn no_args_method<T, F>(self, func: F) -> CachedMethodNoArgs<T, V>
    where
        T: Instance,
        F: Fn(&T) -> Result<V> + Send + Sync + 'static,
    {
        CachedMethodNoArgs::from_parts(self.name, self.codec, Arc::new(func))
    }
}

impl<V> Builder<V>
where
    V: Send + Sync + 'static,
{
    /// Memoize a free function, holding results weakly and keeping the
    /// `capacity` most recent ones alive.
    ///
    /// Weak caches never keep their contents on serialization.
    pub fn weak_function<F>(self, capacity: usize, func: F) -> WeakFunctionCache<V>
    where
        F: Fn(&Args) -> Result<V> + Send + Sync + 'static,
    {
        if self.codec.is_some() {
            tracing::debug!(function = %self.name, "weak caches are never pickled");
        }
        FunctionCache::from_parts(
            self.name,
            self.owner,
            self.signature,
            self.key,
            WeakStore::new(capacity),
            None,
            Arc::new(move |args: &Args| func(args).map(Arc::new)),
        )
    }
}

impl<V> Builder<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Memoize a free function on disk.
    ///
    /// Files are named after the function, so functions sharing a directory
    /// must have distinct names.
    pub fn disk_function<F>(
        self,
        dir: impl Into<PathBuf>,
        memory_cache: bool,
        func: F,
    ) -> Result<DiskCachedFunction<V>>
    where
        F: Fn(&Args) -> Result<V> + Send + Sync + 'static,
    {
        let store = FileCache::new(dir, self.name.clone(), memory_cache)?;
        Ok(self.function_in(store, func))
    }
}

impl<V> Debug for Builder<V> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Builder")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("signature", &self.signature)
            .field("custom_key", &self.key.is_some())
            .field("do_pickle", &self.codec.is_some())
            .finish()
    }
}
