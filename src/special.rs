use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::args::{Args, Signature};
use crate::bridge::Codec;
use crate::error::Result;
use crate::instance::{Instance, Lookup};
use crate::key::KeyFn;
use crate::method::{CachedMethod, CachedMethodCaller, MethodFn};

/// A cached method that is always resolved in the storage it is installed
/// into.
///
/// Operator-like methods are invoked through the type rather than through
/// the instance. Binding them eagerly into the one reachable storage makes
/// both paths observe the same caller and the same cache.
pub struct CachedSpecialMethod<T, V> {
    method: CachedMethod<T, V>,
}

impl<T, V> CachedSpecialMethod<T, V>
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
    ) -> Self {
        Self {
            method: CachedMethod::from_parts(name, signature, key, codec, func, None),
        }
    }

    pub fn name(&self) -> &str {
        self.method.name()
    }

    /// The caller bound to `instance`.
    pub fn get(&self, instance: &Arc<T>) -> Result<Arc<CachedMethodCaller<T, V>>> {
        self.method.bind(instance, Lookup::Direct)
    }

    /// Invoke the method on `instance`.
    pub fn call(&self, instance: &Arc<T>, args: &Args) -> Result<V> {
        self.get(instance)?.call(args)
    }
}

impl<T, V> Clone for CachedSpecialMethod<T, V> {
    fn clone(&self) -> Self {
        Self { method: self.method.clone() }
    }
}

impl<T, V> Debug for CachedSpecialMethod<T, V> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_tuple("CachedSpecialMethod").field(&self.method).finish()
    }
}
