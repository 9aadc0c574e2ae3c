use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::args::{Args, Signature};
use crate::bridge::Codec;
use crate::error::Result;
use crate::instance::{Child, Lookup, Storage};
use crate::key::KeyFn;
use crate::method::{CachedMethod, CachedMethodCaller, MethodFn, ParentHooks};
use crate::value::Atom;

/// A method whose results are cached in the parent of the instance.
///
/// Keys are scoped by [`Child::key`], so distinct instances with equal keys
/// share their results while unequal instances get their own entries. The
/// caller is bound to the instance like for [`CachedMethod`], only its map
/// lives in the parent. A parent without storage yields a fresh map per
/// bound caller.
pub struct CachedInParentMethod<T, V> {
    method: CachedMethod<T, V>,
}

impl<T, V> CachedInParentMethod<T, V>
where
    T: Child,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_parts(
        name: String,
        signature: Signature,
        key: Option<KeyFn>,
        codec: Option<Codec<V>>,
        func: MethodFn<T, V>,
    ) -> Self {
        let hooks = ParentHooks { key: parent_key::<T>, storage: parent_storage::<T> };
        Self {
            method: CachedMethod::from_parts(name, signature, key, codec, func, Some(hooks)),
        }
    }

    pub fn name(&self) -> &str {
        self.method.name()
    }

    /// The caller bound to `instance`.
    pub fn get(&self, instance: &Arc<T>) -> Result<Arc<CachedMethodCaller<T, V>>> {
        self.method.bind(instance, Lookup::Attribute)
    }

    /// Invoke the method on `instance`.
    pub fn call(&self, instance: &Arc<T>, args: &Args) -> Result<V> {
        self.method.bind(instance, Lookup::Descriptor)?.call(args)
    }
}

fn parent_key<T: Child>(instance: &T) -> Result<Atom> {
    instance.key().to_atom()
}

fn parent_storage<T: Child>(instance: &T) -> Option<&Storage> {
    let parent = instance.parent();
    parent.attributes().or_else(|| parent.side_table())
}

impl<T, V> Clone for CachedInParentMethod<T, V> {
    fn clone(&self) -> Self {
        Self { method: self.method.clone() }
    }
}

impl<T, V> Debug for CachedInParentMethod<T, V> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_tuple("CachedInParentMethod").field(&self.method).finish()
    }
}
