use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::bridge::{self, Codec, Snapshot};
use crate::error::{Error, Result};
use crate::instance::{self, Caller, Instance, Lookup};

/// A wrapped method without arguments.
pub type NoArgsFn<T, V> = Arc<dyn Fn(&T) -> Result<V> + Send + Sync>;

struct NoArgsInner<T, V> {
    name: String,
    func: NoArgsFn<T, V>,
    codec: Option<Codec<V>>,
}

/// A method without arguments whose result is cached per instance.
///
/// Binding works like for [`CachedMethod`](crate::CachedMethod), but the
/// caller holds a single slot instead of a map, so no keys are computed.
pub struct CachedMethodNoArgs<T, V> {
    inner: Arc<NoArgsInner<T, V>>,
}

impl<T, V> CachedMethodNoArgs<T, V>
where
    T: Instance,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_parts(name: String, codec: Option<Codec<V>>, func: NoArgsFn<T, V>) -> Self {
        Self { inner: Arc::new(NoArgsInner { name, func, codec }) }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The caller bound to `instance`.
    pub fn get(&self, instance: &Arc<T>) -> Result<Arc<CachedMethodCallerNoArgs<T, V>>> {
        instance::bind(&**instance, &self.inner.name, Lookup::Attribute, || {
            Ok(Arc::new(CachedMethodCallerNoArgs {
                method: self.inner.clone(),
                instance: Arc::downgrade(instance),
                slot: RwLock::new(None),
            }))
        })
    }

    /// Invoke the method on `instance`.
    pub fn call(&self, instance: &Arc<T>) -> Result<V> {
        self.get(instance)?.call()
    }
}

impl<T, V> Clone for CachedMethodNoArgs<T, V> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T, V> Debug for CachedMethodNoArgs<T, V> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("CachedMethodNoArgs")
            .field("name", &self.inner.name)
            .field("do_pickle", &self.inner.codec.is_some())
            .finish()
    }
}

/// A cached method without arguments bound to one instance.
pub struct CachedMethodCallerNoArgs<T, V> {
    method: Arc<NoArgsInner<T, V>>,
    instance: Weak<T>,
    slot: RwLock<Option<V>>,
}

impl<T, V> CachedMethodCallerNoArgs<T, V>
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

    /// Return the cached result or compute it.
    pub fn call(&self) -> Result<V> {
        if let Some(value) = self.slot.read().clone() {
            tracing::trace!(method = %self.method.name, "cache hit");

            #[cfg(feature = "testing")]
            crate::testing::register_hit();

            return Ok(value);
        }

        tracing::trace!(method = %self.method.name, "cache miss");

        let instance = self.instance()?;
        let value = (self.method.func)(&*instance)?;
        let value = self.slot.write().get_or_insert(value).clone();

        #[cfg(feature = "testing")]
        crate::testing::register_miss();

        Ok(value)
    }

    /// Return the cached result without computing it.
    pub fn cached(&self) -> Result<V> {
        self.slot
            .read()
            .clone()
            .ok_or_else(|| Error::not_cached(&self.method.name))
    }

    pub fn is_in_cache(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Replace the cached result. `None` empties the slot, so that the next
    /// call computes again.
    pub fn set_cache(&self, value: Option<V>) {
        *self.slot.write() = value;
    }

    pub fn clear_cache(&self) {
        self.set_cache(None);
    }
}

impl<T, V> Caller for CachedMethodCallerNoArgs<T, V>
where
    T: Instance,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.method.name
    }

    fn snapshot(&self) -> Result<Option<Snapshot>> {
        match &self.method.codec {
            Some(codec) => codec.snapshot_slot(self.slot.read().as_ref()).map(Some),
            None => Ok(None),
        }
    }

    fn seed(&self, snapshot: Snapshot) -> Result<()> {
        let codec = self
            .method
            .codec
            .as_ref()
            .ok_or_else(|| bridge::missing_codec(&self.method.name))?;
        let value = codec.slot(&snapshot)?;
        tracing::debug!(method = %self.method.name, cached = value.is_some(), "seeding cache");
        self.set_cache(value);
        Ok(())
    }
}

impl<T, V> Debug for CachedMethodCallerNoArgs<T, V> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("CachedMethodCallerNoArgs")
            .field("name", &self.method.name)
            .field("alive", &(self.instance.strong_count() > 0))
            .field("cached", &self.slot.read().is_some())
            .finish()
    }
}
