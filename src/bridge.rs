//! Deferred reconstruction of cached callers after deserialization.
//!
//! Serializing an instance writes each installed caller as its name plus an
//! optional [`Snapshot`] of the cache contents. Deserializing leaves a
//! [`Placeholder`] in the instance storage. The first access through any
//! binder takes the placeholder out, binds a fresh caller in its place and
//! seeds the fresh cache from the snapshot.

use std::fmt::{self, Debug, Formatter};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::Key;

/// Serialized cache contents of one caller.
///
/// The shape is part of the serialized contract: a caller only accepts the
/// shape it produces itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Snapshot {
    /// A key-value map, as held by argument-taking callers.
    Map(Vec<u8>),
    /// A single optional value, as held by no-argument callers.
    Slot(Vec<u8>),
}

/// Stands in for a caller until the first access after deserialization.
#[derive(Clone, Debug)]
pub struct Placeholder {
    name: String,
    snapshot: Option<Snapshot>,
}

impl Placeholder {
    pub(crate) fn new(name: String, snapshot: Option<Snapshot>) -> Self {
        Self { name, snapshot }
    }

    /// The name of the cached method this placeholder stands in for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cache contents captured at serialization time.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub(crate) fn into_snapshot(self) -> Option<Snapshot> {
        self.snapshot
    }
}

/// Encodes and decodes cache contents of value type `V`.
///
/// Only exists for serializable values. Caches built without one drop their
/// contents on serialization.
pub struct Codec<V> {
    encode_entries: fn(&[(Key, V)]) -> Result<Vec<u8>>,
    decode_entries: fn(&[u8]) -> Result<Vec<(Key, V)>>,
    encode_slot: fn(Option<&V>) -> Result<Vec<u8>>,
    decode_slot: fn(&[u8]) -> Result<Option<V>>,
}

impl<V: Serialize + DeserializeOwned> Codec<V> {
    pub fn new() -> Self {
        fn encode_entries<V: Serialize>(entries: &[(Key, V)]) -> Result<Vec<u8>> {
            Ok(bincode::serialize(entries)?)
        }

        fn decode_entries<V: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<(Key, V)>> {
            Ok(bincode::deserialize(bytes)?)
        }

        fn encode_slot<V: Serialize>(value: Option<&V>) -> Result<Vec<u8>> {
            Ok(bincode::serialize(&value)?)
        }

        fn decode_slot<V: DeserializeOwned>(bytes: &[u8]) -> Result<Option<V>> {
            Ok(bincode::deserialize(bytes)?)
        }

        Self {
            encode_entries: encode_entries::<V>,
            decode_entries: decode_entries::<V>,
            encode_slot: encode_slot::<V>,
            decode_slot: decode_slot::<V>,
        }
    }
}

impl<V: Serialize + DeserializeOwned> Default for Codec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Codec<V> {
    pub(crate) fn encode_entries(&self, entries: &[(Key, V)]) -> Result<Vec<u8>> {
        (self.encode_entries)(entries)
    }

    pub(crate) fn decode_entries(&self, bytes: &[u8]) -> Result<Vec<(Key, V)>> {
        (self.decode_entries)(bytes)
    }

    pub(crate) fn snapshot_entries(&self, entries: &[(Key, V)]) -> Result<Snapshot> {
        self.encode_entries(entries).map(Snapshot::Map)
    }

    pub(crate) fn snapshot_slot(&self, value: Option<&V>) -> Result<Snapshot> {
        (self.encode_slot)(value).map(Snapshot::Slot)
    }

    /// Decode a snapshot taken from a map-shaped cache.
    pub(crate) fn entries(&self, snapshot: &Snapshot) -> Result<Vec<(Key, V)>> {
        match snapshot {
            Snapshot::Map(bytes) => self.decode_entries(bytes),
            Snapshot::Slot(_) => Err(Error::IncompatiblePickle {
                message: "expected a map of cached values, found a single slot".into(),
            }),
        }
    }

    /// Decode a snapshot taken from a single-slot cache.
    ///
    /// A map with at most one entry is accepted as well, since it carries the
    /// same information.
    pub(crate) fn slot(&self, snapshot: &Snapshot) -> Result<Option<V>> {
        match snapshot {
            Snapshot::Slot(bytes) => (self.decode_slot)(bytes),
            Snapshot::Map(bytes) => {
                let mut entries = self.decode_entries(bytes)?;
                if entries.len() > 1 {
                    return Err(Error::IncompatiblePickle {
                        message: format!(
                            "a no-argument cache holds one value, found {} entries",
                            entries.len()
                        ),
                    });
                }
                Ok(entries.pop().map(|(_, value)| value))
            }
        }
    }
}

impl<V> Clone for Codec<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Codec<V> {}

impl<V> Debug for Codec<V> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.pad("Codec(..)")
    }
}

/// Fails seeding for callers that were not built with `do_pickle`.
pub(crate) fn missing_codec(name: &str) -> Error {
    Error::IncompatiblePickle {
        message: format!("cached method {name:?} does not keep its cache on serialization"),
    }
}
