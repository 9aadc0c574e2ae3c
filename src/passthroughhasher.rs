use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};

use crate::key::Key;

/// A map keyed by [`Key`]s that reuses their precomputed hash.
pub(crate) type KeyMap<V> = HashMap<Key, V, BuildPassthroughHasher>;

#[derive(Copy, Clone, Default)]
pub(crate) struct BuildPassthroughHasher;

#[derive(Default)]
pub(crate) struct PassthroughHasher {
    value: u64,
}

impl Hasher for PassthroughHasher {
    #[inline(always)]
    fn finish(&self) -> u64 {
        self.value
    }

    #[inline]
    fn write(&mut self, _bytes: &[u8]) {
        unimplemented!("keys only hash their precomputed u128")
    }

    #[inline]
    fn write_u128(&mut self, i: u128) {
        // Fold both halves so that neither is ignored.
        self.value = (i as u64) ^ ((i >> 64) as u64);
    }
}

impl BuildHasher for BuildPassthroughHasher {
    type Hasher = PassthroughHasher;

    #[inline]
    fn build_hasher(&self) -> PassthroughHasher {
        PassthroughHasher::default()
    }
}
