//! Construction options for [`RefCountMap`].

use crate::refcount_map::RefCountMap;
use crate::store::{default_shard_amount, Store};
use core::hash::{BuildHasher, Hash};
use std::collections::hash_map::RandomState;

/// Configures shard amount, initial capacity and hasher before picking the
/// factory.
///
/// ```
/// use refcount_map::Builder;
///
/// let m = Builder::new()
///     .shard_amount(8)
///     .capacity(1024)
///     .build_from_key(|k: &u64| k * 2);
/// let (v, _) = m.get(21);
/// assert_eq!(*v, 42);
/// assert_eq!(m.shard_amount(), 8);
/// ```
#[derive(Clone, Debug)]
pub struct Builder<S = RandomState> {
    shard_amount: usize,
    capacity: usize,
    hasher: S,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            shard_amount: default_shard_amount(),
            capacity: 0,
            hasher: RandomState::new(),
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Builder<S> {
    /// Number of independently locked shards. Rounded up to a power of two;
    /// zero is treated as one and anything above 65536 as 65536.
    pub fn shard_amount(mut self, shard_amount: usize) -> Self {
        self.shard_amount = shard_amount;
        self
    }

    /// Number of keys to reserve room for up front.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn hasher<H>(self, hasher: H) -> Builder<H> {
        Builder {
            shard_amount: self.shard_amount,
            capacity: self.capacity,
            hasher,
        }
    }

    /// Finish with a factory that ignores the key.
    pub fn build<K, V, F>(self, factory: F) -> RefCountMap<K, V, S>
    where
        K: Eq + Hash,
        S: BuildHasher,
        F: Fn() -> V + Send + Sync + 'static,
    {
        self.build_from_key(move |_: &K| factory())
    }

    /// Finish with a factory that builds each value from its key.
    pub fn build_from_key<K, V, F>(self, factory: F) -> RefCountMap<K, V, S>
    where
        K: Eq + Hash,
        S: BuildHasher,
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        let store =
            Store::with_capacity_and_shard_amount(self.capacity, self.shard_amount, self.hasher);
        RefCountMap::from_parts(store, Box::new(factory))
    }
}
