//! Store: the concurrent key -> entry mapping.
//!
//! A fixed set of shards, each a `HandleTable` behind a reader/writer lock.
//! Every operation hashes its key once; the hash picks the shard and is then
//! reused by the table, so `K: Hash` runs exactly once per call.
//!
//! Lock discipline: a shard lock is never held while calling anything other
//! than `K: Eq` and `V: Clone`. In particular no entry lock is taken while a
//! shard lock is held.

use crate::handle_table::{Handle, HandleTable, Occupied};
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use parking_lot::RwLock;
use std::sync::OnceLock;

/// Stable identity of a stored mapping: shard plus generational slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct StoreHandle {
    shard: usize,
    slot: Handle,
}

impl StoreHandle {
    pub fn shard(&self) -> usize {
        self.shard
    }
}

/// Outcome of `Store::load_or_store`.
pub(crate) enum LoadOrStore<K, V> {
    /// Another value was already stored; the rejected key is handed back.
    Loaded { existing: V, key: K },
    /// The candidate is now the stored value.
    Stored(StoreHandle),
}

/// Upper bound on the shard amount; larger requests are clamped to it.
pub(crate) const MAX_SHARD_AMOUNT: usize = 1 << 16;

/// `4 x available_parallelism`, rounded up to a power of two.
pub(crate) fn default_shard_amount() -> usize {
    static DEFAULT_SHARD_AMOUNT: OnceLock<usize> = OnceLock::new();
    *DEFAULT_SHARD_AMOUNT.get_or_init(|| {
        (std::thread::available_parallelism().map_or(1, usize::from) * 4).next_power_of_two()
    })
}

pub(crate) struct Store<K, V, S> {
    hasher: S,
    shards: Box<[RwLock<HandleTable<K, V>>]>,
}

impl<K, V, S> Store<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// `shard_amount` is clamped to `1..=MAX_SHARD_AMOUNT` and rounded up to a
    /// power of two; `capacity` is spread evenly across shards.
    pub fn with_capacity_and_shard_amount(capacity: usize, shard_amount: usize, hasher: S) -> Self {
        let shard_amount = shard_amount
            .clamp(1, MAX_SHARD_AMOUNT)
            .next_power_of_two();
        let per_shard = capacity.div_ceil(shard_amount);
        let shards = (0..shard_amount)
            .map(|_| RwLock::new(HandleTable::with_capacity(per_shard)))
            .collect();
        Self { hasher, shards }
    }

    pub fn hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    // The table indexes with the low bits and hashbrown's control bytes use
    // the top seven, so the shard is taken from the middle.
    pub fn shard_index(&self, hash: u64) -> usize {
        ((hash >> 32) as usize) & (self.shards.len() - 1)
    }

    pub fn shard_amount(&self) -> usize {
        self.shards.len()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hash(q);
        self.shards[self.shard_index(hash)]
            .read()
            .find(hash, q)
            .is_some()
    }

    /// Clone out the value stored for `q`, if any.
    pub fn load<Q>(&self, hash: u64, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        V: Clone,
    {
        let shard = self.shards[self.shard_index(hash)].read();
        let handle = shard.find(hash, q)?;
        shard.value(handle).cloned()
    }

    /// Atomically return the stored value for `key`, or store a clone of
    /// `candidate` if the key is absent. Exactly one of several concurrent
    /// callers for an absent key gets `Stored`.
    pub fn load_or_store(&self, hash: u64, key: K, candidate: &V) -> LoadOrStore<K, V>
    where
        V: Clone,
    {
        let shard = self.shard_index(hash);
        let mut table = self.shards[shard].write();
        match table.insert_with(hash, key, || candidate.clone()) {
            Ok(slot) => LoadOrStore::Stored(StoreHandle { shard, slot }),
            Err(Occupied { handle, key }) => match table.value(handle) {
                Some(existing) => LoadOrStore::Loaded {
                    existing: existing.clone(),
                    key,
                },
                // The index and the slots are updated together under the
                // write lock; an occupant without a slot cannot be observed.
                None => unreachable!("index refers to a vacant slot"),
            },
        }
    }

    /// Remove the mapping behind `handle`, if it is still the current one.
    /// A handle whose mapping was already removed never touches a newer
    /// mapping for the same key.
    pub fn remove(&self, handle: StoreHandle) -> Option<(K, V)> {
        self.shards[handle.shard].write().remove(handle.slot)
    }

    /// Copy of one shard's contents, taken under its read lock.
    pub fn snapshot(&self, shard: usize) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.shards[shard]
            .read()
            .iter()
            .map(|(_, k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
