//! HandleTable: structural layer with stable generational handles.
//!
//! The table never hashes keys itself. Callers pass the hash they computed
//! once (the store needs it anyway to pick a shard), and each slot keeps that
//! hash so the index can be rebuilt without calling back into `K: Hash`.

use core::borrow::Borrow;
use hashbrown::hash_table::Entry as IndexEntry;
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Handle(DefaultKey);

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    hash: u64,
}

/// Returned by `insert_with` when the key is already present. Carries the
/// occupant's handle and gives the rejected key back to the caller.
#[derive(Debug)]
pub(crate) struct Occupied<K> {
    pub handle: Handle,
    pub key: K,
}

pub(crate) struct HandleTable<K, V> {
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Slot<K, V>>,
}

impl<K, V> HandleTable<K, V>
where
    K: Eq,
{
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashTable::with_capacity(capacity),
            slots: SlotMap::with_capacity_and_key(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn find<Q>(&self, hash: u64, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|s| s.key.borrow() == q)
                    .unwrap_or(false)
            })
            .map(|&k| Handle(k))
    }

    /// Insert `key` unless an equal key is present. `default` only runs when
    /// the key is actually inserted.
    pub fn insert_with<F>(&mut self, hash: u64, key: K, default: F) -> Result<Handle, Occupied<K>>
    where
        F: FnOnce() -> V,
    {
        match self.index.entry(
            hash,
            |&kk| self.slots.get(kk).map(|s| s.key == key).unwrap_or(false),
            |&kk| self.slots.get(kk).map(|s| s.hash).unwrap_or(0),
        ) {
            IndexEntry::Occupied(o) => Err(Occupied {
                handle: Handle(*o.get()),
                key,
            }),
            IndexEntry::Vacant(v) => {
                let value = default();
                let k = self.slots.insert(Slot { key, value, hash });
                let _ = v.insert(k);
                Ok(Handle(k))
            }
        }
    }

    /// Remove the slot behind `handle`. Stale handles (already removed, or
    /// pointing at a reused slot of a newer generation) return `None`.
    pub fn remove(&mut self, handle: Handle) -> Option<(K, V)> {
        let k = handle.0;
        let slot = self.slots.remove(k)?;
        if let Ok(entry) = self.index.find_entry(slot.hash, |&kk| kk == k) {
            entry.remove();
        }
        Some((slot.key, slot.value))
    }

    pub fn value(&self, handle: Handle) -> Option<&V> {
        self.slots.get(handle.0).map(|s| &s.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &K, &V)> {
        self.slots
            .iter()
            .map(|(k, s)| (Handle(k), &s.key, &s.value))
    }
}
