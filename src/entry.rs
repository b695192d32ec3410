//! Entry: one stored value plus the reference count that decides its
//! lifetime in the store.
//!
//! The count is a signed integer behind the entry's own mutex. A positive
//! count means the entry is live and may hand out more references; zero or
//! less means it is retiring and must not. The release that drives the count
//! to zero removes the entry from the store before it unlocks, so no
//! allocator can ever observe a retired entry and succeed.

use crate::store::{Store, StoreHandle};
use core::hash::{BuildHasher, Hash};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

pub(crate) struct Entry<V> {
    value: V,
    refs: Mutex<isize>,
    // Set once, right after the entry wins its `load_or_store`.
    slot: OnceLock<StoreHandle>,
}

impl<V> Entry<V> {
    /// A fresh entry already counts the reference of the caller that built it.
    pub fn new(value: V) -> Self {
        Self {
            value,
            refs: Mutex::new(1),
            slot: OnceLock::new(),
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    /// Record where the entry was published. Must happen before the
    /// publishing caller can release its reference.
    pub fn bind(&self, slot: StoreHandle) {
        let bound = self.slot.set(slot);
        debug_assert!(bound.is_ok(), "entry published twice");
    }

    /// Take one more reference if the entry is still live.
    pub fn allocate(&self) -> bool {
        let mut refs = self.refs.lock();
        if *refs <= 0 {
            return false;
        }
        // Follow Rc semantics: abort on overflow rather than continue unsafely.
        *refs = match refs.checked_add(1) {
            Some(n) => n,
            None => std::process::abort(),
        };
        true
    }

    /// Give one reference back. When that was the last one, the entry is
    /// unlinked from `store` while the count is still locked, and the removed
    /// key and entry are returned so the caller can drop them unlocked.
    pub fn release<K, S>(&self, store: &Store<K, Arc<Entry<V>>, S>) -> Option<(K, Arc<Entry<V>>)>
    where
        K: Eq + Hash,
        S: BuildHasher,
    {
        let mut refs = self.refs.lock();
        debug_assert!(*refs > 0, "release without a matching allocation");
        *refs -= 1;
        if *refs > 0 {
            return None;
        }
        let slot = *self.slot.get()?;
        let removed = store.remove(slot);
        debug_assert!(removed.is_some(), "retiring entry was not in the store");
        tracing::trace!(shard = slot.shard(), "evicted entry");
        removed
    }

    pub fn is_live(&self) -> bool {
        *self.refs.lock() > 0
    }

    pub fn ref_count(&self) -> usize {
        usize::try_from(*self.refs.lock()).unwrap_or(0)
    }
}
