use crate::backoff::Backoff;
use crate::builder::Builder;
use crate::entry::Entry;
use crate::store::{LoadOrStore, Store};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash, Hasher};
use core::ops::Deref;
use std::collections::hash_map::RandomState;
use std::sync::Arc;

type Factory<K, V> = Box<dyn Fn(&K) -> V + Send + Sync>;

struct Inner<K, V, S> {
    store: Store<K, Arc<Entry<V>>, S>,
    factory: Factory<K, V>,
}

/// A thread-safe map whose values are built on first use and evicted when
/// the last [`Ref`] to them is dropped.
///
/// Cloning the map is cheap and yields another handle to the same entries.
pub struct RefCountMap<K, V, S = RandomState> {
    inner: Arc<Inner<K, V, S>>,
}

impl<K, V> RefCountMap<K, V>
where
    K: Eq + Hash,
{
    /// Build values with `factory` whenever a key has no live value. Some
    /// values may be built and then discarded without ever being returned,
    /// when two callers race to create the same key.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
    {
        Builder::new().build(factory)
    }

    /// Like [`RefCountMap::new`], but the factory sees the key.
    pub fn from_key<F>(factory: F) -> Self
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        Builder::new().build_from_key(factory)
    }
}

impl<K, V, S> RefCountMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher<F>(factory: F, hasher: S) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
    {
        Builder::new().hasher(hasher).build(factory)
    }

    pub fn from_key_with_hasher<F>(factory: F, hasher: S) -> Self
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        Builder::new().hasher(hasher).build_from_key(factory)
    }

    pub(crate) fn from_parts(store: Store<K, Arc<Entry<V>>, S>, factory: Factory<K, V>) -> Self {
        Self {
            inner: Arc::new(Inner { store, factory }),
        }
    }

    /// Return the live value for `key`, building it if there is none.
    ///
    /// The flag is `true` when the value already existed and `false` when
    /// this call's factory result became the value for `key`. The value stays
    /// in the map at least until the returned `Ref` is dropped.
    ///
    /// ```
    /// use refcount_map::RefCountMap;
    ///
    /// let m = RefCountMap::new(|| String::from("conn"));
    /// let (a, existed) = m.get("db");
    /// assert!(!existed);
    /// let (b, existed) = m.get("db");
    /// assert!(existed);
    /// drop((a, b));
    /// assert!(!m.contains_key("db"));
    /// ```
    pub fn get(&self, key: K) -> (Ref<K, V, S>, bool) {
        let store = &self.inner.store;
        let hash = store.hash(&key);
        if let Some(entry) = store.load(hash, &key) {
            if entry.allocate() {
                return (self.make_ref(entry), true);
            }
        }

        let candidate = Arc::new(Entry::new((self.inner.factory)(&key)));
        let mut key = key;
        let mut backoff = Backoff::new();
        // The occupant can be retiring: its release holds the entry lock
        // while unlinking it, so `allocate` fails only once the key is
        // already gone and the next `load_or_store` can win. Another caller
        // may win first, so one pass is not guaranteed.
        loop {
            match store.load_or_store(hash, key, &candidate) {
                LoadOrStore::Stored(slot) => {
                    candidate.bind(slot);
                    tracing::trace!(shard = slot.shard(), "published new entry");
                    return (self.make_ref(candidate), false);
                }
                LoadOrStore::Loaded { existing, key: rejected } => {
                    if existing.allocate() {
                        return (self.make_ref(existing), true);
                    }
                    key = rejected;
                    backoff.snooze();
                    tracing::debug!(
                        shard = store.shard_index(hash),
                        attempt = backoff.attempts(),
                        "found retiring entry, retrying"
                    );
                }
            }
        }
    }

    /// Clone of the current value for `q`, without taking a reference.
    /// The value may be evicted right after this returns.
    pub fn load<Q>(&self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: Clone,
    {
        self.load_with(q, V::clone)
    }

    /// Run `f` on the current value for `q`, without taking a reference.
    /// `f` runs with no lock held.
    pub fn load_with<Q, R, F>(&self, q: &Q, f: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        F: FnOnce(&V) -> R,
    {
        let store = &self.inner.store;
        let entry = store.load(store.hash(q), q)?;
        entry.is_live().then(|| f(entry.value()))
    }

    /// Visit present entries until `visit` returns `false`. Reference counts
    /// are untouched, and entries may come and go while this runs.
    pub fn range<F>(&self, mut visit: F)
    where
        K: Clone,
        F: FnMut(&K, &V) -> bool,
    {
        let store = &self.inner.store;
        for shard in 0..store.shard_amount() {
            for (key, entry) in store.snapshot(shard) {
                if !visit(&key, entry.value()) {
                    return;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner.store.contains_key(q)
    }

    /// Number of outstanding `Ref`s for `q`; zero when absent.
    pub fn ref_count<Q>(&self, q: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let store = &self.inner.store;
        store
            .load(store.hash(q), q)
            .map_or(0, |entry| entry.ref_count())
    }

    pub fn shard_amount(&self) -> usize {
        self.inner.store.shard_amount()
    }

    fn make_ref(&self, entry: Arc<Entry<V>>) -> Ref<K, V, S> {
        Ref {
            owner: Arc::clone(&self.inner),
            entry,
        }
    }
}

impl<K, V, S> Clone for RefCountMap<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, S> fmt::Debug for RefCountMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCountMap")
            .field("len", &self.len())
            .field("shards", &self.shard_amount())
            .finish_non_exhaustive()
    }
}

/// A counted reference to a value in a [`RefCountMap`]. Clone takes another
/// reference; dropping gives it back and evicts the entry when it was the
/// last one.
pub struct Ref<K, V, S = RandomState>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    owner: Arc<Inner<K, V, S>>, // keeps the store alive for the release
    entry: Arc<Entry<V>>,
}

impl<K, V, S> Ref<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Give the reference back now. Same as dropping it.
    pub fn release(this: Self) {
        drop(this);
    }

    /// Whether both refer to the same entry (not merely equal values).
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.entry, &other.entry)
    }
}

impl<K, V, S> Deref for Ref<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Target = V;

    fn deref(&self) -> &V {
        self.entry.value()
    }
}

impl<K, V, S> Clone for Ref<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn clone(&self) -> Self {
        // Our own reference keeps the count positive, so this cannot fail.
        let live = self.entry.allocate();
        debug_assert!(live, "cloned a Ref whose entry is retired");
        Self {
            owner: Arc::clone(&self.owner),
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<K, V, S> Drop for Ref<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn drop(&mut self) {
        // The removed key is dropped here, after every lock is released.
        drop(self.entry.release(&self.owner.store));
    }
}

impl<K, V, S> PartialEq for Ref<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        Ref::ptr_eq(self, other)
    }
}

impl<K, V, S> Eq for Ref<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
}

impl<K, V, S> Hash for Ref<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.entry).hash(state);
    }
}

impl<K, V, S> fmt::Debug for Ref<K, V, S>
where
    K: Eq + Hash,
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::tests::retire_in_place;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    // Key whose `Eq` counts how often the store compares it against an
    // occupant. Only `id` takes part in hashing and equality.
    #[derive(Clone)]
    struct ProbedKey {
        id: u32,
        probes: Arc<AtomicUsize>,
    }

    impl PartialEq for ProbedKey {
        fn eq(&self, other: &Self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.id == other.id
        }
    }

    impl Eq for ProbedKey {}

    impl Hash for ProbedKey {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.id.hash(state);
        }
    }

    fn wait_until(cond: impl Fn() -> bool) {
        while !cond() {
            thread::yield_now();
        }
    }

    // Test: `get` meets an entry that is retiring but still linked.
    // Assumes: a release has driven the count to zero and has not yet called
    // `Store::remove` (the window `retire_in_place` freezes).
    // Verifies: the fast-path `allocate` fails, the factory runs once,
    // `load_or_store` keeps returning the retired occupant and `get` backs off
    // and retries; once the teardown completes it publishes a fresh entry
    // and never hands out the retired one.
    #[test]
    fn get_retries_until_retiring_entry_is_unlinked() {
        let probes = Arc::new(AtomicUsize::new(0));
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let m = RefCountMap::from_key(move |k: &ProbedKey| {
            counter.fetch_add(1, Ordering::SeqCst);
            k.id * 10
        });
        let key = || ProbedKey {
            id: 7,
            probes: Arc::clone(&probes),
        };

        let store = &m.inner.store;
        let retiring = Arc::new(Entry::new(70));
        match store.load_or_store(store.hash(&key()), key(), &retiring) {
            LoadOrStore::Stored(slot) => retiring.bind(slot),
            LoadOrStore::Loaded { .. } => panic!("empty map reported an occupant"),
        }
        let slot = retire_in_place(&retiring);
        assert!(m.contains_key(&key()));
        assert_eq!(m.load(&key()), None, "retired entry must not be readable");

        thread::scope(|s| {
            let getter = s.spawn(|| m.get(key()));

            // The factory only runs after the fast path refused the entry.
            wait_until(|| builds.load(Ordering::SeqCst) == 1);
            // From here on every probe comes from `load_or_store` against the
            // retired occupant; two more mean at least one full retry.
            let seen = probes.load(Ordering::SeqCst);
            wait_until(|| probes.load(Ordering::SeqCst) >= seen + 2);
            assert!(!getter.is_finished(), "get returned while the key was retiring");

            let (old_key, old) = store.remove(slot).expect("retired entry still linked");
            assert_eq!(old_key.id, 7);
            assert!(Arc::ptr_eq(&old, &retiring));

            let (fresh, existed) = getter.join().unwrap();
            assert!(!existed, "a retired entry must not count as existing");
            assert!(!Arc::ptr_eq(&fresh.entry, &retiring));
            assert_eq!(*fresh, 70);
            assert_eq!(m.ref_count(&key()), 1);
        });

        assert_eq!(builds.load(Ordering::SeqCst), 1, "retries reuse the candidate");
        assert!(m.is_empty());
    }
}
