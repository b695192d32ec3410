//! refcount-map: a thread-safe map of lazily built, reference-counted
//! values. `get` returns the live value for a key, building it on first
//! use; the value is evicted when the last `Ref` to it is dropped.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: share expensive keyed resources (connections, per-tenant state)
//!   between threads without a cache policy or manual lifetime bookkeeping.
//! - Layers:
//!   - HandleTable<K, V>: single-threaded structural table with stable
//!     generational handles; takes precomputed hashes and stores them.
//!   - Store<K, V, S>: shards of HandleTable behind `RwLock`s; atomic
//!     load, load-or-store and remove-by-handle.
//!   - Entry<V>: value plus a mutex-guarded signed reference count and the
//!     store handle it was published under.
//!   - RefCountMap<K, V, S>: public API; `get` hands out `Ref` guards whose
//!     drop is the release.
//!
//! Protocol
//! - `allocate` succeeds only while the count is positive.
//! - The release that takes the count to zero unlinks the entry from the
//!   store before unlocking it. An allocator that loses that race blocks on
//!   the entry lock, then sees a non-positive count and backs off; by then
//!   the key is gone and its `load_or_store` can win.
//! - `get` builds at most one candidate per call. A candidate that loses the
//!   `load_or_store` race to a live entry is dropped unobserved.
//!
//! Constraints
//! - At most one live value per key; a value is never evicted while a `Ref`
//!   to it exists.
//! - Eviction is identity-checked: it removes by generational handle, so a
//!   retiring entry can never unlink a newer entry for the same key.
//! - No entry lock is taken while a shard lock is held, and the factory and
//!   user `Drop` impls run with no lock held.
//! - Only `K: Hash`/`K: Eq` run under a shard lock; they must not re-enter
//!   the same map.
//!
//! Overflow semantics
//! - Reference-count overflow aborts the process, matching `Rc`.
//!
//! Notes and non-goals
//! - No capacity bound, no eviction policy beyond refcounting.
//! - No persistence, no ordering guarantee across keys.
//! - `load`/`range` do not take references; what they see may be evicted
//!   right after.

mod backoff;
mod builder;
mod entry;
mod handle_table;
mod handle_table_proptest;
mod refcount_map;
mod store;

// Public surface
pub use builder::Builder;
pub use refcount_map::{Ref, RefCountMap};
