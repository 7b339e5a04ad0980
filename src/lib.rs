//! A fixed-capacity, thread-safe LRU cache with asynchronous promotion and
//! eviction.
//!
//! The engine combines three pieces:
//!
//! 1. A recency-ordered doubly linked list (front = least recently used)
//! 2. A sharded concurrent key index for O(1) lookups
//! 3. Two background worker threads: one drains touched entries and moves
//!    them to the most-recent end of the list, the other sweeps
//!    least-recent entries out whenever the length exceeds capacity
//!
//! Reads never take the list lock: `get` resolves through the index and
//! offloads the recency update to the promotion worker, so hot-path read
//! latency is decoupled from list-lock contention. Value updates for an
//! existing key contend only on that entry's own lock.
//!
//! # Features
//!
//! - Thread-safe, shareable via `Arc`
//! - Strict LRU eviction with an optional eviction callback
//! - Generic keys and values
//! - Non-blocking reads with asynchronous promotion
//! - Runtime resizing and manual eviction
//!
//! # Examples
//!
//! ```rust
//! use deferred_lru::DeferredLruCache;
//!
//! let cache: DeferredLruCache<String, String> = DeferredLruCache::new(1000);
//! cache.put("user:42".to_string(), "alice".to_string());
//! assert_eq!(cache.get(&"user:42".to_string()), Some("alice".to_string()));
//! cache.close();
//! ```
//!
//! Recency updates become visible once the promotion worker drains them;
//! call [`DeferredLruCache::settle`] before asserting on the exact order:
//!
//! ```rust
//! use deferred_lru::DeferredLruCache;
//!
//! let cache = DeferredLruCache::new(3);
//! for key in ["a", "b", "c"] {
//!     cache.put(key, ());
//! }
//! cache.get(&"a");
//! cache.settle();
//! assert_eq!(cache.keys(), ["a", "c", "b"]);
//! ```

pub mod cache;
mod entry;
mod key_index;
mod recency_list;

pub use cache::{DeferredLruCache, EvictionCallback};
