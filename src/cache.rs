//! The concurrent LRU cache engine.
//!
//! Callers mutate the key index and recency list directly for inserts and
//! deletes; reads only enqueue a promotion message. Two background worker
//! threads consume those messages:
//!
//! 1. The *promotion worker* drains touched nodes and moves each to the
//!    most-recent end of the list, keeping the read path off the list lock.
//! 2. The *eviction worker* drains a single-slot trigger and pops
//!    least-recent nodes until the length is back within capacity.
//!
//! Capacity is therefore advisory under concurrency: the length may
//! transiently exceed it between a triggering insert and the next sweep, but
//! is always driven back down absent further growth.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace};

use crate::key_index::KeyIndex;
use crate::recency_list::{Node, RecencyList};

/// Invoked with the key and value of every evicted entry, on the thread that
/// performs the removal: the eviction worker for capacity-driven sweeps, the
/// caller for manual [`DeferredLruCache::evict`] and
/// [`DeferredLruCache::clear`]. Never invoked by
/// [`DeferredLruCache::remove`]. The callback must not block and must not
/// call back into the cache's blocking operations.
pub type EvictionCallback<K, V> = Box<dyn Fn(K, V) + Send + Sync>;

// Depth of the promotion queue. An access becomes visible in the recency
// order only once the worker has drained its message, so this bounds the
// reordering lag between a read and its promotion.
const PROMOTION_QUEUE_DEPTH: usize = 1024;

enum PromotionMsg<K, V> {
    Touch(Arc<Node<K, V>>),
    Flush(Sender<()>),
    Stop,
}

enum SweepMsg {
    Sweep,
    Flush(Sender<()>),
    Stop,
}

/// State shared between callers and the two workers.
struct Shared<K, V> {
    capacity: AtomicUsize,
    index: KeyIndex<K, V>,
    list: RecencyList<K, V>,
    // Serializes miss-path inserts (for the double-checked presence test)
    // and excludes them from eviction claims: a fresh node is linked into
    // the list before its index entry exists, and an eviction popping it in
    // that window would orphan the key in the index.
    insert_lock: Mutex<()>,
    on_evicted: Option<EvictionCallback<K, V>>,
}

impl<K, V> Shared<K, V>
where
    K: Clone + Hash + Eq,
    V: Clone,
{
    /// Pops the least-recent node, claims its key from the index, and fires
    /// the eviction callback. If a concurrent `remove` already claimed the
    /// key, the popped node is gone from both structures and the next front
    /// node is tried instead.
    ///
    /// Pop and claim happen under the insert lock so that a sweep can never
    /// pop a node whose index entry a mid-flight insert has not stored yet.
    /// Evictions are off the read hot path, so the extra lock stays out of
    /// `get`/`peek`.
    fn evict_one(&self) -> Option<(K, V)> {
        loop {
            let guard = self.insert_lock.lock();
            let node = match self.list.pop_front() {
                Some(node) => node,
                None => return None,
            };
            let (key, value) = node.entry.get();
            let claimed = self.index.remove(&key).is_some();
            drop(guard);
            if claimed {
                if let Some(callback) = &self.on_evicted {
                    callback(key.clone(), value.clone());
                }
                return Some((key, value));
            }
        }
    }

    /// Evicts until the list is back within capacity, returning how many
    /// entries were removed.
    fn sweep(&self) -> usize {
        let mut evicted = 0;
        while self.list.len() > self.capacity.load(Ordering::SeqCst) {
            if self.evict_one().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }
}

struct Workers {
    promotion: JoinHandle<()>,
    eviction: JoinHandle<()>,
}

/// A fixed-capacity, thread-safe LRU cache with asynchronous promotion and
/// eviction.
///
/// Reads never take the list lock: `get` looks the key up in a sharded index
/// and offloads the move-to-back to a background worker, so hot-path read
/// latency is decoupled from list-lock contention. `put` on an existing key
/// takes the same asynchronous route, updating the value under the entry's
/// own lock. Inserts and deletes mutate index and list synchronously.
///
/// Recency updates become visible only once the promotion worker has drained
/// them; [`DeferredLruCache::settle`] waits for both workers to catch up
/// when an exact ordering observation is needed.
///
/// # Examples
///
/// ```rust
/// use deferred_lru::DeferredLruCache;
///
/// let cache = DeferredLruCache::new(2);
/// cache.put("a", 1);
/// cache.put("b", 2);
/// assert_eq!(cache.get(&"a"), Some(1));
///
/// cache.settle();
/// cache.put("c", 3); // capacity exceeded, "b" is now least recent
/// cache.settle();
/// assert_eq!(cache.len(), 2);
/// assert!(!cache.contains(&"b"));
/// cache.close();
/// ```
pub struct DeferredLruCache<K, V>
where
    K: Clone + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<K, V>>,
    promotion_tx: Sender<PromotionMsg<K, V>>,
    sweep_tx: Sender<SweepMsg>,
    closed: AtomicBool,
    workers: Mutex<Option<Workers>>,
}

impl<K, V> DeferredLruCache<K, V>
where
    K: Clone + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// A capacity of 0 is legal: every insert is eventually swept out again.
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// Creates a cache that invokes `on_evicted` for every capacity-driven
    /// or manual eviction. See [`EvictionCallback`] for the exact contract.
    pub fn with_eviction_callback(
        capacity: usize,
        on_evicted: impl Fn(K, V) + Send + Sync + 'static,
    ) -> Self {
        Self::build(capacity, Some(Box::new(on_evicted)))
    }

    fn build(capacity: usize, on_evicted: Option<EvictionCallback<K, V>>) -> Self {
        let shared = Arc::new(Shared {
            capacity: AtomicUsize::new(capacity),
            index: KeyIndex::new(),
            list: RecencyList::new(),
            insert_lock: Mutex::new(()),
            on_evicted,
        });

        let (promotion_tx, promotion_rx) = bounded(PROMOTION_QUEUE_DEPTH);
        let (sweep_tx, sweep_rx) = bounded(1);

        let promotion = thread::spawn({
            let shared = Arc::clone(&shared);
            move || promotion_loop(shared, promotion_rx)
        });
        let eviction = thread::spawn({
            let shared = Arc::clone(&shared);
            move || eviction_loop(shared, sweep_rx)
        });

        Self {
            shared,
            promotion_tx,
            sweep_tx,
            closed: AtomicBool::new(false),
            workers: Mutex::new(Some(Workers { promotion, eviction })),
        }
    }

    /// Inserts or updates a key, returning the previous value if the key was
    /// already present.
    ///
    /// An update touches only the entry's own lock and enqueues a promotion;
    /// it never takes the list lock on the caller. A fresh insert goes to the
    /// most-recent end and arms the eviction trigger.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        if self.is_closed() {
            return None;
        }

        if let Some(node) = self.shared.index.load(&key) {
            return Some(self.update_existing(node, value));
        }

        {
            let guard = self.shared.insert_lock.lock();
            // Re-check under the insert lock: a racing writer may have
            // created the key since the optimistic lookup.
            if let Some(node) = self.shared.index.load(&key) {
                drop(guard);
                return Some(self.update_existing(node, value));
            }
            let node = Arc::new(Node::new(key.clone(), value));
            self.shared.list.push_back(Arc::clone(&node));
            self.shared.index.store(key, node);
        }

        self.trigger_sweep();
        None
    }

    /// Returns the value for `key` and marks it most recently used.
    ///
    /// The promotion is asynchronous; the value itself is not modified.
    pub fn get(&self, key: &K) -> Option<V> {
        if self.is_closed() {
            return None;
        }
        let node = self.shared.index.load(key)?;
        let value = node.entry.value();
        self.promote(node);
        Some(value)
    }

    /// Returns the value for `key` without touching the recency order.
    pub fn peek(&self, key: &K) -> Option<V> {
        if self.is_closed() {
            return None;
        }
        Some(self.shared.index.load(key)?.entry.value())
    }

    /// Membership test with no side effects.
    pub fn contains(&self, key: &K) -> bool {
        !self.is_closed() && self.shared.index.contains(key)
    }

    /// Removes `key`, returning its value if it was present.
    ///
    /// The eviction callback is never invoked for an explicit remove.
    pub fn remove(&self, key: &K) -> Option<V> {
        if self.is_closed() {
            return None;
        }
        let node = self.shared.index.remove(key)?;
        self.shared.list.remove(&node);
        Some(node.entry.value())
    }

    /// Unconditionally evicts the least-recently-used entry, invoking the
    /// eviction callback and returning the removed pair. Returns `None` on
    /// an empty cache.
    pub fn evict(&self) -> Option<(K, V)> {
        if self.is_closed() {
            return None;
        }
        self.shared.evict_one()
    }

    /// Returns the least-recently-used pair without removing or promoting it.
    pub fn peek_oldest(&self) -> Option<(K, V)> {
        if self.is_closed() {
            return None;
        }
        Some(self.shared.list.front()?.entry.get())
    }

    /// Swaps the capacity. Shrinking arms the eviction trigger; the length
    /// converges down once the eviction worker runs. Growing never evicts.
    pub fn resize(&self, capacity: usize) {
        if self.is_closed() {
            return;
        }
        let previous = self.shared.capacity.swap(capacity, Ordering::SeqCst);
        if capacity < previous {
            self.trigger_sweep();
        }
    }

    /// Number of entries currently in the cache.
    ///
    /// May transiently exceed [`DeferredLruCache::cap`] between an insert
    /// and the next eviction sweep.
    pub fn len(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.shared.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity.
    pub fn cap(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.shared.capacity.load(Ordering::SeqCst)
    }

    /// Visits entries from most- to least-recently used, stopping early when
    /// `visit` returns false.
    ///
    /// The list's read lock is held for the whole walk, so the iteration is
    /// a consistent snapshot; `visit` must not call back into the cache.
    pub fn for_each(&self, mut visit: impl FnMut(&K, &V) -> bool) {
        if self.is_closed() {
            return;
        }
        self.shared
            .list
            .for_each(|node| node.entry.with_value(|value| visit(node.entry.key(), value)));
    }

    /// Keys ordered from most- to least-recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| {
            keys.push(key.clone());
            true
        });
        keys
    }

    /// Values ordered from most- to least-recently used.
    pub fn values(&self) -> Vec<V> {
        let mut values = Vec::with_capacity(self.len());
        self.for_each(|_, value| {
            values.push(value.clone());
            true
        });
        values
    }

    /// Drains the cache through the eviction path, invoking the callback for
    /// every entry.
    pub fn clear(&self) {
        if self.is_closed() {
            return;
        }
        while self.shared.evict_one().is_some() {}
    }

    /// Blocks until both workers have drained everything enqueued before
    /// this call: pending promotions are applied and a full eviction sweep
    /// has run.
    ///
    /// Promotions are asynchronous, so tests and callers that assert on the
    /// exact recency order should settle first instead of sleeping.
    pub fn settle(&self) {
        if self.is_closed() {
            return;
        }
        let (ack_tx, ack_rx) = bounded(1);
        if self.promotion_tx.send(PromotionMsg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
        let (ack_tx, ack_rx) = bounded(1);
        if self.sweep_tx.send(SweepMsg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Stops and joins both workers. Idempotent.
    ///
    /// Work enqueued before the stop signal is drained first. After close,
    /// every operation is a uniform no-op reporting not-found/empty; the
    /// internal state is reclaimed when the cache is dropped.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing cache");
        let _ = self.promotion_tx.send(PromotionMsg::Stop);
        let _ = self.sweep_tx.send(SweepMsg::Stop);
        if let Some(workers) = self.workers.lock().take() {
            let _ = workers.promotion.join();
            let _ = workers.eviction.join();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn update_existing(&self, node: Arc<Node<K, V>>, value: V) -> V {
        let previous = node.entry.set(value);
        self.promote(node);
        previous
    }

    fn promote(&self, node: Arc<Node<K, V>>) {
        // Blocks only when the queue is at depth; after close the channel is
        // disconnected and the send degrades to a no-op.
        let _ = self.promotion_tx.send(PromotionMsg::Touch(node));
    }

    fn trigger_sweep(&self) {
        // Single-slot trigger: if one is already pending it covers this
        // call, so dropping the message is correct.
        let _ = self.sweep_tx.try_send(SweepMsg::Sweep);
    }
}

impl<K, V> Drop for DeferredLruCache<K, V>
where
    K: Clone + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.close();
    }
}

fn promotion_loop<K, V>(shared: Arc<Shared<K, V>>, rx: Receiver<PromotionMsg<K, V>>)
where
    K: Clone + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    debug!("promotion worker started");
    while let Ok(msg) = rx.recv() {
        match msg {
            PromotionMsg::Touch(node) => {
                // Detached nodes were removed or evicted after the touch was
                // enqueued; move_to_back leaves them alone.
                shared.list.move_to_back(&node);
            }
            PromotionMsg::Flush(ack) => {
                let _ = ack.send(());
            }
            PromotionMsg::Stop => break,
        }
    }
    debug!("promotion worker stopped");
}

fn eviction_loop<K, V>(shared: Arc<Shared<K, V>>, rx: Receiver<SweepMsg>)
where
    K: Clone + Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    debug!("eviction worker started");
    while let Ok(msg) = rx.recv() {
        match msg {
            SweepMsg::Sweep => {
                let evicted = shared.sweep();
                trace!(evicted, "eviction sweep complete");
            }
            SweepMsg::Flush(ack) => {
                shared.sweep();
                let _ = ack.send(());
            }
            SweepMsg::Stop => break,
        }
    }
    debug!("eviction worker stopped");
}
