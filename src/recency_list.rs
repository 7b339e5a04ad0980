use parking_lot::RwLock;
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::Arc;

use crate::entry::CacheEntry;

/// A list node holding one cache entry.
///
/// Nodes are reference-counted: the list holds one strong count per attached
/// node (encoded through `Arc::into_raw` in the link chain), the key index
/// holds its own clone, and in-flight promotion messages hold clones. A node
/// referenced by a queued promotion therefore never dangles, even if it is
/// deleted or evicted before the message is drained.
pub(crate) struct Node<K, V> {
    pub(crate) entry: CacheEntry<K, V>,
    links: UnsafeCell<Links<K, V>>,
}

struct Links<K, V> {
    prev: *const Node<K, V>,
    next: *const Node<K, V>,
    attached: bool,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(key: K, value: V) -> Self {
        Self {
            entry: CacheEntry::new(key, value),
            links: UnsafeCell::new(Links {
                prev: ptr::null(),
                next: ptr::null(),
                attached: false,
            }),
        }
    }
}

// Link access is serialized by the owning list's lock.
unsafe impl<K: Send, V: Send> Send for Node<K, V> {}
unsafe impl<K: Send + Sync, V: Send> Sync for Node<K, V> {}

/// A thread-safe doubly linked list ordering nodes from least- to
/// most-recently used.
///
/// The front is the least-recently-touched node, the back the most-recently
/// touched. All structural mutation and iteration is serialized by a single
/// read/write lock; push, remove, pop and move-to-back are O(1).
pub(crate) struct RecencyList<K, V> {
    inner: RwLock<ListInner<K, V>>,
}

struct ListInner<K, V> {
    head: *const Node<K, V>,
    tail: *const Node<K, V>,
    len: usize,
}

unsafe impl<K: Send, V: Send> Send for ListInner<K, V> {}
unsafe impl<K: Send + Sync, V: Send> Sync for ListInner<K, V> {}

impl<K, V> RecencyList<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(ListInner {
                head: ptr::null(),
                tail: ptr::null(),
                len: 0,
            }),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().len
    }

    /// Appends a node at the most-recent end, transferring one strong count
    /// into the list.
    pub(crate) fn push_back(&self, node: Arc<Node<K, V>>) {
        let mut inner = self.inner.write();
        let node = Arc::into_raw(node);
        unsafe {
            (*(*node).links.get()).attached = true;
        }
        inner.link_back(node);
    }

    /// Detaches a node, returning false if it was already detached by a
    /// concurrent remove, pop or eviction.
    pub(crate) fn remove(&self, node: &Arc<Node<K, V>>) -> bool {
        let mut inner = self.inner.write();
        let ptr = Arc::as_ptr(node);
        unsafe {
            let links = &mut *(*ptr).links.get();
            if !links.attached {
                return false;
            }
            links.attached = false;
        }
        inner.unlink(ptr);
        // Give back the strong count the list held for this node.
        drop(unsafe { Arc::from_raw(ptr) });
        true
    }

    /// Detaches and returns the least-recently-used node.
    pub(crate) fn pop_front(&self) -> Option<Arc<Node<K, V>>> {
        let mut inner = self.inner.write();
        let ptr = inner.head;
        if ptr.is_null() {
            return None;
        }
        unsafe {
            (*(*ptr).links.get()).attached = false;
        }
        inner.unlink(ptr);
        Some(unsafe { Arc::from_raw(ptr) })
    }

    /// Moves a node to the most-recent end. A detached node is left alone
    /// and false is returned.
    pub(crate) fn move_to_back(&self, node: &Arc<Node<K, V>>) -> bool {
        let mut inner = self.inner.write();
        let ptr = Arc::as_ptr(node);
        unsafe {
            if !(*(*ptr).links.get()).attached {
                return false;
            }
        }
        if inner.tail != ptr {
            inner.unlink(ptr);
            inner.link_back(ptr);
        }
        true
    }

    /// Peeks at the least-recently-used node without detaching it.
    pub(crate) fn front(&self) -> Option<Arc<Node<K, V>>> {
        clone_handle(self.inner.read().head)
    }

    /// Peeks at the most-recently-used node without detaching it.
    #[allow(dead_code)]
    pub(crate) fn back(&self) -> Option<Arc<Node<K, V>>> {
        clone_handle(self.inner.read().tail)
    }

    /// Walks the list from most- to least-recently used, stopping early when
    /// `visit` returns false.
    ///
    /// The read lock is held for the whole walk, so the iteration is a
    /// consistent point-in-time snapshot.
    pub(crate) fn for_each(&self, mut visit: impl FnMut(&Node<K, V>) -> bool) {
        let inner = self.inner.read();
        let mut cur = inner.tail;
        while !cur.is_null() {
            let node = unsafe { &*cur };
            if !visit(node) {
                break;
            }
            cur = unsafe { (*node.links.get()).prev };
        }
    }
}

/// Clones a node handle out of the chain without consuming the list's count.
fn clone_handle<K, V>(ptr: *const Node<K, V>) -> Option<Arc<Node<K, V>>> {
    if ptr.is_null() {
        None
    } else {
        unsafe {
            Arc::increment_strong_count(ptr);
            Some(Arc::from_raw(ptr))
        }
    }
}

impl<K, V> ListInner<K, V> {
    fn link_back(&mut self, node: *const Node<K, V>) {
        unsafe {
            let links = &mut *(*node).links.get();
            links.prev = self.tail;
            links.next = ptr::null();
            if self.tail.is_null() {
                self.head = node;
            } else {
                (*(*self.tail).links.get()).next = node;
            }
        }
        self.tail = node;
        self.len += 1;
    }

    fn unlink(&mut self, node: *const Node<K, V>) {
        unsafe {
            let links = &mut *(*node).links.get();
            let (prev, next) = (links.prev, links.next);
            links.prev = ptr::null();
            links.next = ptr::null();
            if prev.is_null() {
                self.head = next;
            } else {
                (*(*prev).links.get()).next = next;
            }
            if next.is_null() {
                self.tail = prev;
            } else {
                (*(*next).links.get()).prev = prev;
            }
        }
        self.len -= 1;
    }
}

impl<K, V> Drop for ListInner<K, V> {
    fn drop(&mut self) {
        // Reclaim the strong count held for every still-attached node.
        let mut cur = self.head;
        while !cur.is_null() {
            let node = unsafe { Arc::from_raw(cur) };
            cur = unsafe { (*node.links.get()).next };
        }
    }
}
