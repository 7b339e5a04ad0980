use parking_lot::Mutex;
use std::mem;

/// A key/value pair stored in the cache.
///
/// The key is immutable for the entry's lifetime; the value sits behind its
/// own mutex so that repeated updates to one hot key contend only on that
/// entry, not on the whole cache. Recency tracking is handled elsewhere, so
/// readers of the value never wait on list reordering and vice versa.
pub(crate) struct CacheEntry<K, V> {
    key: K,
    value: Mutex<V>,
}

impl<K, V> CacheEntry<K, V> {
    pub(crate) fn new(key: K, value: V) -> Self {
        Self {
            key,
            value: Mutex::new(value),
        }
    }

    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    /// Replaces the value, returning the previous one.
    pub(crate) fn set(&self, value: V) -> V {
        mem::replace(&mut *self.value.lock(), value)
    }

    /// Runs `f` against the value while the entry lock is held.
    pub(crate) fn with_value<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&self.value.lock())
    }
}

impl<K: Clone, V: Clone> CacheEntry<K, V> {
    /// Returns clones of the key and current value.
    pub(crate) fn get(&self) -> (K, V) {
        (self.key.clone(), self.value.lock().clone())
    }

    pub(crate) fn value(&self) -> V {
        self.value.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_returns_previous() {
        let entry = CacheEntry::new("key", 1);
        assert_eq!(entry.set(2), 1);
        assert_eq!(entry.set(3), 2);
        assert_eq!(entry.value(), 3);
    }

    #[test]
    fn test_get_clones_both() {
        let entry = CacheEntry::new("key".to_string(), "value".to_string());
        let (k, v) = entry.get();
        assert_eq!(k, "key");
        assert_eq!(v, "value");
        assert_eq!(entry.key(), "key");
    }

    #[test]
    fn test_with_value_observes_updates() {
        let entry = CacheEntry::new(1, vec![1, 2, 3]);
        assert_eq!(entry.with_value(|v| v.len()), 3);
        entry.set(vec![]);
        assert_eq!(entry.with_value(|v| v.len()), 0);
    }

    #[test]
    fn test_concurrent_set() {
        let entry = Arc::new(CacheEntry::new(0u64, 0u64));
        let mut handles = vec![];

        for i in 1..=8u64 {
            let entry = Arc::clone(&entry);
            handles.push(thread::spawn(move || {
                for j in 0..1000 {
                    entry.set(i * 1000 + j);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // The final value must be the last write of one of the threads.
        let v = entry.value();
        assert_eq!(v % 1000, 999);
    }
}
