use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::recency_list::Node;

// Number of shards, must be a power of 2.
const SHARD_COUNT: usize = 16;

/// A concurrent mapping from key to list node.
///
/// The index holds a non-owning view of the node in the sense that it never
/// detaches it from the recency list; it only hands out lookups. Storage is
/// split across fixed shards, each behind its own read/write lock, so reads
/// on different keys proceed in parallel and a write stalls only its shard.
pub(crate) struct KeyIndex<K, V> {
    shards: Vec<RwLock<HashMap<K, Arc<Node<K, V>>>>>,
}

impl<K, V> KeyIndex<K, V>
where
    K: Hash + Eq,
{
    pub(crate) fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, Arc<Node<K, V>>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & (SHARD_COUNT - 1)]
    }

    pub(crate) fn load(&self, key: &K) -> Option<Arc<Node<K, V>>> {
        self.shard(key).read().get(key).cloned()
    }

    pub(crate) fn store(&self, key: K, node: Arc<Node<K, V>>) -> Option<Arc<Node<K, V>>> {
        self.shard(&key).write().insert(key, node)
    }

    /// Atomically removes and returns the mapping, if any.
    pub(crate) fn remove(&self, key: &K) -> Option<Arc<Node<K, V>>> {
        self.shard(key).write().remove(key)
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.shard(key).read().contains_key(key)
    }

    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }
}
