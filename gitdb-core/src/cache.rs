//! Bounded least-recently-used caches for reconstructed delta bases.
//!
//! Two keyings are needed: during a parse, bases are addressed by their
//! in-pack offset ([`BufferLru`]); when serving random-access reads they are
//! addressed by hash ([`ObjectLru`]). Both are byte-budgeted and safe for
//! concurrent use.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::hash::ObjectId;
use crate::object::MemoryObject;

/// Default byte budget for the delta-base caches.
pub const DEFAULT_MAX_BYTES: usize = 96 * 1024 * 1024;

struct Entry<V> {
    value: V,
    size: usize,
    stamp: u64,
}

/// Core LRU bookkeeping: a map plus a lazily-compacted recency queue.
///
/// Every `get`/`put` appends a fresh `(key, stamp)` pair to the queue;
/// eviction pops from the front, skipping pairs whose stamp no longer
/// matches the live entry.
struct Lru<K: Eq + Hash + Copy, V: Clone> {
    map: HashMap<K, Entry<V>>,
    queue: VecDeque<(K, u64)>,
    tick: u64,
    bytes: usize,
    max_bytes: usize,
}

impl<K: Eq + Hash + Copy, V: Clone> Lru<K, V> {
    fn new(max_bytes: usize) -> Self {
        Lru {
            map: HashMap::new(),
            queue: VecDeque::new(),
            tick: 0,
            bytes: 0,
            max_bytes,
        }
    }

    fn touch(&mut self, key: K) -> u64 {
        self.tick += 1;
        self.queue.push_back((key, self.tick));
        self.tick
    }

    fn get(&mut self, key: &K) -> Option<V> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.map.get_mut(key)?;
        entry.stamp = tick;
        let value = entry.value.clone();
        self.queue.push_back((*key, tick));
        Some(value)
    }

    fn put(&mut self, key: K, value: V, size: usize) {
        // Entries that can never fit are not worth evicting everything for.
        if size > self.max_bytes {
            return;
        }
        if let Some(old) = self.map.remove(&key) {
            self.bytes -= old.size;
        }
        self.bytes += size;
        let stamp = self.touch(key);
        self.map.insert(key, Entry { value, size, stamp });
        self.evict();
    }

    fn evict(&mut self) {
        while self.bytes > self.max_bytes {
            let Some((key, stamp)) = self.queue.pop_front() else {
                return;
            };
            if self.map.get(&key).is_some_and(|e| e.stamp == stamp) {
                if let Some(entry) = self.map.remove(&key) {
                    self.bytes -= entry.size;
                }
            }
        }
    }

    fn clear(&mut self) {
        self.map.clear();
        self.queue.clear();
        self.bytes = 0;
    }
}

/// LRU of reconstructed payloads keyed by in-pack offset.
pub struct BufferLru {
    inner: Mutex<Lru<u64, Arc<Vec<u8>>>>,
}

impl BufferLru {
    pub fn new(max_bytes: usize) -> Self {
        BufferLru {
            inner: Mutex::new(Lru::new(max_bytes)),
        }
    }

    pub fn get(&self, offset: u64) -> Option<Arc<Vec<u8>>> {
        self.inner.lock().expect("cache lock").get(&offset)
    }

    pub fn put(&self, offset: u64, buf: Arc<Vec<u8>>) {
        let size = buf.len();
        self.inner.lock().expect("cache lock").put(offset, buf, size)
    }

    pub fn clear(&self) {
        self.inner.lock().expect("cache lock").clear()
    }
}

impl Default for BufferLru {
    fn default() -> Self {
        BufferLru::new(DEFAULT_MAX_BYTES)
    }
}

/// LRU of fully reconstructed objects keyed by hash.
pub struct ObjectLru {
    inner: Mutex<Lru<ObjectId, Arc<MemoryObject>>>,
}

impl ObjectLru {
    pub fn new(max_bytes: usize) -> Self {
        ObjectLru {
            inner: Mutex::new(Lru::new(max_bytes)),
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<Arc<MemoryObject>> {
        self.inner.lock().expect("cache lock").get(&id)
    }

    pub fn put(&self, obj: Arc<MemoryObject>) {
        let size = obj.data().len();
        self.inner.lock().expect("cache lock").put(obj.id(), obj, size)
    }

    pub fn clear(&self) {
        self.inner.lock().expect("cache lock").clear()
    }
}

impl Default for ObjectLru {
    fn default() -> Self {
        ObjectLru::new(DEFAULT_MAX_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(len: usize, fill: u8) -> Arc<Vec<u8>> {
        Arc::new(vec![fill; len])
    }

    #[test]
    fn hit_and_miss() {
        let cache = BufferLru::new(1024);
        assert!(cache.get(1).is_none());
        cache.put(1, buf(10, b'a'));
        assert_eq!(cache.get(1).unwrap().len(), 10);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = BufferLru::new(30);
        cache.put(1, buf(10, b'a'));
        cache.put(2, buf(10, b'b'));
        cache.put(3, buf(10, b'c'));
        // Refresh 1, then overflow: 2 is now the coldest.
        assert!(cache.get(1).is_some());
        cache.put(4, buf(10, b'd'));
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
        assert!(cache.get(4).is_some());
    }

    #[test]
    fn replacing_a_key_updates_the_budget() {
        let cache = BufferLru::new(20);
        cache.put(1, buf(15, b'a'));
        cache.put(1, buf(5, b'b'));
        cache.put(2, buf(15, b'c'));
        assert_eq!(cache.get(1).unwrap()[0], b'b');
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn oversized_entries_are_not_cached() {
        let cache = BufferLru::new(10);
        cache.put(1, buf(11, b'a'));
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn object_cache_keys_by_id() {
        use crate::object::{MemoryObject, ObjectType};

        let cache = ObjectLru::new(1024);
        let obj = Arc::new(MemoryObject::new(ObjectType::Blob, b"hello\n".to_vec()));
        let id = obj.id();
        cache.put(obj);
        assert_eq!(cache.get(id).unwrap().data(), b"hello\n");
    }
}
