use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

/// A bucket holds up to `capacity` key-value pairs at a given local depth.
struct Bucket<K, V> {
    items: Vec<(K, V)>,
    capacity: usize,
    local_depth: u32,
}

impl<K: PartialEq + Clone, V: Clone> Bucket<K, V> {
    fn new(capacity: usize, local_depth: u32) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            local_depth,
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    fn find(&self, key: &K) -> Option<V> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Inserts or overwrites. Returns false when the bucket is full and the
    /// key is not already present.
    fn insert(&mut self, key: K, value: V) -> bool {
        for (k, v) in self.items.iter_mut() {
            if *k == key {
                *v = value;
                return true;
            }
        }
        if self.is_full() {
            return false;
        }
        self.items.push((key, value));
        true
    }
}

struct Directory<K, V> {
    /// `2^global_depth` entries; several may alias the same bucket while its
    /// local depth is below the global depth.
    dir: Vec<Arc<Mutex<Bucket<K, V>>>>,
    global_depth: u32,
    num_buckets: usize,
}

/// A concurrent extendible hash table with directory doubling and bucket
/// splitting. Buckets never merge; removal simply erases the pair.
///
/// The buffer pool uses this as its page-table (`PageId -> FrameId`), and it
/// works as a general associative container. All operations serialize on a
/// single table-wide mutex, which keeps distinct-key operations trivially
/// linearizable.
///
/// The hasher is injectable so tests can pin a deterministic (e.g. identity)
/// hash; production use sticks with the default `RandomState`.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    inner: Mutex<Directory<K, V>>,
    bucket_size: usize,
    hash_builder: S,
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Hash + PartialEq + Clone,
    V: Clone,
{
    /// Creates a table whose buckets hold `bucket_size` pairs each.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + PartialEq + Clone,
    V: Clone,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        let inner = Directory {
            dir: vec![Arc::new(Mutex::new(Bucket::new(bucket_size, 0)))],
            global_depth: 0,
            num_buckets: 1,
        };
        Self {
            inner: Mutex::new(inner),
            bucket_size,
            hash_builder,
        }
    }

    fn hash(&self, key: &K) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Directory slot for `key` at the current global depth.
    fn index_of(&self, key: &K, global_depth: u32) -> usize {
        let mask = (1u64 << global_depth) - 1;
        (self.hash(key) & mask) as usize
    }

    /// Looks up the value associated with `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let idx = self.index_of(key, inner.global_depth);
        let bucket = inner.dir[idx].lock();
        bucket.find(key)
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let inner = self.inner.lock();
        let idx = self.index_of(key, inner.global_depth);
        let bucket = Arc::clone(&inner.dir[idx]);
        let mut bucket = bucket.lock();
        bucket.remove(key)
    }

    /// Inserts `key -> value`, overwriting any existing value. Splits the
    /// target bucket (doubling the directory when its local depth has caught
    /// up with the global depth) until the insert fits.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();

        loop {
            let idx = self.index_of(&key, inner.global_depth);
            let target = Arc::clone(&inner.dir[idx]);
            {
                let mut bucket = target.lock();
                if bucket.insert(key.clone(), value.clone()) {
                    return;
                }
            }
            self.split_bucket(&mut inner, &target);
        }
    }

    /// Splits a full bucket: doubles the directory if needed, partitions the
    /// items by the bit at the old local depth, and re-aims every aliasing
    /// directory entry at whichever new bucket its own index selects.
    fn split_bucket(&self, inner: &mut Directory<K, V>, full: &Arc<Mutex<Bucket<K, V>>>) {
        let old_depth = full.lock().local_depth;

        if old_depth == inner.global_depth {
            inner.global_depth += 1;
            let cap = inner.dir.len();
            for i in 0..cap {
                let alias = Arc::clone(&inner.dir[i]);
                inner.dir.push(alias);
            }
        }

        let new_depth = old_depth + 1;
        let split_bit = 1u64 << old_depth;
        let zero = Arc::new(Mutex::new(Bucket::new(self.bucket_size, new_depth)));
        let one = Arc::new(Mutex::new(Bucket::new(self.bucket_size, new_depth)));

        {
            let full = full.lock();
            let mut zero_bucket = zero.lock();
            let mut one_bucket = one.lock();
            for (k, v) in full.items.iter() {
                if self.hash(k) & split_bit != 0 {
                    one_bucket.insert(k.clone(), v.clone());
                } else {
                    zero_bucket.insert(k.clone(), v.clone());
                }
            }
        }
        inner.num_buckets += 1;

        for (i, slot) in inner.dir.iter_mut().enumerate() {
            if Arc::ptr_eq(slot, full) {
                *slot = if (i as u64) & split_bit != 0 {
                    Arc::clone(&one)
                } else {
                    Arc::clone(&zero)
                };
            }
        }
    }

    /// Current global depth of the directory.
    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket referenced by directory entry `dir_index`.
    pub fn local_depth(&self, dir_index: usize) -> u32 {
        let inner = self.inner.lock();
        let bucket = inner.dir[dir_index].lock();
        bucket.local_depth
    }

    /// Number of distinct buckets.
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::Hasher;

    /// Hashes a u32 key to itself, mirroring the directory-bit examples.
    #[derive(Default, Clone)]
    struct IdentityState;

    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            let mut buf = [0u8; 8];
            let n = bytes.len().min(8);
            buf[..n].copy_from_slice(&bytes[..n]);
            self.0 = u64::from_le_bytes(buf);
        }
    }

    impl BuildHasher for IdentityState {
        type Hasher = IdentityHasher;

        fn build_hasher(&self) -> IdentityHasher {
            IdentityHasher(0)
        }
    }

    fn identity_table(bucket_size: usize) -> ExtendibleHashTable<u32, String, IdentityState> {
        ExtendibleHashTable::with_hasher(bucket_size, IdentityState)
    }

    #[test]
    fn test_insert_find() {
        let table = ExtendibleHashTable::new(4);
        table.insert(1, "a");
        table.insert(2, "b");
        table.insert(3, "c");

        assert_eq!(table.find(&1), Some("a"));
        assert_eq!(table.find(&2), Some("b"));
        assert_eq!(table.find(&3), Some("c"));
        assert_eq!(table.find(&4), None);
    }

    #[test]
    fn test_insert_overwrites() {
        let table = ExtendibleHashTable::new(4);
        table.insert(1, "a");
        table.insert(1, "b");
        assert_eq!(table.find(&1), Some("b"));
        assert_eq!(table.num_buckets(), 1);
    }

    #[test]
    fn test_remove() {
        let table = ExtendibleHashTable::new(4);
        table.insert(1, "a");
        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
    }

    #[test]
    fn test_split_grows_directory() {
        // bucket_size 2 with identity hash: 1, 5, 9 collide on low bits
        // until the directory has grown enough to separate them.
        let table = identity_table(2);
        table.insert(1, "a".to_string());
        table.insert(5, "a".to_string());
        table.insert(9, "a".to_string());

        assert_eq!(table.find(&1), Some("a".to_string()));
        assert_eq!(table.find(&5), Some("a".to_string()));
        assert_eq!(table.find(&9), Some("a".to_string()));
        assert!(table.num_buckets() >= 2);
        assert!(table.global_depth() >= 1);
    }

    #[test]
    fn test_local_depth_partition() {
        let table = identity_table(2);
        for k in 0..16u32 {
            table.insert(k, format!("v{}", k));
        }
        // Every key must land in a bucket whose directory slot agrees with
        // the key's hash at that bucket's local depth.
        let gd = table.global_depth();
        for k in 0..16u32 {
            let idx = (k as usize) & ((1usize << gd) - 1);
            let ld = table.local_depth(idx);
            assert_eq!(
                (k as u64) & ((1 << ld) - 1),
                (idx as u64) & ((1 << ld) - 1)
            );
            assert_eq!(table.find(&k), Some(format!("v{}", k)));
        }
    }

    #[test]
    fn test_many_inserts_random_hasher() {
        let table = ExtendibleHashTable::new(4);
        for k in 0..512u32 {
            table.insert(k, k * 2);
        }
        for k in 0..512u32 {
            assert_eq!(table.find(&k), Some(k * 2));
        }
        assert!(table.num_buckets() > 1);
    }

    #[test]
    fn test_concurrent_inserts_distinct_keys() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(ExtendibleHashTable::new(4));
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for i in 0..128u32 {
                    let key = t * 1000 + i;
                    table.insert(key, key);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        for t in 0..4u32 {
            for i in 0..128u32 {
                let key = t * 1000 + i;
                assert_eq!(table.find(&key), Some(key));
            }
        }
    }
}
