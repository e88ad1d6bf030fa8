//! Fixed-layout set-associative cache with LRU-within-bucket replacement.
#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundedCacheStats {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl BoundedCacheStats {
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.requests as f64
        }
    }
}

/// A cache of `buckets` independent sets, each holding up to `associativity`
/// values ordered most-recently-used first.
///
/// The caller picks the bucket (usually from a hash of the key); the index is
/// reduced modulo the bucket count. Buckets are locked individually, so
/// lookups landing in different buckets never contend.
pub struct BoundedCache<T> {
    buckets: Box<[Mutex<Box<[Option<T>]>>]>,
    associativity: usize,
    requests: AtomicU64,
    hits: AtomicU64,
}

impl<T: Clone> BoundedCache<T> {
    pub fn new(buckets: usize, associativity: usize) -> Self {
        let buckets = buckets.max(1);
        let associativity = associativity.max(1);
        let layout = (0..buckets)
            .map(|_| Mutex::new(vec![None; associativity].into_boxed_slice()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buckets: layout,
            associativity,
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub fn associativity(&self) -> usize {
        self.associativity
    }

    /// Maps an arbitrary hash onto a bucket index.
    #[inline]
    pub fn bucket_index(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    /// Looks up the entry equal to `key` in `bucket`, promoting it to the
    /// front of the bucket on a hit.
    pub fn find<K: ?Sized>(&self, key: &K, bucket: usize) -> Option<T>
    where
        T: PartialEq<K>,
    {
        self.find_by(bucket, |entry| entry == key)
    }

    /// Like [`find`](Self::find) but with an arbitrary match predicate.
    pub fn find_by(&self, bucket: usize, mut matches: impl FnMut(&T) -> bool) -> Option<T> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let mut slots = self.lock_bucket(bucket);
        let pos = slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(&mut matches))?;
        if pos != 0 {
            slots[..=pos].rotate_right(1);
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        slots[0].clone()
    }

    /// Inserts `value` as the most recently used entry of `bucket`. The tail
    /// entry falls out when the bucket is full. No duplicate check is made.
    pub fn insert(&self, value: T, bucket: usize) {
        let mut slots = self.lock_bucket(bucket);
        slots.rotate_right(1);
        slots[0] = Some(value);
    }

    /// Removes the first entry matching `matches`, closing the gap so the
    /// remaining entries keep their relative recency.
    pub fn remove_by(&self, bucket: usize, mut matches: impl FnMut(&T) -> bool) -> Option<T> {
        let mut slots = self.lock_bucket(bucket);
        let pos = slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(&mut matches))?;
        let removed = slots[pos].take();
        slots[pos..].rotate_left(1);
        removed
    }

    /// Entries of `bucket`, most recently used first.
    pub fn bucket_entries(&self, bucket: usize) -> Vec<T> {
        self.lock_bucket(bucket).iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| {
                b.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .filter(|slot| slot.is_some())
                    .count()
            })
            .sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for bucket in self.buckets.iter() {
            let mut slots = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            slots.iter_mut().for_each(|slot| *slot = None);
        }
    }

    pub fn stats(&self) -> BoundedCacheStats {
        let requests = self.requests.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        BoundedCacheStats {
            requests,
            hits,
            misses: requests.saturating_sub(hits),
            entries: self.len(),
        }
    }

    fn lock_bucket(&self, bucket: usize) -> MutexGuard<'_, Box<[Option<T>]>> {
        let idx = bucket % self.buckets.len();
        self.buckets[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
