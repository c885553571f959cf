//! Sharded locking for the object registry's per-class and per-site
//! aggregate maps.
//!
//! A single `RwLock<HashMap<_, _>>` would serialize every class's
//! aggregate update behind one lock; sharding by key hash lets unrelated
//! classes update concurrently while keeping each class's own
//! `(instance_count, total_size)` pair under one lock, so a reader never
//! observes a torn update.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

const DEFAULT_SHARD_COUNT: usize = 16;

/// A `HashMap<K, V>` split into independently-locked shards by key hash.
#[derive(Debug)]
pub struct ShardedRwLock<K, V>
where
    K: Hash + Eq,
{
    shards: Vec<RwLock<HashMap<K, V>>>,
    shard_count: usize,
}

impl<K, V> ShardedRwLock<K, V>
where
    K: Hash + Eq,
{
    /// Build with [`DEFAULT_SHARD_COUNT`] shards.
    pub fn new() -> Self {
        Self::with_shard_count(DEFAULT_SHARD_COUNT)
    }

    /// Build with a specific shard count.
    pub fn with_shard_count(shard_count: usize) -> Self {
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(RwLock::new(HashMap::new()));
        }
        Self {
            shards,
            shard_count,
        }
    }

    fn shard_index<Q>(&self, key: &Q) -> usize
    where
        Q: Hash + ?Sized,
    {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shard_count
    }

    /// Insert, returning the prior value if the key was present.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let idx = self.shard_index(&key);
        self.shards[idx].write().insert(key, value)
    }

    /// Clone out the value for `key`, if present.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let idx = self.shard_index(key);
        self.shards[idx].read().get(key).cloned()
    }

    /// Remove and return the value for `key`, if present.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.shard_index(key);
        self.shards[idx].write().remove(key)
    }

    /// Whether `key` is present.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.shard_index(key);
        self.shards[idx].read().contains_key(key)
    }

    /// Total number of entries across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Whether every shard is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Remove every entry from every shard.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    /// Run `f` with read access to the one shard holding `key`'s slot,
    /// whether or not `key` is present in it yet.
    pub fn with_shard_read<Q, F, R>(&self, key: &Q, f: F) -> R
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&HashMap<K, V>) -> R,
    {
        let idx = self.shard_index(key);
        f(&self.shards[idx].read())
    }

    /// Run `f` with write access to the one shard holding `key`'s slot.
    /// Use this to update a class's `(count, size)` pair atomically:
    /// `f` observes and mutates both fields under a single lock.
    pub fn with_shard_write<Q, F, R>(&self, key: &Q, f: F) -> R
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&mut HashMap<K, V>) -> R,
    {
        let idx = self.shard_index(key);
        f(&mut self.shards[idx].write())
    }

    /// Clone every entry into a plain `HashMap`. For bounded aggregate
    /// maps (per-class, per-site) this is the cheapest way to hand
    /// callers a consistent point-in-time copy.
    pub fn to_hash_map(&self) -> HashMap<K, V>
    where
        K: Clone,
        V: Clone,
    {
        let mut out = HashMap::with_capacity(self.len());
        for shard in &self.shards {
            for (k, v) in shard.read().iter() {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }

    /// Distribution statistics across shards.
    pub fn shard_stats(&self) -> ShardStats {
        let shard_sizes: Vec<usize> = self.shards.iter().map(|shard| shard.read().len()).collect();
        let total_entries: usize = shard_sizes.iter().sum();
        let max_shard_size = shard_sizes.iter().max().copied().unwrap_or(0);
        let min_shard_size = shard_sizes.iter().min().copied().unwrap_or(0);
        let avg_shard_size = if self.shard_count > 0 {
            total_entries as f64 / self.shard_count as f64
        } else {
            0.0
        };

        ShardStats {
            shard_count: self.shard_count,
            total_entries,
            max_shard_size,
            min_shard_size,
            avg_shard_size,
            shard_sizes,
        }
    }
}

impl<K, V> Default for ShardedRwLock<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Distribution of entries across a [`ShardedRwLock`]'s shards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardStats {
    /// Number of shards.
    pub shard_count: usize,
    /// Total entries across all shards.
    pub total_entries: usize,
    /// Size of the fullest shard.
    pub max_shard_size: usize,
    /// Size of the emptiest shard.
    pub min_shard_size: usize,
    /// Average shard size.
    pub avg_shard_size: f64,
    /// Per-shard sizes, in shard order.
    pub shard_sizes: Vec<usize>,
}

impl ShardStats {
    /// Coefficient of variation across shard sizes: `0.0` is perfectly
    /// balanced, larger values indicate skew.
    pub fn load_balance_ratio(&self) -> f64 {
        if self.total_entries == 0 || self.avg_shard_size == 0.0 {
            return 0.0;
        }
        let variance: f64 = self
            .shard_sizes
            .iter()
            .map(|&size| {
                let diff = size as f64 - self.avg_shard_size;
                diff * diff
            })
            .sum::<f64>()
            / self.shard_count as f64;
        variance.sqrt() / self.avg_shard_size
    }
}
