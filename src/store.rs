//! Concurrent key/value storage backing both cache variants.
//!
//! The store is split into shards, each a `hashbrown` map behind a
//! `parking_lot::RwLock`. A key's shard is picked from its `ahash` hash, so
//! readers of unrelated keys rarely touch the same lock. Values are kept as
//! `Arc<V>`: a read clones the `Arc` under a short read lock and returns it,
//! so no lock is held once `get` returns.

use std::hash::BuildHasher;
use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;

/// Default number of store shards.
const DEFAULT_SHARD_COUNT: usize = 16;

/// Thread-safe map from key to last known value.
///
/// No capacity limit and no eviction: entries live as long as the store.
pub(crate) struct Store<V> {
	shards: Box<[RwLock<HashMap<String, Arc<V>, RandomState>>]>,
	hasher: RandomState,
}

impl<V> Store<V> {
	pub fn new() -> Self {
		Self::with_shards(DEFAULT_SHARD_COUNT)
	}

	/// Create with a custom shard count (rounded up to a power of two).
	pub fn with_shards(shard_count: usize) -> Self {
		let shard_count = shard_count.max(1).next_power_of_two();
		let shards = (0..shard_count)
			.map(|_| RwLock::new(HashMap::with_hasher(RandomState::new())))
			.collect();

		Self {
			shards,
			hasher: RandomState::new(),
		}
	}

	/// Last stored value for `key`.
	pub fn get(&self, key: &str) -> Option<Arc<V>> {
		self.shard(key).read().get(key).cloned()
	}

	/// Whether `key` has a value.
	pub fn contains(&self, key: &str) -> bool {
		self.shard(key).read().contains_key(key)
	}

	/// Store `value` for `key`, replacing any previous value.
	pub fn set(&self, key: &str, value: V) {
		let value = Arc::new(value);
		let mut shard = self.shard(key).write();
		match shard.get_mut(key) {
			Some(slot) => *slot = value,
			None => {
				shard.insert(key.to_owned(), value);
			}
		}
	}

	/// Number of keys with a value.
	pub fn len(&self) -> usize {
		self.shards.iter().map(|shard| shard.read().len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.shards.iter().all(|shard| shard.read().is_empty())
	}

	/// Snapshot of the stored keys, in no particular order.
	pub fn keys(&self) -> Vec<String> {
		let mut keys = Vec::new();
		for shard in self.shards.iter() {
			keys.extend(shard.read().keys().cloned());
		}
		keys
	}

	fn shard(&self, key: &str) -> &RwLock<HashMap<String, Arc<V>, RandomState>> {
		let index = (BuildHasher::hash_one(&self.hasher, key) as usize) & (self.shards.len() - 1);
		&self.shards[index]
	}
}
