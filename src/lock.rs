//! Sharded registration locks.
//!
//! A [`KeyLockRegistry`] owns a fixed array of mutexes. Each key maps to one
//! of them by `hash(key) % shard_count`, so two callers registering the same
//! key always contend on the same lock while the number of mutexes stays
//! bounded no matter how many keys are registered.
//!
//! The locks guard registration decisions only. Loads never run while a
//! registry lock is held. A shard may carry state of its own, such as the
//! first loads currently in flight for its keys, which is then only touched
//! with the shard's lock held.

use std::hash::BuildHasher;

use ahash::RandomState;
use parking_lot::{Condvar, Mutex, MutexGuard};

/// Minimum shard count used when none is configured.
pub(crate) const MIN_LOCK_SHARDS: usize = 4;

/// Default shard count for a cache created with `key_count` initial keys.
pub(crate) fn default_lock_shards(key_count: usize) -> usize {
	key_count.max(MIN_LOCK_SHARDS)
}

/// Fixed-size array of mutexes addressed by key hash.
///
/// Each mutex protects a `T` owned by that shard.
pub(crate) struct KeyLockRegistry<T = ()> {
	locks: Box<[Mutex<T>]>,
	hasher: RandomState,
}

impl<T: Default> KeyLockRegistry<T> {
	/// Create a registry with `shard_count` locks.
	///
	/// Callers validate the count; zero is clamped to one.
	pub fn new(shard_count: usize) -> Self {
		let locks = (0..shard_count.max(1)).map(|_| Mutex::new(T::default())).collect();
		Self {
			locks,
			hasher: RandomState::new(),
		}
	}
}

impl<T> KeyLockRegistry<T> {

	/// Index of the lock guarding `key`. Stable for the registry's lifetime.
	pub fn shard_for(&self, key: &str) -> usize {
		(BuildHasher::hash_one(&self.hasher, key) % self.locks.len() as u64) as usize
	}

	/// Acquire the lock guarding `key`.
	pub fn lock_for(&self, key: &str) -> MutexGuard<'_, T> {
		self.locks[self.shard_for(key)].lock()
	}

	pub fn shard_count(&self) -> usize {
		self.locks.len()
	}
}

/// A first load other callers can wait on.
///
/// The loading caller publishes the outcome once with [`finish`]; every
/// [`wait`] before or after that returns the same outcome. Failures are
/// carried as the loader's error message.
///
/// [`finish`]: PendingLoad::finish
/// [`wait`]: PendingLoad::wait
#[derive(Default)]
pub(crate) struct PendingLoad {
	outcome: Mutex<Option<Result<(), String>>>,
	cond: Condvar,
}

impl PendingLoad {
	pub fn finish(&self, outcome: Result<(), String>) {
		let mut slot = self.outcome.lock();
		if slot.is_none() {
			*slot = Some(outcome);
		}
		self.cond.notify_all();
	}

	/// Block until the load has finished.
	pub fn wait(&self) -> Result<(), String> {
		let mut slot = self.outcome.lock();
		loop {
			if let Some(outcome) = slot.as_ref() {
				return outcome.clone();
			}
			self.cond.wait(&mut slot);
		}
	}
}
