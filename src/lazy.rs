//! Per-key refresh loops started on first registration.
//!
//! A key enters the cache through [`LazyRefreshCache::add_cache`]. Its first
//! load runs synchronously on the caller's thread; once it succeeds the key
//! gets its own background thread that reloads it every interval.
//!
//! # Registration
//!
//! ```text
//!   add_cache("k")
//!        │
//!        ├─ already stored? ──────────────────────────────► done
//!        ▼
//!   lock shard_for("k")
//!        ├─ stored meanwhile? ────────────────────────────► done
//!        ├─ load in flight? ── wait for it ───────────────► its outcome
//!        └─ mark "k" as loading
//!   unlock
//!        │
//!   first load (no lock held)
//!        │
//!   lock shard_for("k")
//!        ├─ ok:    spawn refresh loop, then store value
//!        ├─ error: nothing stored
//!        └─ clear the loading mark, wake waiters
//!   unlock
//! ```
//!
//! Only the caller that marks a key as loading calls the loader; concurrent
//! registrations of that key wait for its outcome. The spawn and the store
//! write happen under the same shard lock, so any number of concurrent
//! registrations of one key start exactly one loop and load it once.

use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use hashbrown::HashMap;

use crate::builder::LazyRefreshCacheBuilder;
use crate::error::{Error, LoadError};
use crate::lock::{KeyLockRegistry, PendingLoad};
use crate::metrics::{Counters, RefreshMetrics};
use crate::refresh::Refresher;
use crate::store::Store;
use crate::traits::{CacheValue, ErrorFunction, LoadFunction, RefreshCache};
use crate::worker::Workers;

/// First loads in flight for the keys of one lock shard.
type InFlight = HashMap<String, Arc<PendingLoad>, RandomState>;

/// Cache that refreshes each key on its own schedule.
///
/// Keys can be added at any time. Reads never block on a load: [`get`]
/// returns whatever the last successful load produced.
///
/// Share across threads with `Arc<LazyRefreshCache<V>>`. Dropping the cache
/// signals its loops to stop; [`shutdown`] also waits for them.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use refresh_cache::{LazyRefreshCache, load_fn};
///
/// let cache = LazyRefreshCache::init(
///     load_fn(|key| Ok(format!("{key}-v1"))),
///     None,
///     Duration::from_secs(30),
///     ["config"],
/// )
/// .unwrap();
///
/// assert_eq!(cache.get("config").as_deref().map(String::as_str), Some("config-v1"));
/// assert!(cache.get("missing").is_none());
///
/// let errors = cache.add_cache(None, None, ["flags"]);
/// assert!(errors.is_empty());
/// assert!(cache.contains("flags"));
/// ```
///
/// [`get`]: LazyRefreshCache::get
/// [`shutdown`]: LazyRefreshCache::shutdown
pub struct LazyRefreshCache<V: CacheValue> {
	store: Arc<Store<V>>,
	locks: KeyLockRegistry<InFlight>,
	workers: Workers,
	counters: Arc<Counters>,
	loader: LoadFunction<V>,
	on_error: ErrorFunction,
	interval: Duration,
}

impl<V: CacheValue> LazyRefreshCache<V> {
	/// Start configuring a cache.
	pub fn builder() -> LazyRefreshCacheBuilder<V> {
		LazyRefreshCacheBuilder::new()
	}

	/// Build a cache with the given defaults and register `keys`.
	///
	/// `on_error` falls back to [`default_error_function`]. The lock shard
	/// count is `max(4, keys.len())`; use [`builder`] to set it explicitly.
	///
	/// Fails with [`Error::InitialLoad`] if any key's first load fails. Loops
	/// already started for the other keys are stopped.
	///
	/// [`default_error_function`]: crate::default_error_function
	/// [`builder`]: LazyRefreshCache::builder
	pub fn init<I, K>(
		loader: LoadFunction<V>,
		on_error: Option<ErrorFunction>,
		interval: Duration,
		keys: I,
	) -> Result<Self, Error>
	where
		I: IntoIterator<Item = K>,
		K: Into<String>,
	{
		let mut builder = Self::builder().loader(loader).interval(interval).keys(keys);
		if let Some(on_error) = on_error {
			builder = builder.on_error(on_error);
		}
		builder.build()
	}

	/// Internal constructor; the builder has already validated its inputs.
	pub(crate) fn with_parts(
		loader: LoadFunction<V>,
		on_error: ErrorFunction,
		interval: Duration,
		lock_shards: usize,
	) -> Self {
		Self {
			store: Arc::new(Store::new()),
			locks: KeyLockRegistry::new(lock_shards),
			workers: Workers::new(),
			counters: Arc::new(Counters::default()),
			loader,
			on_error,
			interval,
		}
	}

	/// Register `keys`, loading each one that is not yet cached.
	///
	/// `loader` and `on_error` override the cache defaults for these keys
	/// only. Keys already registered are left untouched, including their
	/// loader. A failing key does not stop the others: the result holds one
	/// [`LoadError`] per key whose first load failed, and those keys stay
	/// unregistered so a later call may retry them.
	///
	/// A key whose first load is already running on another thread is not
	/// loaded again: this call waits for that load and shares its outcome.
	/// A loader must therefore not register the key it is loading.
	pub fn add_cache<I, K>(
		&self,
		loader: Option<LoadFunction<V>>,
		on_error: Option<ErrorFunction>,
		keys: I,
	) -> Vec<LoadError>
	where
		I: IntoIterator<Item = K>,
		K: AsRef<str>,
	{
		let refresher = Refresher {
			store: self.store.clone(),
			counters: self.counters.clone(),
			loader: loader.unwrap_or_else(|| self.loader.clone()),
			on_error: on_error.unwrap_or_else(|| self.on_error.clone()),
		};

		keys.into_iter()
			.filter_map(|key| self.register(&refresher, key.as_ref()).err())
			.collect()
	}

	/// Register a single key with the cache defaults.
	pub fn add_key(&self, key: &str) -> Result<(), LoadError> {
		match self.add_cache(None, None, [key]).pop() {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}

	fn register(&self, refresher: &Refresher<V>, key: &str) -> Result<(), LoadError> {
		if self.store.contains(key) {
			return Ok(());
		}

		let pending = {
			let mut in_flight = self.locks.lock_for(key);
			if self.store.contains(key) {
				return Ok(());
			}
			match in_flight.get(key) {
				Some(pending) => Some(pending.clone()),
				None => {
					in_flight.insert(key.to_owned(), Arc::new(PendingLoad::default()));
					None
				}
			}
		};
		if let Some(pending) = pending {
			tracing::debug!(key = %key, "waiting for concurrent first load");
			return pending.wait().map_err(|message| LoadError::new(key, message));
		}

		let ticket = LoadTicket {
			locks: &self.locks,
			key,
		};
		let loaded = (refresher.loader)(key);

		let mut in_flight = self.locks.lock_for(key);
		let outcome = match loaded {
			Ok(value) => {
				self.counters.first_load(true);
				self.start(refresher, key, value)
			}
			Err(source) => {
				self.counters.first_load(false);
				tracing::debug!(key = %key, error = %source, "first load failed");
				Err(LoadError::new(key, source))
			}
		};
		if let Some(pending) = in_flight.remove(key) {
			pending.finish(outcome.as_ref().map(|_| ()).map_err(|err| err.source.to_string()));
		}
		drop(in_flight);
		drop(ticket);
		outcome
	}

	/// Start the refresh loop for `key`, then publish its first value.
	///
	/// Called with the key's shard lock held. Nothing is stored if the loop
	/// cannot be started. After shutdown the value is stored without a loop.
	fn start(&self, refresher: &Refresher<V>, key: &str, value: V) -> Result<(), LoadError> {
		let owned_key = key.to_owned();
		let refresher = refresher.clone();
		let interval = self.interval;
		let spawned = self.workers.spawn(format!("refresh:{key}"), move |signal| {
			while !signal.wait(interval) {
				refresher.refresh(&owned_key);
			}
			tracing::debug!(key = %owned_key, "refresh loop stopped");
		});

		match spawned {
			Ok(true) => {
				self.counters.worker_started();
				tracing::debug!(key = %key, interval = ?self.interval, "registered key");
			}
			Ok(false) => {
				tracing::debug!(key = %key, "cache is shut down, storing key without a refresh loop");
			}
			Err(err) => {
				tracing::warn!(key = %key, error = %err, "failed to start refresh loop");
				return Err(LoadError::new(key, err));
			}
		}

		self.store.set(key, value);
		Ok(())
	}

	/// Last loaded value for `key`, or `None` if it never loaded.
	///
	/// Never blocks on a load. The returned `Arc` is safe to hold across
	/// `.await` points and is unaffected by later refreshes.
	pub fn get(&self, key: &str) -> Option<Arc<V>> {
		self.store.get(key)
	}

	/// Cloned copy of the last loaded value for `key`.
	pub fn get_clone(&self, key: &str) -> Option<V>
	where
		V: Clone,
	{
		self.get(key).map(|arc| (*arc).clone())
	}

	/// Whether `key` holds a value.
	pub fn contains(&self, key: &str) -> bool {
		self.store.contains(key)
	}

	/// Registered keys, in no particular order.
	pub fn keys(&self) -> Vec<String> {
		self.store.keys()
	}

	/// Number of registered keys.
	pub fn len(&self) -> usize {
		self.store.len()
	}

	pub fn is_empty(&self) -> bool {
		self.store.is_empty()
	}

	/// Time between the end of one refresh and the start of the next.
	pub fn interval(&self) -> Duration {
		self.interval
	}

	/// Number of registration locks.
	pub fn lock_shards(&self) -> usize {
		self.locks.shard_count()
	}

	pub fn metrics(&self) -> RefreshMetrics {
		self.counters.snapshot(self.store.len())
	}

	/// Stop every refresh loop and wait for the threads to exit.
	///
	/// Values stay readable but are no longer refreshed. Keys added after
	/// shutdown load once and are never refreshed.
	pub fn shutdown(&self) {
		if !self.workers.is_stopped() {
			tracing::info!(keys = self.store.len(), "shutting down refresh cache");
		}
		self.workers.shutdown();
	}

	pub fn is_shut_down(&self) -> bool {
		self.workers.is_stopped()
	}
}

impl<V: CacheValue> RefreshCache<V> for LazyRefreshCache<V> {
	fn get(&self, key: &str) -> Option<Arc<V>> {
		LazyRefreshCache::get(self, key)
	}

	fn contains(&self, key: &str) -> bool {
		LazyRefreshCache::contains(self, key)
	}

	fn metrics(&self) -> RefreshMetrics {
		LazyRefreshCache::metrics(self)
	}

	fn shutdown(&self) {
		LazyRefreshCache::shutdown(self)
	}
}

/// Clears a key's loading mark if its first load unwinds.
struct LoadTicket<'a> {
	locks: &'a KeyLockRegistry<InFlight>,
	key: &'a str,
}

impl Drop for LoadTicket<'_> {
	fn drop(&mut self) {
		if let Some(pending) = self.locks.lock_for(self.key).remove(self.key) {
			pending.finish(Err("first load did not complete".to_string()));
		}
	}
}
