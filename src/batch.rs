//! One shared refresh loop for a fixed key set.
//!
//! Keys are collected with [`BatchRefreshCache::add_cache`] and loaded all
//! at once by [`BatchRefreshCache::init`]. Keys that load become the healthy
//! set; a single background thread reloads them in order every interval.
//! Keys that fail at `init` are reported and never retried.

use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use hashbrown::HashSet;
use parking_lot::Mutex;

use crate::error::{Error, LoadError};
use crate::metrics::{Counters, RefreshMetrics};
use crate::refresh::Refresher;
use crate::store::Store;
use crate::traits::{CacheValue, ErrorFunction, LoadFunction, RefreshCache, default_error_reporter};
use crate::worker::Workers;

#[derive(Default)]
struct BatchState {
	pending: Vec<String>,
	healthy: Vec<String>,
	interval: Option<Duration>,
}

impl BatchState {
	fn is_started(&self) -> bool {
		self.interval.is_some()
	}
}

/// Cache that loads a fixed key set eagerly and refreshes it in one loop.
///
/// # Lifecycle
///
/// `new()` → `add_cache(..)`* → `init(..)` → running → `shutdown()`
///
/// Keys added after `init` are ignored. Only one `init` call succeeds.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use refresh_cache::{BatchRefreshCache, Error, load_fn};
///
/// let cache = BatchRefreshCache::new();
/// cache.add_cache(["rates", "limits"]);
///
/// let result = cache.init(
///     load_fn(|key| if key == "limits" { Err("unavailable".into()) } else { Ok(42u64) }),
///     None,
///     Duration::from_secs(10),
///     ["fees"],
/// );
///
/// match result {
///     Err(err @ Error::InitialLoad(_)) => assert_eq!(err.failed_keys(), vec!["limits"]),
///     other => panic!("unexpected: {other:?}"),
/// }
///
/// assert_eq!(cache.get_clone("rates"), Some(42));
/// assert_eq!(cache.get_clone("fees"), Some(42));
/// assert!(cache.get("limits").is_none());
/// assert_eq!(cache.healthy_keys(), vec!["rates", "fees"]);
/// ```
pub struct BatchRefreshCache<V: CacheValue> {
	store: Arc<Store<V>>,
	counters: Arc<Counters>,
	workers: Workers,
	state: Mutex<BatchState>,
}

impl<V: CacheValue> BatchRefreshCache<V> {
	/// Create an unstarted cache.
	pub fn new() -> Self {
		Self {
			store: Arc::new(Store::new()),
			counters: Arc::new(Counters::default()),
			workers: Workers::new(),
			state: Mutex::new(BatchState::default()),
		}
	}

	/// Queue keys for the initial load.
	///
	/// Returns `false` and ignores the keys if the cache has already been
	/// initialized.
	pub fn add_cache<I, K>(&self, keys: I) -> bool
	where
		I: IntoIterator<Item = K>,
		K: Into<String>,
	{
		let mut state = self.state.lock();
		if state.is_started() {
			tracing::warn!("keys added after init are not refreshed; ignoring");
			return false;
		}
		state.pending.extend(keys.into_iter().map(Into::into));
		true
	}

	/// Load every queued key plus `keys`, then start the refresh loop.
	///
	/// Each distinct key is loaded once, in order. Keys that load are stored
	/// and refreshed every `interval`; keys that fail are left out for good.
	/// The loop is started even when some keys fail, in which case the
	/// result is [`Error::InitialLoad`] listing them. `on_error` falls back to
	/// [`default_error_function`](crate::default_error_function).
	///
	/// If the refresh thread cannot be started the result is
	/// [`Error::Spawn`], still carrying the failed keys, and the cache goes
	/// back to unstarted with every key queued again.
	pub fn init<I, K>(
		&self,
		loader: LoadFunction<V>,
		on_error: Option<ErrorFunction>,
		interval: Duration,
		keys: I,
	) -> Result<(), Error>
	where
		I: IntoIterator<Item = K>,
		K: Into<String>,
	{
		if interval.is_zero() {
			return Err(Error::ZeroInterval);
		}

		let pending = {
			let mut state = self.state.lock();
			if state.is_started() {
				return Err(Error::AlreadyStarted);
			}
			state.interval = Some(interval);
			state.pending.extend(keys.into_iter().map(Into::into));
			std::mem::take(&mut state.pending)
		};

		let refresher = Refresher {
			store: self.store.clone(),
			counters: self.counters.clone(),
			loader,
			on_error: on_error.unwrap_or_else(default_error_reporter),
		};

		let mut seen = HashSet::with_hasher(RandomState::new());
		let mut distinct = Vec::new();
		let mut healthy = Vec::new();
		let mut errors = Vec::new();
		for key in pending {
			if !seen.insert(key.clone()) {
				continue;
			}
			distinct.push(key.clone());
			match (refresher.loader)(&key) {
				Ok(value) => {
					self.counters.first_load(true);
					self.store.set(&key, value);
					healthy.push(key);
				}
				Err(source) => {
					self.counters.first_load(false);
					tracing::debug!(key = %key, error = %source, "initial load failed, key excluded");
					errors.push(LoadError::new(key, source));
				}
			}
		}

		let refresh_keys = healthy.clone();
		let spawned = self.workers.spawn("refresh-batch".to_string(), move |signal| {
			while !signal.wait(interval) {
				for key in &refresh_keys {
					if signal.is_stopped() {
						break;
					}
					refresher.refresh(key);
				}
			}
			tracing::debug!("batch refresh loop stopped");
		});

		match spawned {
			Ok(true) => self.counters.worker_started(),
			Ok(false) => tracing::debug!("batch cache is shut down, no refresh loop started"),
			Err(source) => {
				tracing::warn!(error = %source, "failed to start batch refresh loop");
				let mut state = self.state.lock();
				state.interval = None;
				state.pending = distinct;
				return Err(Error::Spawn {
					source,
					failed: errors,
				});
			}
		}
		self.state.lock().healthy = healthy;

		tracing::info!(
			healthy = self.store.len(),
			failed = errors.len(),
			interval = ?interval,
			"batch refresh cache started"
		);

		if errors.is_empty() { Ok(()) } else { Err(Error::InitialLoad(errors)) }
	}

	/// Last loaded value for `key`, or `None` if it never loaded.
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

	pub fn contains(&self, key: &str) -> bool {
		self.store.contains(key)
	}

	/// Keys in the refresh set, in refresh order. Empty before `init`.
	pub fn healthy_keys(&self) -> Vec<String> {
		self.state.lock().healthy.clone()
	}

	/// Keys queued for the initial load.
	pub fn pending_keys(&self) -> Vec<String> {
		self.state.lock().pending.clone()
	}

	pub fn is_started(&self) -> bool {
		self.state.lock().is_started()
	}

	/// Refresh interval, once started.
	pub fn interval(&self) -> Option<Duration> {
		self.state.lock().interval
	}

	pub fn len(&self) -> usize {
		self.store.len()
	}

	pub fn is_empty(&self) -> bool {
		self.store.is_empty()
	}

	pub fn metrics(&self) -> RefreshMetrics {
		self.counters.snapshot(self.store.len())
	}

	/// Stop the refresh loop and wait for it to exit.
	///
	/// A refresh cycle in progress stops before its next key.
	pub fn shutdown(&self) {
		if !self.workers.is_stopped() {
			tracing::info!(keys = self.store.len(), "shutting down batch refresh cache");
		}
		self.workers.shutdown();
	}

	pub fn is_shut_down(&self) -> bool {
		self.workers.is_stopped()
	}
}

impl<V: CacheValue> RefreshCache<V> for BatchRefreshCache<V> {
	fn get(&self, key: &str) -> Option<Arc<V>> {
		BatchRefreshCache::get(self, key)
	}

	fn contains(&self, key: &str) -> bool {
		BatchRefreshCache::contains(self, key)
	}

	fn metrics(&self) -> RefreshMetrics {
		BatchRefreshCache::metrics(self)
	}

	fn shutdown(&self) {
		BatchRefreshCache::shutdown(self)
	}
}

impl<V: CacheValue> Default for BatchRefreshCache<V> {
	fn default() -> Self {
		Self::new()
	}
}
