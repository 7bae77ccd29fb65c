use std::time::Duration;

use crate::error::Error;
use crate::lazy::LazyRefreshCache;
use crate::lock::default_lock_shards;
use crate::traits::{CacheValue, ErrorFunction, LoadFunction, default_error_reporter};

/// Default refresh interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Builder for configuring a [`LazyRefreshCache`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use refresh_cache::{LazyRefreshCacheBuilder, error_fn, load_fn};
///
/// let cache = LazyRefreshCacheBuilder::new()
///     .loader(load_fn(|key| Ok(key.len())))
///     .on_error(error_fn(|key, err| eprintln!("refresh of {key} failed: {err}")))
///     .interval(Duration::from_secs(5))
///     .lock_shards(16)
///     .keys(["alpha", "beta"])
///     .build()
///     .unwrap();
///
/// assert_eq!(cache.get_clone("alpha"), Some(5));
/// assert_eq!(cache.lock_shards(), 16);
/// ```
pub struct LazyRefreshCacheBuilder<V> {
	loader: Option<LoadFunction<V>>,
	on_error: Option<ErrorFunction>,
	interval: Duration,
	lock_shards: Option<usize>,
	keys: Vec<String>,
}

impl<V: CacheValue> LazyRefreshCacheBuilder<V> {
	pub fn new() -> Self {
		Self {
			loader: None,
			on_error: None,
			interval: DEFAULT_INTERVAL,
			lock_shards: None,
			keys: Vec::new(),
		}
	}

	/// Set the default loader. Required.
	pub fn loader(mut self, loader: LoadFunction<V>) -> Self {
		self.loader = Some(loader);
		self
	}

	/// Set the default error reporter.
	///
	/// Default: [`default_error_function`](crate::default_error_function)
	pub fn on_error(mut self, on_error: ErrorFunction) -> Self {
		self.on_error = Some(on_error);
		self
	}

	/// Set the delay between refreshes of a key. Must be non-zero.
	///
	/// Default: 60 seconds
	pub fn interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	/// Set the number of registration locks. Must be non-zero.
	///
	/// Default: the number of initial keys, at least 4
	pub fn lock_shards(mut self, count: usize) -> Self {
		self.lock_shards = Some(count);
		self
	}

	/// Add a key to load during [`build`](Self::build).
	pub fn key(mut self, key: impl Into<String>) -> Self {
		self.keys.push(key.into());
		self
	}

	/// Add keys to load during [`build`](Self::build).
	pub fn keys<I, K>(mut self, keys: I) -> Self
	where
		I: IntoIterator<Item = K>,
		K: Into<String>,
	{
		self.keys.extend(keys.into_iter().map(Into::into));
		self
	}

	/// Validate the configuration, create the cache and load the initial keys.
	///
	/// Fails before loading anything on missing loader, zero interval or zero
	/// lock shards. Fails with [`Error::InitialLoad`] if any initial key could
	/// not be loaded; loops started for the other keys are stopped first.
	pub fn build(self) -> Result<LazyRefreshCache<V>, Error> {
		let loader = self.loader.ok_or(Error::MissingLoader)?;
		if self.interval.is_zero() {
			return Err(Error::ZeroInterval);
		}
		let lock_shards = match self.lock_shards {
			Some(0) => return Err(Error::ZeroLockShards),
			Some(count) => count,
			None => default_lock_shards(self.keys.len()),
		};
		let on_error = self.on_error.unwrap_or_else(default_error_reporter);

		let cache = LazyRefreshCache::with_parts(loader, on_error, self.interval, lock_shards);
		let errors = cache.add_cache(None, None, &self.keys);
		if !errors.is_empty() {
			cache.shutdown();
			return Err(Error::InitialLoad(errors));
		}

		tracing::info!(
			keys = self.keys.len(),
			interval = ?self.interval,
			lock_shards,
			"lazy refresh cache started"
		);
		Ok(cache)
	}
}

impl<V: CacheValue> Default for LazyRefreshCacheBuilder<V> {
	fn default() -> Self {
		Self::new()
	}
}
