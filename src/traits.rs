use std::sync::Arc;

use crate::metrics::RefreshMetrics;

/// Error type returned by loaders.
///
/// Any `std::error::Error + Send + Sync` converts into it with `?` or `.into()`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Loads the current value for a key.
///
/// Called synchronously for the first load of a key and from background
/// threads afterwards, so it must be `Send + Sync`. The cache treats it as
/// opaque: it may block, do I/O, or take arbitrarily long.
///
/// # Example
///
/// ```
/// use refresh_cache::{LoadFunction, load_fn};
///
/// let loader: LoadFunction<String> = load_fn(|key| Ok(format!("value-of-{key}")));
/// assert_eq!(loader("a").unwrap(), "value-of-a");
/// ```
pub type LoadFunction<V> = Arc<dyn Fn(&str) -> Result<V, BoxError> + Send + Sync>;

/// Receives failures from background refreshes.
///
/// Only steady-state failures are routed here. A key's first load reports
/// its error to the caller instead.
pub type ErrorFunction = Arc<dyn Fn(&str, &BoxError) + Send + Sync>;

/// Wrap a closure as a [`LoadFunction`].
pub fn load_fn<V, F>(f: F) -> LoadFunction<V>
where
	F: Fn(&str) -> Result<V, BoxError> + Send + Sync + 'static,
{
	Arc::new(f)
}

/// Wrap a closure as an [`ErrorFunction`].
pub fn error_fn<F>(f: F) -> ErrorFunction
where
	F: Fn(&str, &BoxError) + Send + Sync + 'static,
{
	Arc::new(f)
}

/// Error reporter used when none is configured. Emits an `error` event.
pub fn default_error_function(key: &str, err: &BoxError) {
	tracing::error!(key = %key, error = %err, "background refresh failed");
}

/// Shared handle to [`default_error_function`].
pub(crate) fn default_error_reporter() -> ErrorFunction {
	Arc::new(default_error_function)
}

/// Bounds required of cached values.
///
/// Values are stored behind `Arc` and handed to readers on any thread.
pub trait CacheValue: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> CacheValue for T {}

/// Operations shared by both refresh strategies.
///
/// Code that only reads from a cache, or stops it, can take any
/// `impl RefreshCache<V>` without caring how keys were registered.
///
/// ```
/// use std::time::Duration;
///
/// use refresh_cache::{BatchRefreshCache, LazyRefreshCache, RefreshCache, load_fn};
///
/// fn total(cache: &impl RefreshCache<u32>, keys: &[&str]) -> u32 {
///     keys.iter().filter_map(|key| cache.get(key)).map(|v| *v).sum()
/// }
///
/// let lazy = LazyRefreshCache::init(load_fn(|_| Ok(2u32)), None, Duration::from_secs(60), ["a", "b"]).unwrap();
/// let batch = BatchRefreshCache::new();
/// batch.init(load_fn(|_| Ok(5u32)), None, Duration::from_secs(60), ["a"]).unwrap();
///
/// assert_eq!(total(&lazy, &["a", "b", "c"]), 4);
/// assert_eq!(total(&batch, &["a", "b"]), 5);
///
/// lazy.shutdown();
/// batch.shutdown();
/// ```
pub trait RefreshCache<V: CacheValue> {
	/// Last loaded value for `key`, or `None` if it never loaded.
	fn get(&self, key: &str) -> Option<Arc<V>>;

	fn contains(&self, key: &str) -> bool {
		self.get(key).is_some()
	}

	fn metrics(&self) -> RefreshMetrics;

	/// Stop refreshing and wait for the refresh threads to exit.
	fn shutdown(&self);
}
