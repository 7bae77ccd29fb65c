//! Refresh activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a cache's load and refresh activity.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use refresh_cache::{LazyRefreshCache, load_fn};
///
/// let cache = LazyRefreshCache::builder()
///     .loader(load_fn(|key| Ok(key.to_uppercase())))
///     .interval(Duration::from_secs(60))
///     .keys(["a", "b"])
///     .build()
///     .unwrap();
///
/// let metrics = cache.metrics();
/// assert_eq!(metrics.keys, 2);
/// assert_eq!(metrics.loads, 2);
/// assert_eq!(metrics.workers, 2);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshMetrics {
	/// Keys currently holding a value.
	pub keys: usize,
	/// Refresh loops started over the cache's lifetime.
	pub workers: u64,
	/// Successful first loads.
	pub loads: u64,
	/// Failed first loads (returned to the caller).
	pub load_failures: u64,
	/// Successful background refreshes.
	pub refreshes: u64,
	/// Failed background refreshes (routed to the error reporter).
	pub refresh_failures: u64,
}

impl RefreshMetrics {
	/// Total loader invocations, first loads and refreshes together.
	pub fn total_loads(&self) -> u64 {
		self.loads + self.load_failures + self.refreshes + self.refresh_failures
	}

	/// Fraction of background refreshes that succeeded, between 0.0 and 1.0.
	///
	/// Returns 1.0 before any refresh has run.
	pub fn success_rate(&self) -> f64 {
		let total = self.refreshes + self.refresh_failures;
		if total == 0 {
			1.0
		} else {
			self.refreshes as f64 / total as f64
		}
	}
}

/// Live counters behind [`RefreshMetrics`].
#[derive(Debug, Default)]
pub(crate) struct Counters {
	workers: AtomicU64,
	loads: AtomicU64,
	load_failures: AtomicU64,
	refreshes: AtomicU64,
	refresh_failures: AtomicU64,
}

impl Counters {
	pub fn worker_started(&self) {
		self.workers.fetch_add(1, Ordering::Relaxed);
	}

	pub fn first_load(&self, ok: bool) {
		let counter = if ok { &self.loads } else { &self.load_failures };
		counter.fetch_add(1, Ordering::Relaxed);
	}

	pub fn refresh(&self, ok: bool) {
		let counter = if ok { &self.refreshes } else { &self.refresh_failures };
		counter.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self, keys: usize) -> RefreshMetrics {
		RefreshMetrics {
			keys,
			workers: self.workers.load(Ordering::Relaxed),
			loads: self.loads.load(Ordering::Relaxed),
			load_failures: self.load_failures.load(Ordering::Relaxed),
			refreshes: self.refreshes.load(Ordering::Relaxed),
			refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
		}
	}
}
