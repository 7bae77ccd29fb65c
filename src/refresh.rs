use std::sync::Arc;

use crate::metrics::Counters;
use crate::store::Store;
use crate::traits::{ErrorFunction, LoadFunction};

/// Everything a background loop needs to reload a key.
///
/// Cloned into each refresh thread; all fields are shared handles.
pub(crate) struct Refresher<V> {
	pub store: Arc<Store<V>>,
	pub counters: Arc<Counters>,
	pub loader: LoadFunction<V>,
	pub on_error: ErrorFunction,
}

impl<V> Clone for Refresher<V> {
	fn clone(&self) -> Self {
		Self {
			store: self.store.clone(),
			counters: self.counters.clone(),
			loader: self.loader.clone(),
			on_error: self.on_error.clone(),
		}
	}
}

impl<V> Refresher<V> {
	/// Reload `key` once.
	///
	/// On success the stored value is replaced. On failure the previous value
	/// stays in place and the error reporter is called.
	pub fn refresh(&self, key: &str) -> bool {
		match (self.loader)(key) {
			Ok(value) => {
				self.store.set(key, value);
				self.counters.refresh(true);
				true
			}
			Err(err) => {
				self.counters.refresh(false);
				tracing::debug!(key = %key, error = %err, "refresh failed, keeping previous value");
				(self.on_error)(key, &err);
				false
			}
		}
	}
}
