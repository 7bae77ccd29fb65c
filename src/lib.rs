//! # Refresh Cache
//!
//! An in-process, read-mostly cache that keeps values fresh by re-running a
//! loader in the background:
//! - **Reads never load**: `get` only looks at the last stored value
//! - **Refresh-ahead**: every key is reloaded on a fixed interval
//! - **Stale on failure**: a failed refresh keeps the previous value
//! - **One loop per key**: concurrent registrations of a key start a single loop
//!
//! Two strategies are provided:
//!
//! - [`LazyRefreshCache`]: keys may be added at any time, each gets its own
//!   refresh thread.
//! - [`BatchRefreshCache`]: a fixed key set is loaded at `init` and refreshed
//!   together by one thread.
//!
//! Both implement [`RefreshCache`] for code that only reads.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use refresh_cache::{LazyRefreshCache, error_fn, load_fn};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Settings {
//!     max_connections: u32,
//! }
//!
//! // Loader: key -> value, may block or fail
//! let loader = load_fn(|key: &str| match key {
//!     "db" => Ok(Settings { max_connections: 64 }),
//!     other => Err(format!("unknown settings key {other}").into()),
//! });
//!
//! let cache = Arc::new(
//!     LazyRefreshCache::builder()
//!         .loader(loader)
//!         .on_error(error_fn(|key, err| eprintln!("refresh of {key} failed: {err}")))
//!         .interval(Duration::from_secs(30))
//!         .key("db")
//!         .build()
//!         .unwrap(),
//! );
//!
//! let settings = cache.get("db").unwrap();
//! assert_eq!(settings.max_connections, 64);
//!
//! // First-load failures are returned, later refresh failures are reported
//! let errors = cache.add_cache(None, None, ["cache"]);
//! assert_eq!(errors[0].key, "cache");
//! assert!(cache.get("cache").is_none());
//!
//! cache.shutdown();
//! ```
//!
//! ## Async Usage
//!
//! All methods are synchronous and never block on a load after the first
//! one, so `get` is safe to call from async tasks. The returned `Arc` may be
//! held across `.await` points.
//!
//! ## Shutdown
//!
//! Refresh loops run on named OS threads (`refresh:<key>` and
//! `refresh-batch`). [`LazyRefreshCache::shutdown`] and
//! [`BatchRefreshCache::shutdown`] stop and join them; dropping a cache stops
//! them without waiting.

mod batch;
mod builder;
mod error;
mod lazy;
mod lock;
mod metrics;
mod refresh;
mod store;
mod traits;
mod worker;

pub use batch::BatchRefreshCache;
pub use builder::{DEFAULT_INTERVAL, LazyRefreshCacheBuilder};
pub use error::{Error, LoadError};
pub use lazy::LazyRefreshCache;
pub use metrics::RefreshMetrics;
pub use traits::{
	BoxError, CacheValue, ErrorFunction, LoadFunction, RefreshCache, default_error_function, error_fn, load_fn,
};
