//! Error types.

use thiserror::Error;

use crate::traits::BoxError;

/// A key whose first load failed, or whose refresh worker could not start.
///
/// The key is not registered: it has no value and no background loop.
#[derive(Debug, Error)]
#[error("failed to load key `{key}`: {source}")]
pub struct LoadError {
	/// The key that failed.
	pub key: String,
	/// What the loader (or the OS, for worker spawn failures) returned.
	#[source]
	pub source: BoxError,
}

impl LoadError {
	pub(crate) fn new(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
		Self {
			key: key.into(),
			source: source.into(),
		}
	}
}

/// Errors returned when building or starting a cache.
#[derive(Debug, Error)]
pub enum Error {
	/// No default loader was configured.
	#[error("no default loader configured")]
	MissingLoader,

	/// The refresh interval was zero.
	#[error("refresh interval must be greater than zero")]
	ZeroInterval,

	/// The lock shard count was zero.
	#[error("lock shard count must be greater than zero")]
	ZeroLockShards,

	/// `init` was called on a batch cache that is already running.
	#[error("cache has already been initialized")]
	AlreadyStarted,

	/// The OS refused to start the batch refresh thread.
	///
	/// `failed` holds the keys whose first load failed before the spawn was
	/// attempted. The cache is left unstarted.
	#[error("failed to start refresh worker: {source}")]
	Spawn {
		#[source]
		source: std::io::Error,
		failed: Vec<LoadError>,
	},

	/// One or more keys failed their first load.
	#[error("initial load failed for {} key(s): {}", .0.len(), join_keys(.0))]
	InitialLoad(Vec<LoadError>),
}

impl Error {
	/// Keys that failed their first load.
	pub fn failed_keys(&self) -> Vec<&str> {
		match self {
			Self::InitialLoad(errors)
			| Self::Spawn {
				failed: errors,
				..
			} => errors.iter().map(|e| e.key.as_str()).collect(),
			_ => Vec::new(),
		}
	}
}

fn join_keys(errors: &[LoadError]) -> String {
	errors.iter().map(|e| e.key.as_str()).collect::<Vec<_>>().join(", ")
}
