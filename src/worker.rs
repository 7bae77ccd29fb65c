//! Background refresh threads and their shutdown signal.
//!
//! Every cache owns one [`Workers`] set. Refresh loops run on named OS
//! threads and park between cycles on a shared [`StopSignal`], so a shutdown
//! wakes them immediately instead of waiting out the interval.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot stop flag shared by all loops of a cache.
#[derive(Clone, Default)]
pub(crate) struct StopSignal {
	inner: Arc<SignalState>,
}

#[derive(Default)]
struct SignalState {
	stopped: Mutex<bool>,
	cond: Condvar,
}

impl StopSignal {
	pub fn new() -> Self {
		Self::default()
	}

	/// Request every waiter to stop. Idempotent.
	pub fn stop(&self) {
		let mut stopped = self.inner.stopped.lock();
		*stopped = true;
		self.inner.cond.notify_all();
	}

	pub fn is_stopped(&self) -> bool {
		*self.inner.stopped.lock()
	}

	/// Sleep for `timeout` or until stopped, whichever comes first.
	///
	/// Returns `true` if the signal was stopped. A timeout too large to be
	/// represented as a deadline waits for the stop alone.
	pub fn wait(&self, timeout: Duration) -> bool {
		let deadline = Instant::now().checked_add(timeout);
		let mut stopped = self.inner.stopped.lock();
		while !*stopped {
			match deadline {
				Some(deadline) => {
					if self.inner.cond.wait_until(&mut stopped, deadline).timed_out() {
						break;
					}
				}
				None => self.inner.cond.wait(&mut stopped),
			}
		}
		*stopped
	}
}

/// Handles of the refresh threads owned by one cache.
pub(crate) struct Workers {
	handles: Mutex<Vec<JoinHandle<()>>>,
	signal: StopSignal,
	#[cfg(test)]
	refuse_spawns: std::sync::atomic::AtomicBool,
}

impl Workers {
	pub fn new() -> Self {
		Self {
			handles: Mutex::new(Vec::new()),
			signal: StopSignal::new(),
			#[cfg(test)]
			refuse_spawns: std::sync::atomic::AtomicBool::new(false),
		}
	}

	/// Start a named thread running `body`, which receives the stop signal.
	///
	/// Returns `Ok(false)` without starting anything once the set has been
	/// stopped, so every started thread is joined by [`shutdown`].
	///
	/// [`shutdown`]: Workers::shutdown
	pub fn spawn<F>(&self, name: String, body: F) -> io::Result<bool>
	where
		F: FnOnce(StopSignal) + Send + 'static,
	{
		let mut handles = self.handles.lock();
		if self.signal.is_stopped() {
			return Ok(false);
		}
		#[cfg(test)]
		if self.refuse_spawns.load(std::sync::atomic::Ordering::SeqCst) {
			return Err(io::Error::other("thread spawn refused"));
		}
		let signal = self.signal.clone();
		let handle = thread::Builder::new().name(name).spawn(move || body(signal))?;
		handles.push(handle);
		Ok(true)
	}

	/// Make [`spawn`](Workers::spawn) fail as if the OS refused a thread.
	#[cfg(test)]
	pub fn set_refuse_spawns(&self, refuse: bool) {
		self.refuse_spawns.store(refuse, std::sync::atomic::Ordering::SeqCst);
	}

	/// Number of threads owned and not yet joined.
	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.handles.lock().len()
	}

	pub fn is_stopped(&self) -> bool {
		self.signal.is_stopped()
	}

	/// Stop every loop and wait for its thread to exit.
	///
	/// A loop that is inside a loader call finishes that call first. When
	/// called from a refresh thread, that thread is not joined.
	pub fn shutdown(&self) {
		self.signal.stop();
		let handles = std::mem::take(&mut *self.handles.lock());
		let current = thread::current().id();
		for handle in handles {
			if handle.thread().id() == current {
				continue;
			}
			if handle.join().is_err() {
				tracing::warn!("refresh worker panicked");
			}
		}
	}
}

impl Drop for Workers {
	fn drop(&mut self) {
		self.signal.stop();
	}
}
