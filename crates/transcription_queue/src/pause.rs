use crate::sync::lock;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Resettable gate between the submission path and the scheduler loop.
///
/// Set means "proceed". Submitting a high-priority job while a lower-priority job runs
/// clears it; the loop checks it between units and yields while it stays clear.
#[derive(Debug)]
pub struct PauseSignal {
	proceed: Mutex<bool>,
	changed: Condvar,
}

impl Default for PauseSignal {
	fn default() -> Self {
		Self::new()
	}
}

impl PauseSignal {
	#[must_use]
	pub const fn new() -> Self {
		Self {
			proceed: Mutex::new(true),
			changed: Condvar::new(),
		}
	}

	pub fn set(&self) {
		*lock(&self.proceed) = true;
		self.changed.notify_all();
	}

	pub fn clear(&self) {
		*lock(&self.proceed) = false;
	}

	#[must_use]
	pub fn is_set(&self) -> bool {
		*lock(&self.proceed)
	}

	/// Wait up to `timeout` for the signal to be set. Returns whether it is set.
	#[must_use]
	pub fn wait(&self, timeout: Duration) -> bool {
		let guard = lock(&self.proceed);
		let (guard, _) = self
			.changed
			.wait_timeout_while(guard, timeout, |proceed| !*proceed)
			.unwrap_or_else(PoisonError::into_inner);
		*guard
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;
	use std::time::Instant;

	#[test]
	fn test_starts_set() {
		let signal = PauseSignal::new();
		assert!(signal.is_set());
		assert!(signal.wait(Duration::from_millis(1)));
	}

	#[test]
	fn test_clear_then_wait_times_out() {
		let signal = PauseSignal::new();
		signal.clear();
		assert!(!signal.is_set());

		let start = Instant::now();
		assert!(!signal.wait(Duration::from_millis(30)));
		assert!(start.elapsed() >= Duration::from_millis(30));
	}

	#[test]
	fn test_set_wakes_waiter() {
		let signal = Arc::new(PauseSignal::new());
		signal.clear();

		let setter = Arc::clone(&signal);
		let handle = thread::spawn(move || {
			thread::sleep(Duration::from_millis(20));
			setter.set();
		});

		assert!(signal.wait(Duration::from_secs(5)));
		handle.join().unwrap();
	}
}
