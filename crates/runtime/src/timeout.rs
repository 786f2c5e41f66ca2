//! Hierarchical default-timeout resolution.
//!
//! Scopes form a chain (e.g. connection -> context -> page). Each scope may
//! configure its own defaults and otherwise defers to its parent. A resolved
//! timeout of [`Duration::ZERO`] means "no timeout".
//!
//! Ordinary and navigation timeouts consult the debug-mode override before
//! any configured default. Launch timeouts only consult it at the root, after
//! every scope's launch default has been tried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Fallback for ordinary and navigation timeouts.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fallback for launch timeouts.
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug)]
pub struct TimeoutSettings {
	parent: Option<Arc<TimeoutSettings>>,
	debug_mode: bool,
	default_timeout: Mutex<Option<Duration>>,
	default_navigation_timeout: Mutex<Option<Duration>>,
	default_launch_timeout: Mutex<Option<Duration>>,
}

impl TimeoutSettings {
	/// Creates a root scope.
	pub fn new(debug_mode: bool) -> Self {
		Self {
			parent: None,
			debug_mode,
			default_timeout: Mutex::new(None),
			default_navigation_timeout: Mutex::new(None),
			default_launch_timeout: Mutex::new(None),
		}
	}

	/// Creates a child scope. Debug mode is inherited from the parent.
	pub fn with_parent(parent: Arc<TimeoutSettings>) -> Self {
		Self {
			debug_mode: parent.debug_mode,
			parent: Some(parent),
			..Self::new(false)
		}
	}

	pub fn is_debug_mode(&self) -> bool {
		self.debug_mode
	}

	pub fn set_default_timeout(&self, timeout: Option<Duration>) {
		*self.default_timeout.lock() = timeout;
	}

	pub fn set_default_navigation_timeout(&self, timeout: Option<Duration>) {
		*self.default_navigation_timeout.lock() = timeout;
	}

	pub fn set_default_launch_timeout(&self, timeout: Option<Duration>) {
		*self.default_launch_timeout.lock() = timeout;
	}

	/// Effective timeout for an ordinary call.
	pub fn timeout(&self, explicit: Option<Duration>) -> Duration {
		if let Some(timeout) = explicit {
			return timeout;
		}
		if self.debug_mode {
			return Duration::ZERO;
		}
		if let Some(timeout) = *self.default_timeout.lock() {
			return timeout;
		}
		match &self.parent {
			Some(parent) => parent.timeout(None),
			None => DEFAULT_TIMEOUT,
		}
	}

	/// Effective timeout for a navigation call.
	pub fn navigation_timeout(&self, explicit: Option<Duration>) -> Duration {
		if let Some(timeout) = explicit {
			return timeout;
		}
		if self.debug_mode {
			return Duration::ZERO;
		}
		if let Some(timeout) = *self.default_navigation_timeout.lock() {
			return timeout;
		}
		if let Some(timeout) = *self.default_timeout.lock() {
			return timeout;
		}
		match &self.parent {
			Some(parent) => parent.navigation_timeout(None),
			None => DEFAULT_TIMEOUT,
		}
	}

	/// Effective timeout for launching or connecting to a driver.
	pub fn launch_timeout(&self, explicit: Option<Duration>) -> Duration {
		if let Some(timeout) = explicit {
			return timeout;
		}
		if let Some(timeout) = *self.default_launch_timeout.lock() {
			return timeout;
		}
		match &self.parent {
			Some(parent) => parent.launch_timeout(None),
			None if self.debug_mode => Duration::ZERO,
			None => DEFAULT_LAUNCH_TIMEOUT,
		}
	}
}

/// Races `future` against a timer.
///
/// A zero `timeout` waits forever. On expiry the future is dropped; a call it
/// was awaiting stays pending on the connection until its response arrives.
pub async fn with_timeout<T, F>(timeout: Duration, what: &str, future: F) -> Result<T>
where
	F: Future<Output = Result<T>>,
{
	if timeout.is_zero() {
		return future.await;
	}
	match tokio::time::timeout(timeout, future).await {
		Ok(result) => result,
		Err(_) => Err(Error::Timeout(format!(
			"{what}: Timeout {}ms exceeded.",
			timeout.as_millis()
		))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ms(millis: u64) -> Duration {
		Duration::from_millis(millis)
	}

	fn chain(debug: bool) -> (Arc<TimeoutSettings>, TimeoutSettings) {
		let root = Arc::new(TimeoutSettings::new(debug));
		let child = TimeoutSettings::with_parent(Arc::clone(&root));
		(root, child)
	}

	#[test]
	fn explicit_timeout_always_wins() {
		let (root, child) = chain(true);
		root.set_default_timeout(Some(ms(1)));
		child.set_default_navigation_timeout(Some(ms(2)));
		child.set_default_launch_timeout(Some(ms(3)));
		assert_eq!(child.timeout(Some(ms(7))), ms(7));
		assert_eq!(child.navigation_timeout(Some(ms(7))), ms(7));
		assert_eq!(child.launch_timeout(Some(ms(7))), ms(7));
	}

	#[test]
	fn fallback_constants() {
		let (_root, child) = chain(false);
		assert_eq!(child.timeout(None), DEFAULT_TIMEOUT);
		assert_eq!(child.navigation_timeout(None), DEFAULT_TIMEOUT);
		assert_eq!(child.launch_timeout(None), DEFAULT_LAUNCH_TIMEOUT);
	}

	#[test]
	fn own_default_then_parent() {
		let (root, child) = chain(false);
		root.set_default_timeout(Some(ms(500)));
		assert_eq!(child.timeout(None), ms(500));
		child.set_default_timeout(Some(ms(250)));
		assert_eq!(child.timeout(None), ms(250));
	}

	#[test]
	fn navigation_prefers_navigation_default() {
		let (root, child) = chain(false);
		root.set_default_navigation_timeout(Some(ms(900)));
		assert_eq!(child.navigation_timeout(None), ms(900));
		child.set_default_timeout(Some(ms(100)));
		assert_eq!(child.navigation_timeout(None), ms(100));
		child.set_default_navigation_timeout(Some(ms(50)));
		assert_eq!(child.navigation_timeout(None), ms(50));
		assert_eq!(child.timeout(None), ms(100));
	}

	#[test]
	fn debug_mode_zeroes_ordinary_and_navigation() {
		let (root, child) = chain(true);
		root.set_default_timeout(Some(ms(500)));
		child.set_default_timeout(Some(ms(250)));
		child.set_default_navigation_timeout(Some(ms(50)));
		assert_eq!(child.timeout(None), Duration::ZERO);
		assert_eq!(child.navigation_timeout(None), Duration::ZERO);
	}

	#[test]
	fn launch_consults_debug_mode_only_at_root() {
		let (root, child) = chain(true);
		assert_eq!(child.launch_timeout(None), Duration::ZERO);

		root.set_default_launch_timeout(Some(ms(4000)));
		assert_eq!(child.launch_timeout(None), ms(4000));

		child.set_default_launch_timeout(Some(ms(2000)));
		assert_eq!(child.launch_timeout(None), ms(2000));
	}

	#[tokio::test]
	async fn with_timeout_expires() {
		let err = with_timeout(ms(10), "session.open", async {
			tokio::time::sleep(ms(500)).await;
			Ok(())
		})
		.await
		.unwrap_err();
		assert!(err.is_timeout());
		assert!(err.to_string().contains("10ms"));
	}

	#[tokio::test]
	async fn zero_timeout_waits() {
		let value = with_timeout(Duration::ZERO, "noop", async {
			tokio::time::sleep(ms(20)).await;
			Ok(5)
		})
		.await
		.unwrap();
		assert_eq!(value, 5);
	}
}
