//! Hooks for external tracing and logging consumers.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::api_call::{ApiZone, StackFrame};
use crate::error::Error;

/// Observer of API calls made through one connection.
///
/// `on_api_call_begin` and `on_api_call_end` fire exactly once per outermost
/// non-internal call, begin strictly before end.
pub trait ApiCallListener: Send + Sync {
	fn on_api_call_begin(&self, _zone: &ApiZone) {}

	fn on_api_call_end(&self, _zone: &ApiZone, _error: Option<&Error>) {}

	/// Client frames of a wire call, reported while tracing is active.
	fn on_call_stack(&self, _id: u32, _frames: &[StackFrame]) {}
}

#[derive(Default)]
pub struct Instrumentation {
	listeners: RwLock<Vec<Arc<dyn ApiCallListener>>>,
}

impl Instrumentation {
	pub fn add_listener(&self, listener: Arc<dyn ApiCallListener>) {
		self.listeners.write().push(listener);
	}

	pub fn remove_listener(&self, listener: &Arc<dyn ApiCallListener>) {
		self.listeners
			.write()
			.retain(|existing| !Arc::ptr_eq(existing, listener));
	}

	fn snapshot(&self) -> Vec<Arc<dyn ApiCallListener>> {
		self.listeners.read().clone()
	}

	pub(crate) fn api_call_begin(&self, zone: &ApiZone) {
		for listener in self.snapshot() {
			listener.on_api_call_begin(zone);
		}
	}

	pub(crate) fn api_call_end(&self, zone: &ApiZone, error: Option<&Error>) {
		for listener in self.snapshot() {
			listener.on_api_call_end(zone, error);
		}
	}

	pub(crate) fn call_stack(&self, id: u32, frames: &[StackFrame]) {
		for listener in self.snapshot() {
			listener.on_call_stack(id, frames);
		}
	}
}

/// Log target for `=> started` / `<= succeeded` call lines.
pub const API_LOG_TARGET: &str = "pw_engine::api";

/// Writes one line per API call boundary through `tracing`.
///
/// Installed on every connection unless disabled in
/// [`ConnectionOptions`](crate::connection::ConnectionOptions).
#[derive(Debug, Default)]
pub struct LoggingListener;

impl ApiCallListener for LoggingListener {
	fn on_api_call_begin(&self, zone: &ApiZone) {
		if let Some(name) = zone.api_name() {
			tracing::debug!(target: API_LOG_TARGET, "=> {name} started");
		}
	}

	fn on_api_call_end(&self, zone: &ApiZone, error: Option<&Error>) {
		let Some(name) = zone.api_name() else {
			return;
		};
		match error {
			None => tracing::debug!(target: API_LOG_TARGET, "<= {name} succeeded"),
			Some(error) => tracing::debug!(target: API_LOG_TARGET, %error, "<= {name} failed"),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	#[derive(Default)]
	struct Counter(AtomicUsize);

	impl ApiCallListener for Counter {
		fn on_api_call_begin(&self, _zone: &ApiZone) {
			self.0.fetch_add(1, Ordering::SeqCst);
		}
	}

	#[test]
	fn removed_listener_stops_receiving() {
		let instrumentation = Instrumentation::default();
		let counter = Arc::new(Counter::default());
		let listener: Arc<dyn ApiCallListener> = counter.clone();
		instrumentation.add_listener(Arc::clone(&listener));

		let zone = ApiZone::new("session.open", Vec::new(), false, None);
		instrumentation.api_call_begin(&zone);
		instrumentation.remove_listener(&listener);
		instrumentation.api_call_begin(&zone);

		assert_eq!(counter.0.load(Ordering::SeqCst), 1);
	}
}
