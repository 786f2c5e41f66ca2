//! Reference counts that bridge local listeners to driver-side subscriptions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// What the driver must be told after a listener count changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
	/// First listener for the event: send `enabled: true`.
	Subscribe,
	/// Last listener removed: send `enabled: false`.
	Unsubscribe,
	Unchanged,
}

/// Listener counts keyed by `(guid, event)`, one table per connection.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
	counts: Mutex<HashMap<(Arc<str>, String), usize>>,
}

impl SubscriptionManager {
	pub fn acquire(&self, guid: &Arc<str>, event: &str) -> SubscriptionChange {
		let mut counts = self.counts.lock();
		let count = counts
			.entry((Arc::clone(guid), event.to_string()))
			.or_insert(0);
		*count += 1;
		if *count == 1 {
			SubscriptionChange::Subscribe
		} else {
			SubscriptionChange::Unchanged
		}
	}

	pub fn release(&self, guid: &Arc<str>, event: &str) -> SubscriptionChange {
		let mut counts = self.counts.lock();
		let key = (Arc::clone(guid), event.to_string());
		match counts.get_mut(&key) {
			Some(count) if *count > 1 => {
				*count -= 1;
				SubscriptionChange::Unchanged
			}
			Some(_) => {
				counts.remove(&key);
				SubscriptionChange::Unsubscribe
			}
			None => SubscriptionChange::Unchanged,
		}
	}

	pub fn count(&self, guid: &str, event: &str) -> usize {
		self.counts
			.lock()
			.iter()
			.find(|((g, e), _)| g.as_ref() == guid && e == event)
			.map_or(0, |(_, count)| *count)
	}

	/// Drops every count held for `guid`; the driver forgets them on dispose.
	pub fn forget(&self, guid: &str) {
		self.counts.lock().retain(|(g, _), _| g.as_ref() != guid);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_edges_change_subscription() {
		let manager = SubscriptionManager::default();
		let guid: Arc<str> = Arc::from("page@1");

		assert_eq!(manager.acquire(&guid, "console"), SubscriptionChange::Subscribe);
		assert_eq!(manager.acquire(&guid, "console"), SubscriptionChange::Unchanged);
		assert_eq!(manager.count("page@1", "console"), 2);
		assert_eq!(manager.release(&guid, "console"), SubscriptionChange::Unchanged);
		assert_eq!(manager.release(&guid, "console"), SubscriptionChange::Unsubscribe);
		assert_eq!(manager.release(&guid, "console"), SubscriptionChange::Unchanged);
		assert_eq!(manager.count("page@1", "console"), 0);
	}

	#[test]
	fn keys_are_per_object() {
		let manager = SubscriptionManager::default();
		let a: Arc<str> = Arc::from("page@1");
		let b: Arc<str> = Arc::from("page@2");

		assert_eq!(manager.acquire(&a, "console"), SubscriptionChange::Subscribe);
		assert_eq!(manager.acquire(&b, "console"), SubscriptionChange::Subscribe);
		manager.forget("page@1");
		assert_eq!(manager.count("page@1", "console"), 0);
		assert_eq!(manager.count("page@2", "console"), 1);
	}
}
