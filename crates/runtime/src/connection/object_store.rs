//! Object registry and the parent/child forest of one connection.
//!
//! Nodes and their tree links live under one lock so every structural change
//! (create, adopt, dispose) is atomic with respect to lookups. Per-GUID
//! [`Notify`] waiters in a [`DashMap`] wake only the task interested in a
//! given object, and [`ObjectStore::wait_for`] registers before checking to
//! prevent lost wakeups.
//!
//! Disposed guids are remembered in a bounded window so that traffic racing a
//! `__dispose__` can be told apart from a guid that never existed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::channel_owner::ChannelOwner;
use crate::error::{Error, Result};

struct Node {
	object: Arc<dyn ChannelOwner>,
	parent: Option<Arc<str>>,
	children: Vec<Arc<str>>,
}

/// How many disposed guids are remembered.
pub(crate) const RETIRED_WINDOW: usize = 1024;

/// FIFO window of recently disposed guids.
#[derive(Default)]
struct Retired {
	guids: HashSet<Arc<str>>,
	order: VecDeque<Arc<str>>,
}

impl Retired {
	fn insert(&mut self, guid: Arc<str>) {
		if !self.guids.insert(Arc::clone(&guid)) {
			return;
		}
		self.order.push_back(guid);
		while self.order.len() > RETIRED_WINDOW {
			if let Some(oldest) = self.order.pop_front() {
				self.guids.remove(&oldest);
			}
		}
	}

	fn contains(&self, guid: &str) -> bool {
		self.guids.contains(guid)
	}

	fn len(&self) -> usize {
		self.order.len()
	}
}

/// Thread-safe registry of protocol objects by GUID.
pub struct ObjectStore {
	nodes: Mutex<HashMap<Arc<str>, Node>>,
	retired: Mutex<Retired>,
	waiters: DashMap<Arc<str>, Arc<Notify>>,
}

impl ObjectStore {
	pub(crate) fn new() -> Self {
		Self {
			nodes: Mutex::new(HashMap::new()),
			retired: Mutex::new(Retired::default()),
			waiters: DashMap::new(),
		}
	}

	/// Registers a node with no parent (the implicit root).
	pub(crate) fn insert_root(&self, object: Arc<dyn ChannelOwner>) {
		let guid: Arc<str> = Arc::from(object.guid());
		self.nodes.lock().insert(
			guid,
			Node {
				object,
				parent: None,
				children: Vec::new(),
			},
		);
	}

	/// Registers `object` as the last child of `parent`.
	pub(crate) fn insert(&self, parent: &str, object: Arc<dyn ChannelOwner>) -> Result<()> {
		let guid: Arc<str> = Arc::from(object.guid());
		{
			let mut nodes = self.nodes.lock();
			if nodes.contains_key(&guid) || self.retired.lock().contains(&guid) {
				return Err(Error::ProtocolIntegrity(format!(
					"Duplicate object guid {guid}"
				)));
			}
			let Some(parent_key) = nodes.get_key_value(parent).map(|(k, _)| Arc::clone(k)) else {
				return Err(Error::ProtocolIntegrity(format!(
					"Cannot find parent object {parent} to create {guid}"
				)));
			};
			if let Some(parent_node) = nodes.get_mut(&parent_key) {
				parent_node.children.push(Arc::clone(&guid));
			}
			nodes.insert(
				Arc::clone(&guid),
				Node {
					object,
					parent: Some(parent_key),
					children: Vec::new(),
				},
			);
		}
		if let Some((_, notify)) = self.waiters.remove(&guid) {
			notify.notify_waiters();
		}
		Ok(())
	}

	pub fn get(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
		self.nodes.lock().get(guid).map(|node| Arc::clone(&node.object))
	}

	pub fn contains(&self, guid: &str) -> bool {
		self.nodes.lock().contains_key(guid)
	}

	pub fn len(&self) -> usize {
		self.nodes.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.lock().is_empty()
	}

	pub fn object_type(&self, guid: &str) -> Option<String> {
		self.nodes
			.lock()
			.get(guid)
			.map(|node| node.object.type_name().to_string())
	}

	pub fn parent_of(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
		let nodes = self.nodes.lock();
		let parent = nodes.get(guid)?.parent.as_ref()?;
		nodes.get(parent).map(|node| Arc::clone(&node.object))
	}

	/// Children of `guid` in creation order.
	pub fn children_of(&self, guid: &str) -> Vec<Arc<dyn ChannelOwner>> {
		let nodes = self.nodes.lock();
		let Some(node) = nodes.get(guid) else {
			return Vec::new();
		};
		node.children
			.iter()
			.filter_map(|child| nodes.get(child).map(|n| Arc::clone(&n.object)))
			.collect()
	}

	/// Moves `child` under `new_parent`.
	pub(crate) fn adopt(&self, new_parent: &str, child: &str) -> Result<()> {
		let mut nodes = self.nodes.lock();
		let Some(parent_key) = nodes.get_key_value(new_parent).map(|(k, _)| Arc::clone(k)) else {
			return Err(Error::ProtocolIntegrity(format!(
				"Cannot find parent object {new_parent} to adopt {child}"
			)));
		};
		let Some(child_key) = nodes.get_key_value(child).map(|(k, _)| Arc::clone(k)) else {
			return Err(Error::ProtocolIntegrity(format!(
				"Cannot find object {child} to adopt into {new_parent}"
			)));
		};

		let mut ancestor = Some(Arc::clone(&parent_key));
		while let Some(guid) = ancestor {
			if guid == child_key {
				return Err(Error::ProtocolIntegrity(format!(
					"Adopting {child} into {new_parent} would create a cycle"
				)));
			}
			ancestor = nodes.get(&guid).and_then(|node| node.parent.clone());
		}

		let old_parent = nodes
			.get_mut(&child_key)
			.and_then(|node| node.parent.replace(Arc::clone(&parent_key)));
		if let Some(old) = old_parent.and_then(|old| nodes.get_mut(&old)) {
			old.children.retain(|guid| *guid != child_key);
		}
		if let Some(parent) = nodes.get_mut(&parent_key) {
			parent.children.push(child_key);
		}
		Ok(())
	}

	/// Removes `guid` and all its descendants, returning them root first.
	pub(crate) fn remove_subtree(&self, guid: &str) -> Vec<Arc<dyn ChannelOwner>> {
		let mut nodes = self.nodes.lock();
		let Some(root) = nodes.remove(guid) else {
			return Vec::new();
		};
		if let Some(parent) = root.parent.as_ref().and_then(|p| nodes.get_mut(p)) {
			parent.children.retain(|child| child.as_ref() != guid);
		}

		let mut retired = self.retired.lock();
		retired.insert(Arc::from(guid));
		let mut removed = vec![Arc::clone(&root.object)];
		let mut pending = root.children;
		while let Some(next) = pending.pop() {
			if let Some(node) = nodes.remove(&next) {
				removed.push(node.object);
				pending.extend(node.children);
				retired.insert(next);
			}
		}
		removed
	}

	/// Whether `guid` belonged to a recently disposed object.
	pub fn was_retired(&self, guid: &str) -> bool {
		self.retired.lock().contains(guid)
	}

	/// Number of disposed guids currently remembered.
	pub fn retired_len(&self) -> usize {
		self.retired.lock().len()
	}

	/// Number of guids with a pending [`ObjectStore::wait_for`].
	pub fn waiter_len(&self) -> usize {
		self.waiters.len()
	}

	/// Drops the waiter entry for `guid` unless another task still holds it.
	fn release_waiter(&self, guid: &str) {
		self.waiters
			.remove_if(guid, |_, notify| Arc::strong_count(notify) <= 2);
	}

	/// Empties the registry, returning every object it held.
	pub(crate) fn drain(&self) -> Vec<Arc<dyn ChannelOwner>> {
		self.nodes
			.lock()
			.drain()
			.map(|(_, node)| node.object)
			.collect()
	}

	/// Waits for an object to be registered. A zero timeout waits forever.
	///
	/// Registers waiter before checking to prevent lost wakeups.
	pub async fn wait_for(&self, guid: &str, timeout: Duration) -> Result<Arc<dyn ChannelOwner>> {
		let g: Arc<str> = Arc::from(guid);
		let deadline = (!timeout.is_zero()).then(|| tokio::time::Instant::now() + timeout);

		loop {
			let notify = self
				.waiters
				.entry(Arc::clone(&g))
				.or_insert_with(|| Arc::new(Notify::new()))
				.clone();
			let notified = notify.notified();

			if let Some(obj) = self.get(&g) {
				drop(notified);
				self.release_waiter(&g);
				return Ok(obj);
			}

			match deadline {
				None => notified.await,
				Some(deadline) => {
					tokio::select! {
						biased;
						_ = notified => {}
						_ = tokio::time::sleep_until(deadline) => {
							self.release_waiter(&g);
							return Err(Error::Timeout(format!("Timeout waiting for object: {g}")));
						}
					}
				}
			}
		}
	}
}
