//! ChannelOwner - Base trait for all protocol objects.
//!
//! All remote objects implement ChannelOwner to:
//! - Represent remote objects on the driver via GUID
//! - Participate in parent-child lifecycle management
//! - Handle protocol events and fan them out to local listeners
//! - Communicate via Channel proxy
//!
//! Tree links live in the connection's object store; the methods here read and
//! mutate them through the connection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use downcast_rs::{DowncastSync, impl_downcast};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};

use crate::api_call::ApiZone;
use crate::channel::{Channel, ObjectState};
use crate::connection::Connection;
use crate::error::Result;
use crate::subscription::SubscriptionChange;

/// Private module for the sealed trait pattern.
pub mod private {
	/// Marker trait that seals `ChannelOwner`.
	pub trait Sealed {}
}

/// Local event emitted on every live object when the connection closes.
pub const CLOSED_EVENT: &str = "closed";

/// Local event emitted on each object of a disposed subtree, with `{reason}`.
pub const DISPOSE_EVENT: &str = "dispose";

/// Reason why an object was disposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisposeReason {
	/// Object was explicitly closed.
	Closed,
	/// Object was garbage collected by the driver.
	GarbageCollected,
	Other(String),
}

impl DisposeReason {
	/// Maps the optional `reason` of a `__dispose__` event.
	pub fn from_wire(reason: Option<&str>) -> Self {
		match reason {
			None => Self::Closed,
			Some("gc") => Self::GarbageCollected,
			Some(other) => Self::Other(other.to_string()),
		}
	}

	/// The `reason` as it appears on the wire.
	pub fn as_wire(&self) -> Option<&str> {
		match self {
			Self::Closed => None,
			Self::GarbageCollected => Some("gc"),
			Self::Other(reason) => Some(reason.as_str()),
		}
	}
}

/// Parent can be either another ChannelOwner or the root Connection.
pub enum ParentOrConnection {
	Parent(Arc<dyn ChannelOwner>),
	Connection(Arc<Connection>),
}

/// Callback registered for one local event.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Base trait for all protocol objects.
///
/// This trait is sealed: implementors also implement [`private::Sealed`].
pub trait ChannelOwner: private::Sealed + DowncastSync {
	/// Returns the embedded base implementation.
	fn base(&self) -> &ChannelOwnerImpl;

	/// Handles a protocol event sent to this object, before local listeners run.
	fn on_event(&self, _method: &str, _params: &Value) {}

	/// Called once when this object leaves the registry.
	fn on_dispose(&self, _reason: &DisposeReason) {}

	/// Returns the unique GUID for this object.
	fn guid(&self) -> &str {
		self.base().guid()
	}

	/// Returns the protocol type name (e.g., "Session").
	fn type_name(&self) -> &str {
		self.base().type_name()
	}

	/// Returns the raw initializer JSON from the driver.
	fn initializer(&self) -> &Value {
		self.base().initializer()
	}

	/// Returns the channel for RPC communication.
	fn channel(&self) -> &Channel {
		self.base().channel()
	}

	fn connection(&self) -> &Arc<Connection> {
		self.base().connection()
	}

	fn parent(&self) -> Option<Arc<dyn ChannelOwner>> {
		self.base().parent()
	}

	fn children(&self) -> Vec<Arc<dyn ChannelOwner>> {
		self.base().children()
	}

	fn is_disposed(&self) -> bool {
		self.base().is_disposed()
	}

	/// Returns true if this object was garbage collected.
	fn was_collected(&self) -> bool {
		self.base().was_collected()
	}
}

impl_downcast!(sync ChannelOwner);

/// Base implementation of ChannelOwner that is embedded in protocol objects.
pub struct ChannelOwnerImpl {
	guid: Arc<str>,
	type_name: Arc<str>,
	connection: Arc<Connection>,
	channel: Channel,
	initializer: Value,
	state: Arc<ObjectState>,
	events: Arc<EventHub>,
}

impl ChannelOwnerImpl {
	/// Creates a new ChannelOwner base implementation.
	///
	/// The object is not registered until the connection finishes handling
	/// its `__create__` event.
	pub fn new(
		parent: ParentOrConnection,
		type_name: &str,
		guid: Arc<str>,
		initializer: Value,
	) -> Self {
		let connection = match parent {
			ParentOrConnection::Parent(p) => Arc::clone(p.connection()),
			ParentOrConnection::Connection(c) => c,
		};
		let type_name: Arc<str> = Arc::from(type_name);
		let state = Arc::new(ObjectState::default());
		let channel = Channel::new(
			Arc::clone(&guid),
			Arc::clone(&type_name),
			Arc::clone(&connection),
			Arc::clone(&state),
		);
		let events = Arc::new(EventHub {
			channel: channel.clone(),
			subscriptions: RwLock::new(HashMap::new()),
			listeners: Mutex::new(HashMap::new()),
			next_id: AtomicU64::new(1),
		});

		Self {
			guid,
			type_name,
			connection,
			channel,
			initializer,
			state,
			events,
		}
	}

	/// Declares which local events are backed by a driver-side subscription.
	///
	/// Each pair maps a local event name to the name sent in
	/// `updateSubscription`.
	pub fn with_event_subscriptions(self, mapping: &[(&str, &str)]) -> Self {
		self.events.subscriptions.write().extend(
			mapping
				.iter()
				.map(|(local, wire)| (local.to_string(), wire.to_string())),
		);
		self
	}

	pub fn guid(&self) -> &str {
		&self.guid
	}

	pub fn type_name(&self) -> &str {
		&self.type_name
	}

	pub fn initializer(&self) -> &Value {
		&self.initializer
	}

	pub fn channel(&self) -> &Channel {
		&self.channel
	}

	pub fn connection(&self) -> &Arc<Connection> {
		&self.connection
	}

	pub fn parent(&self) -> Option<Arc<dyn ChannelOwner>> {
		self.connection.objects().parent_of(&self.guid)
	}

	pub fn children(&self) -> Vec<Arc<dyn ChannelOwner>> {
		self.connection.objects().children_of(&self.guid)
	}

	/// Moves `child` from its current parent to this object.
	pub fn adopt(&self, child: &dyn ChannelOwner) -> Result<()> {
		self.connection.adopt_object(&self.guid, child.guid())
	}

	/// Disposes this object and all its descendants. Safe to repeat.
	pub fn dispose(&self, reason: DisposeReason) {
		self.connection.dispose_object(&self.guid, reason);
	}

	/// Registers a listener for a local event.
	///
	/// The first listener of an event with a driver-side subscription sends
	/// `updateSubscription {enabled: true}`; dropping the last one sends
	/// `{enabled: false}`.
	pub fn add_listener<F>(&self, event: &str, listener: F) -> Subscription
	where
		F: Fn(&Value) + Send + Sync + 'static,
	{
		self.events.add(event, Arc::new(listener))
	}

	pub fn listener_count(&self, event: &str) -> usize {
		self.events.listeners.lock().get(event).map_or(0, Vec::len)
	}

	/// Invokes every listener of `event` with `params`.
	pub fn emit(&self, event: &str, params: &Value) {
		self.events.emit(event, params);
	}

	/// Runs `operation` as one API call attributed to the caller's location.
	#[track_caller]
	pub fn wrap_api_call<T, F, Fut>(
		&self,
		api_name: &str,
		is_internal: bool,
		operation: F,
	) -> impl Future<Output = Result<T>> + Send
	where
		T: Send,
		F: FnOnce(Arc<ApiZone>) -> Fut + Send,
		Fut: Future<Output = Result<T>> + Send,
	{
		self.connection.wrap_api_call(api_name, is_internal, operation)
	}

	pub fn is_disposed(&self) -> bool {
		self.state.is_disposed()
	}

	pub fn was_collected(&self) -> bool {
		self.state.was_collected()
	}

	pub(crate) fn mark_disposed(&self, reason: &DisposeReason) {
		self.state
			.mark_disposed(*reason == DisposeReason::GarbageCollected);
		self.events.listeners.lock().clear();
	}
}

struct EventHub {
	channel: Channel,
	subscriptions: RwLock<HashMap<String, String>>,
	listeners: Mutex<HashMap<String, Vec<(u64, Listener)>>>,
	next_id: AtomicU64,
}

impl EventHub {
	fn add(self: &Arc<Self>, event: &str, listener: Listener) -> Subscription {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.listeners
			.lock()
			.entry(event.to_string())
			.or_default()
			.push((id, listener));

		let change = self
			.channel
			.connection()
			.subscriptions()
			.acquire(self.channel.guid_arc(), event);
		if change == SubscriptionChange::Subscribe {
			self.update_subscription(event, true);
		}

		Subscription {
			hub: Arc::downgrade(self),
			event: event.to_string(),
			id,
		}
	}

	fn remove(&self, event: &str, id: u64) {
		let removed = {
			let mut listeners = self.listeners.lock();
			let Some(list) = listeners.get_mut(event) else {
				return;
			};
			let before = list.len();
			list.retain(|(existing, _)| *existing != id);
			let removed = list.len() != before;
			if list.is_empty() {
				listeners.remove(event);
			}
			removed
		};
		if !removed {
			return;
		}

		let change = self
			.channel
			.connection()
			.subscriptions()
			.release(self.channel.guid_arc(), event);
		if change == SubscriptionChange::Unsubscribe {
			self.update_subscription(event, false);
		}
	}

	fn update_subscription(&self, event: &str, enabled: bool) {
		let Some(wire_event) = self.subscriptions.read().get(event).cloned() else {
			return;
		};
		if self.channel.state().is_disposed() {
			return;
		}
		let params = json!({ "event": wire_event, "enabled": enabled });
		if let Err(err) = self.channel.send_no_reply("updateSubscription", params) {
			tracing::debug!(
				guid = self.channel.guid(),
				event,
				"updateSubscription not sent: {err}"
			);
		}
	}

	fn emit(&self, event: &str, params: &Value) {
		let listeners: Vec<Listener> = match self.listeners.lock().get(event) {
			Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
			None => return,
		};
		for listener in listeners {
			listener(params);
		}
	}
}

/// Handle to a registered listener; dropping it removes the listener.
#[must_use = "dropping a Subscription removes its listener"]
pub struct Subscription {
	hub: Weak<EventHub>,
	event: String,
	id: u64,
}

impl Subscription {
	pub fn event(&self) -> &str {
		&self.event
	}

	/// Keeps the listener registered for the rest of the object's life.
	pub fn detach(mut self) {
		self.hub = Weak::new();
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(hub) = self.hub.upgrade() {
			hub.remove(&self.event, self.id);
		}
	}
}
