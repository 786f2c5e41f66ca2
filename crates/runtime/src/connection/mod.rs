//! Connection - correlates calls with results and owns the object registry.
//!
//! Outbound calls are serialized into the connection's outbound channel and
//! their pending entries wait for a result with the same id. Inbound messages
//! go through [`Connection::dispatch`], which settles pending calls, applies
//! the `__create__`/`__adopt__`/`__dispose__` lifecycle events to the object
//! forest and forwards every other event to its target object.
//!
//! The pending-call table and the closed flag live under one lock, so a call
//! is either queued before teardown and rejected by it, or refused outright.

use std::collections::HashMap;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use pw_wire::{
	ADOPT, AdoptParams, CREATE, CreateParams, DISPOSE, DisposeParams, ErrorPayload, Event, Message,
	Metadata, Request, Response,
};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};

use crate::api_call::{self, ApiZone};
use crate::channel::{Channel, ResponseFuture};
use crate::channel_owner::{
	CLOSED_EVENT, ChannelOwner, DISPOSE_EVENT, DisposeReason, ParentOrConnection,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::factory::{BuiltinFactory, ObjectFactory};
use crate::instrumentation::{Instrumentation, LoggingListener};
use crate::root::{ROOT_GUID, Root};
use crate::subscription::SubscriptionManager;
use crate::validation::{Direction, SchemaRegistry, SchemaValidator, ValidationContext};
use crate::zone::ZoneManager;

mod object_store;

pub use object_store::ObjectStore;

/// Construction parameters for a [`Connection`].
pub struct ConnectionOptions {
	pub schema: Arc<dyn SchemaValidator>,
	pub factory: Arc<dyn ObjectFactory>,
	/// Whether the driver runs on another machine.
	pub remote: bool,
	pub sdk_language: String,
	/// Installs a [`LoggingListener`].
	pub log_api_calls: bool,
}

impl Default for ConnectionOptions {
	fn default() -> Self {
		Self {
			schema: Arc::new(SchemaRegistry::permissive()),
			factory: Arc::new(BuiltinFactory),
			remote: false,
			sdk_language: "rust".to_string(),
			log_api_calls: true,
		}
	}
}

impl ConnectionOptions {
	pub fn from_config(config: &EngineConfig) -> Self {
		Self {
			remote: config.remote,
			sdk_language: config.sdk_language.clone(),
			..Self::default()
		}
	}

	pub fn with_schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
		self.schema = schema;
		self
	}

	pub fn with_factory(mut self, factory: Arc<dyn ObjectFactory>) -> Self {
		self.factory = factory;
		self
	}
}

type CloseListener = Box<dyn FnOnce(Option<&str>) + Send>;

struct PendingCall {
	tx: oneshot::Sender<Result<Value>>,
	type_name: String,
	method: String,
}

struct ClosedState {
	reason: Option<String>,
}

#[derive(Default)]
struct CallTable {
	last_id: u32,
	pending: HashMap<u32, PendingCall>,
	closed: Option<ClosedState>,
}

/// Client side of one driver connection.
pub struct Connection {
	calls: Mutex<CallTable>,
	outbound: mpsc::UnboundedSender<Value>,
	objects: ObjectStore,
	factory: RwLock<Arc<dyn ObjectFactory>>,
	schema: Arc<dyn SchemaValidator>,
	zones: ZoneManager,
	instrumentation: Instrumentation,
	subscriptions: SubscriptionManager,
	closed_tx: watch::Sender<bool>,
	close_listeners: Mutex<Vec<CloseListener>>,
	tracing_count: AtomicUsize,
	remote: bool,
	sdk_language: String,
}

impl Connection {
	/// Creates a connection and the receiver of its serialized outbound calls.
	///
	/// The registry starts with the implicit root object.
	pub fn new(options: ConnectionOptions) -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
		let (outbound, outbound_rx) = mpsc::unbounded_channel();
		let (closed_tx, _) = watch::channel(false);
		let instrumentation = Instrumentation::default();
		if options.log_api_calls {
			instrumentation.add_listener(Arc::new(LoggingListener));
		}

		let connection = Arc::new(Self {
			calls: Mutex::new(CallTable::default()),
			outbound,
			objects: ObjectStore::new(),
			factory: RwLock::new(options.factory),
			schema: options.schema,
			zones: ZoneManager::new(),
			instrumentation,
			subscriptions: SubscriptionManager::default(),
			closed_tx,
			close_listeners: Mutex::new(Vec::new()),
			tracing_count: AtomicUsize::new(0),
			remote: options.remote,
			sdk_language: options.sdk_language,
		});
		let root: Arc<dyn ChannelOwner> = Arc::new(Root::new(Arc::clone(&connection)));
		connection.objects.insert_root(root);
		(connection, outbound_rx)
	}

	/// Queues a call on behalf of `channel`'s object.
	///
	/// Fails without touching the wire when the connection is closed or the
	/// object is disposed. The returned future settles exactly once, with the
	/// validated result, the driver's error, or the teardown error.
	pub fn send_message(
		&self,
		channel: &Channel,
		method: &str,
		params: Value,
		zone: Option<&ApiZone>,
	) -> Result<ResponseFuture> {
		let (tx, rx) = oneshot::channel();
		let id = {
			let mut calls = self.calls.lock();
			if let Some(closed) = &calls.closed {
				return Err(Error::Closed {
					reason: closed.reason.clone(),
				});
			}
			let state = channel.state();
			if state.is_disposed() {
				return Err(Error::UseAfterDispose {
					guid: channel.guid().to_string(),
					collected: state.was_collected(),
				});
			}

			let id = calls.last_id + 1;
			let request = Request {
				id,
				guid: Arc::clone(channel.guid_arc()),
				method: method.to_string(),
				params,
				metadata: zone.map_or_else(Metadata::internal, ApiZone::next_metadata),
			};
			let request = serde_json::to_value(&request)?;
			if self.outbound.send(request).is_err() {
				tracing::error!("Failed to queue message: outbound channel closed");
				return Err(Error::Closed {
					reason: Some("Transport is gone".to_string()),
				});
			}
			calls.last_id = id;
			calls.pending.insert(
				id,
				PendingCall {
					tx,
					type_name: channel.type_name().to_string(),
					method: method.to_string(),
				},
			);
			id
		};

		tracing::debug!(id, guid = channel.guid(), method, "Sending message");
		if let Some(zone) = zone.filter(|zone| !zone.frames().is_empty()) {
			if self.is_tracing() {
				self.instrumentation.call_stack(id, zone.frames());
			}
		}
		Ok(ResponseFuture::new(rx))
	}

	/// Handles one inbound message. A no-op once the connection is closed.
	///
	/// Errors are fatal for the connection: the caller is expected to close it.
	pub async fn dispatch(self: &Arc<Self>, message: Value) -> Result<()> {
		if self.is_closed() {
			return Ok(());
		}
		let message: Message = serde_json::from_value(message)?;
		self.dispatch_message(message).await
	}

	pub async fn dispatch_message(self: &Arc<Self>, message: Message) -> Result<()> {
		if self.is_closed() {
			return Ok(());
		}
		match message {
			Message::Response(response) => self.handle_response(response),
			Message::Event(event) => match event.method.as_str() {
				CREATE => self.handle_create(event).await,
				ADOPT => self.handle_adopt(event),
				DISPOSE => self.handle_dispose(event),
				_ => self.handle_event(event),
			},
			Message::Unknown(value) => Err(Error::ProtocolIntegrity(format!(
				"Unrecognized message: {value}"
			))),
		}
	}

	fn handle_response(&self, response: Response) -> Result<()> {
		tracing::debug!("Processing response for ID: {}", response.id);
		let Some(call) = self.calls.lock().pending.remove(&response.id) else {
			return Err(Error::ProtocolIntegrity(format!(
				"Cannot find command to respond: {}",
				response.id
			)));
		};

		if let Some(error) = response.error {
			let error = remote_error(error.into_payload(), response.log.unwrap_or_default());
			let _ = call.tx.send(Err(error));
			return Ok(());
		}

		let result = response.result.unwrap_or(Value::Null);
		match self.validate(&call.type_name, &call.method, Direction::Result, result) {
			Ok(result) => {
				let _ = call.tx.send(Ok(result));
				Ok(())
			}
			Err(Error::ProtocolIntegrity(message)) => {
				let _ = call.tx.send(Err(Error::ProtocolIntegrity(message.clone())));
				Err(Error::ProtocolIntegrity(message))
			}
			Err(err) => {
				let _ = call.tx.send(Err(err));
				Ok(())
			}
		}
	}

	async fn handle_create(self: &Arc<Self>, event: Event) -> Result<()> {
		let params: CreateParams = serde_json::from_value(event.params)
			.map_err(|e| Error::ProtocolIntegrity(format!("Malformed {CREATE}: {e}")))?;
		let Some(parent) = self.objects.get(&event.guid) else {
			return Err(Error::ProtocolIntegrity(format!(
				"Cannot find parent object {} to create {}",
				event.guid, params.guid
			)));
		};
		if self.objects.contains(&params.guid) || self.objects.was_retired(&params.guid) {
			return Err(Error::ProtocolIntegrity(format!(
				"Duplicate object guid {}",
				params.guid
			)));
		}

		let initializer = self.validate(
			&params.type_name,
			"",
			Direction::Initializer,
			params.initializer,
		)?;
		let factory = Arc::clone(&*self.factory.read());
		let object = factory
			.create_object(
				ParentOrConnection::Parent(parent),
				params.type_name.clone(),
				Arc::from(params.guid.as_str()),
				initializer,
			)
			.await?;
		self.objects.insert(&event.guid, object)?;

		tracing::debug!(
			"Created object: type={}, guid={}, parent={}",
			params.type_name,
			params.guid,
			event.guid
		);
		Ok(())
	}

	fn handle_adopt(&self, event: Event) -> Result<()> {
		let params: AdoptParams = serde_json::from_value(event.params)
			.map_err(|e| Error::ProtocolIntegrity(format!("Malformed {ADOPT}: {e}")))?;
		self.adopt_object(&event.guid, &params.guid)?;
		tracing::debug!(
			"Adopted object: child={}, new_parent={}",
			params.guid,
			event.guid
		);
		Ok(())
	}

	fn handle_dispose(&self, event: Event) -> Result<()> {
		let params: DisposeParams = match event.params {
			Value::Null => DisposeParams::default(),
			params => serde_json::from_value(params)
				.map_err(|e| Error::ProtocolIntegrity(format!("Malformed {DISPOSE}: {e}")))?,
		};
		if !self.objects.contains(&event.guid) {
			if self.objects.was_retired(&event.guid) {
				tracing::warn!("Dispose for already disposed object: guid={}", event.guid);
				return Ok(());
			}
			return Err(Error::ProtocolIntegrity(format!(
				"Cannot find object to dispose: {}",
				event.guid
			)));
		}
		self.dispose_object(
			&event.guid,
			DisposeReason::from_wire(params.reason.as_deref()),
		);
		tracing::debug!("Disposed object: guid={}", event.guid);
		Ok(())
	}

	fn handle_event(&self, event: Event) -> Result<()> {
		let Some(object) = self.objects.get(&event.guid) else {
			if self.objects.was_retired(&event.guid) {
				tracing::warn!(
					"Discarding event {} for disposed object: guid={}",
					event.method,
					event.guid
				);
				return Ok(());
			}
			return Err(Error::ProtocolIntegrity(format!(
				"Cannot find object to emit \"{}\": {}",
				event.method, event.guid
			)));
		};

		let params = self.validate(
			object.type_name(),
			&event.method,
			Direction::Event,
			event.params,
		)?;
		object.on_event(&event.method, &params);
		object.base().emit(&event.method, &params);
		Ok(())
	}

	/// Tears the connection down. Only the first call has any effect.
	///
	/// Rejects every pending call, notifies close listeners, emits
	/// [`CLOSED_EVENT`] on every live object and empties the registry.
	pub fn close(&self, reason: Option<&str>) {
		let pending = {
			let mut calls = self.calls.lock();
			if calls.closed.is_some() {
				return;
			}
			calls.closed = Some(ClosedState {
				reason: reason.map(str::to_string),
			});
			std::mem::take(&mut calls.pending)
		};
		tracing::debug!(reason, pending = pending.len(), "Closing connection");

		for (_, call) in pending {
			let _ = call.tx.send(Err(Error::Closed {
				reason: reason.map(str::to_string),
			}));
		}
		self.closed_tx.send_replace(true);

		let listeners = std::mem::take(&mut *self.close_listeners.lock());
		for listener in listeners {
			listener(reason);
		}

		let params = json!({ "reason": reason });
		for object in self.objects.drain() {
			object.base().emit(CLOSED_EVENT, &params);
			object.base().mark_disposed(&DisposeReason::Closed);
		}
	}

	pub fn is_closed(&self) -> bool {
		self.calls.lock().closed.is_some()
	}

	/// Teardown reason, if closed with one.
	pub fn close_reason(&self) -> Option<String> {
		self.calls
			.lock()
			.closed
			.as_ref()
			.and_then(|closed| closed.reason.clone())
	}

	/// Runs `listener` once on teardown; immediately if already closed.
	pub fn on_close<F>(&self, listener: F)
	where
		F: FnOnce(Option<&str>) + Send + 'static,
	{
		{
			let calls = self.calls.lock();
			if calls.closed.is_none() {
				self.close_listeners.lock().push(Box::new(listener));
				return;
			}
		}
		listener(self.close_reason().as_deref());
	}

	/// Resolves once the connection is closed.
	pub async fn closed(&self) {
		let mut rx = self.closed_tx.subscribe();
		let _ = rx.wait_for(|closed| *closed).await;
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
		api_call::wrap_api_call(
			&self.zones,
			&self.instrumentation,
			api_name,
			Location::caller(),
			is_internal,
			operation,
		)
	}

	/// Runs the `(type, method, direction)` validator over `value`.
	pub fn validate(
		&self,
		type_name: &str,
		method: &str,
		direction: Direction,
		value: Value,
	) -> Result<Value> {
		let Some(validator) = self.schema.find(type_name, method, direction) else {
			return Err(Error::ProtocolIntegrity(format!(
				"No {direction:?} validator for {type_name}.{method}"
			)));
		};
		let ctx = ValidationContext::new(&self.objects, self.remote);
		Ok(validator(value, &ctx)?)
	}

	pub fn objects(&self) -> &ObjectStore {
		&self.objects
	}

	/// Synchronous registry lookup.
	pub fn get_object(&self, guid: &str) -> Result<Arc<dyn ChannelOwner>> {
		self.objects
			.get(guid)
			.ok_or_else(|| Error::ObjectNotFound(guid.to_string()))
	}

	/// Looks up `guid` and downcasts it to a concrete wrapper.
	pub fn get_typed<T: ChannelOwner>(&self, guid: &str) -> Result<Arc<T>> {
		self.get_object(guid)?.downcast_arc::<T>().map_err(|object| {
			Error::ProtocolIntegrity(format!(
				"Object {guid} has unexpected type {}",
				object.type_name()
			))
		})
	}

	/// Waits for an object whose `__create__` may arrive after the result
	/// that references it. A zero timeout waits forever.
	pub async fn wait_for_object(
		&self,
		guid: &str,
		timeout: Duration,
	) -> Result<Arc<dyn ChannelOwner>> {
		self.objects.wait_for(guid, timeout).await
	}

	/// The implicit root object, until the connection closes.
	pub fn root(&self) -> Result<Arc<Root>> {
		self.get_typed::<Root>(ROOT_GUID)
	}

	pub fn adopt_object(&self, parent: &str, child: &str) -> Result<()> {
		self.objects.adopt(parent, child)
	}

	/// Removes `guid` and its subtree from the registry. Safe to repeat.
	///
	/// Each removed object emits [`DISPOSE_EVENT`] to its listeners before
	/// they are dropped, then runs its `on_dispose` hook.
	pub fn dispose_object(&self, guid: &str, reason: DisposeReason) {
		if guid == ROOT_GUID {
			return;
		}
		let params = json!({ "reason": reason.as_wire() });
		for object in self.objects.remove_subtree(guid) {
			object.base().emit(DISPOSE_EVENT, &params);
			object.base().mark_disposed(&reason);
			self.subscriptions.forget(object.guid());
			object.on_dispose(&reason);
		}
	}

	/// Replaces the factory used for subsequent `__create__` events.
	pub fn set_factory(&self, factory: Arc<dyn ObjectFactory>) {
		*self.factory.write() = factory;
	}

	/// Counts tracing sessions; call stacks are reported while any is open.
	pub fn set_is_tracing(&self, tracing: bool) {
		if tracing {
			self.tracing_count.fetch_add(1, Ordering::SeqCst);
		} else {
			let _ = self
				.tracing_count
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
					count.checked_sub(1)
				});
		}
	}

	pub fn is_tracing(&self) -> bool {
		self.tracing_count.load(Ordering::SeqCst) > 0
	}

	pub fn is_remote(&self) -> bool {
		self.remote
	}

	pub fn sdk_language(&self) -> &str {
		&self.sdk_language
	}

	pub fn zones(&self) -> &ZoneManager {
		&self.zones
	}

	pub fn instrumentation(&self) -> &Instrumentation {
		&self.instrumentation
	}

	pub fn schema(&self) -> &dyn SchemaValidator {
		self.schema.as_ref()
	}

	pub fn subscriptions(&self) -> &SubscriptionManager {
		&self.subscriptions
	}

	/// Number of calls still awaiting a result.
	pub fn pending_calls(&self) -> usize {
		self.calls.lock().pending.len()
	}
}

/// Converts [`ErrorPayload`] from the driver into [`Error::Remote`].
fn remote_error(error: ErrorPayload, log: Vec<String>) -> Error {
	let mut message = error.message;
	if !log.is_empty() {
		message.push_str("\nCall log:");
		for line in &log {
			message.push_str("\n  - ");
			message.push_str(line);
		}
	}
	Error::Remote {
		name: error.name.unwrap_or_else(|| "Error".to_string()),
		message,
		stack: error.stack,
		log,
	}
}
