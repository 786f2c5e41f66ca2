//! Channel - RPC communication proxy for ChannelOwner objects.
//!
//! The Channel sends method calls to the driver on behalf of one object. Every
//! call runs inside an api zone and its params are validated before anything
//! is queued on the wire.

use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::api_call;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::validation::Direction;

/// Liveness flags shared by an object and its channel.
#[derive(Debug, Default)]
pub(crate) struct ObjectState {
	disposed: AtomicBool,
	collected: AtomicBool,
}

impl ObjectState {
	pub(crate) fn mark_disposed(&self, collected: bool) {
		if collected {
			self.collected.store(true, Ordering::SeqCst);
		}
		self.disposed.store(true, Ordering::SeqCst);
	}

	pub(crate) fn is_disposed(&self) -> bool {
		self.disposed.load(Ordering::SeqCst)
	}

	pub(crate) fn was_collected(&self) -> bool {
		self.collected.load(Ordering::SeqCst)
	}
}

/// Channel provides RPC communication for a ChannelOwner.
#[derive(Clone)]
pub struct Channel {
	guid: Arc<str>,
	type_name: Arc<str>,
	connection: Arc<Connection>,
	state: Arc<ObjectState>,
}

impl Channel {
	pub(crate) fn new(
		guid: Arc<str>,
		type_name: Arc<str>,
		connection: Arc<Connection>,
		state: Arc<ObjectState>,
	) -> Self {
		Self {
			guid,
			type_name,
			connection,
			state,
		}
	}

	/// Sends a method call to the driver and awaits the response.
	///
	/// Reported to instrumentation as `type.method` unless the schema marks
	/// the method internal or an api call is already in progress.
	#[track_caller]
	pub fn send<P, R>(&self, method: &str, params: P) -> impl Future<Output = Result<R>> + Send
	where
		P: Serialize,
		R: DeserializeOwned + Send,
	{
		let location = Location::caller();
		let params = serde_json::to_value(params);
		async move {
			let params = params?;
			let connection = &self.connection;
			let internal = connection.schema().is_internal(&self.type_name, method);
			let api_name = format!("{}.{method}", lower_first(&self.type_name));
			api_call::wrap_api_call(
				connection.zones(),
				connection.instrumentation(),
				&api_name,
				location,
				internal,
				|zone| async move {
					let params =
						connection.validate(&self.type_name, method, Direction::Params, params)?;
					let result = connection
						.send_message(self, method, params, Some(zone.as_ref()))?
						.await?;
					serde_json::from_value(result).map_err(Error::from)
				},
			)
			.await
		}
	}

	/// Sends a method call with no parameters.
	#[track_caller]
	pub fn send_no_params<R>(&self, method: &str) -> impl Future<Output = Result<R>> + Send
	where
		R: DeserializeOwned + Send,
	{
		self.send(method, Value::Null)
	}

	/// Sends a method call that returns no result (void).
	#[track_caller]
	pub fn send_no_result<P: Serialize>(
		&self,
		method: &str,
		params: P,
	) -> impl Future<Output = Result<()>> + Send {
		let call = self.send::<P, Value>(method, params);
		async move {
			call.await?;
			Ok(())
		}
	}

	/// Queues an internal call without waiting for its response.
	///
	/// The response is still consumed by the dispatcher and discarded.
	pub fn send_no_reply<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
		let params = serde_json::to_value(params)?;
		let params = self
			.connection
			.validate(&self.type_name, method, Direction::Params, params)?;
		drop(self.connection.send_message(self, method, params, None)?);
		Ok(())
	}

	/// Returns the GUID this channel represents.
	pub fn guid(&self) -> &str {
		&self.guid
	}

	pub fn type_name(&self) -> &str {
		&self.type_name
	}

	pub(crate) fn connection(&self) -> &Arc<Connection> {
		&self.connection
	}

	pub(crate) fn guid_arc(&self) -> &Arc<str> {
		&self.guid
	}

	pub(crate) fn state(&self) -> &ObjectState {
		&self.state
	}
}

/// Settles once with the outcome of one wire call.
///
/// Dropping it leaves the pending entry in place; the late response is then
/// consumed and discarded.
pub struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
}

impl ResponseFuture {
	pub(crate) fn new(rx: oneshot::Receiver<Result<Value>>) -> Self {
		Self { rx }
	}
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.rx)
			.poll(cx)
			.map(|settled| settled.unwrap_or(Err(Error::Closed { reason: None })))
	}
}

fn lower_first(type_name: &str) -> String {
	let mut chars = type_name.chars();
	match chars.next() {
		Some(first) => first.to_lowercase().chain(chars).collect(),
		None => String::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::lower_first;

	#[test]
	fn api_names_start_lowercase() {
		assert_eq!(lower_first("BrowserContext"), "browserContext");
		assert_eq!(lower_first("x"), "x");
		assert_eq!(lower_first(""), "");
	}
}
