//! Tunnel transport: a nested connection carried over an existing one.
//!
//! `LocalUtils.connect` asks the driver behind an already-open connection to
//! dial the real endpoint and returns a `JsonPipe`. Messages for the nested
//! connection then travel as `JsonPipe.send {message}` calls and `message`
//! events on that pipe.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::{Headers, Transport, TransportEvent, TransportEvents, TransportFuture, event_channel};
use crate::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection, Subscription, private};
use crate::error::{Error, Result};

/// Remote end of a tunneled message stream.
pub struct JsonPipe {
	base: ChannelOwnerImpl,
}

impl JsonPipe {
	pub fn new(parent: ParentOrConnection, guid: Arc<str>, initializer: Value) -> Self {
		Self {
			base: ChannelOwnerImpl::new(parent, "JsonPipe", guid, initializer),
		}
	}

	pub async fn send(&self, message: Value) -> Result<()> {
		self.base
			.wrap_api_call("jsonPipe.send", true, |_| {
				self.base
					.channel()
					.send_no_result("send", json!({ "message": message }))
			})
			.await
	}

	pub async fn close(&self) -> Result<()> {
		self.base
			.wrap_api_call("jsonPipe.close", true, |_| {
				self.base.channel().send_no_result("close", json!({}))
			})
			.await
	}
}

impl private::Sealed for JsonPipe {}

impl ChannelOwner for JsonPipe {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}

#[derive(Deserialize)]
struct ChannelRef {
	guid: String,
}

#[derive(Deserialize)]
struct HeaderEntry {
	name: String,
	value: String,
}

#[derive(Deserialize)]
struct ConnectResult {
	pipe: ChannelRef,
	#[serde(default)]
	headers: Vec<HeaderEntry>,
}

/// Driver-side helper object that can open tunnels.
pub struct LocalUtils {
	base: ChannelOwnerImpl,
}

impl LocalUtils {
	pub fn new(parent: ParentOrConnection, guid: Arc<str>, initializer: Value) -> Self {
		Self {
			base: ChannelOwnerImpl::new(parent, "LocalUtils", guid, initializer),
		}
	}

	/// Opens a pipe to the endpoint described by `params`.
	pub async fn connect(&self, params: Value) -> Result<(Arc<JsonPipe>, Headers)> {
		let result: ConnectResult = self.base.channel().send("connect", params).await?;
		let pipe = self
			.base
			.connection()
			.get_typed::<JsonPipe>(&result.pipe.guid)?;
		let headers = result
			.headers
			.into_iter()
			.map(|h| (h.name, h.value))
			.collect();
		Ok((pipe, headers))
	}
}

impl private::Sealed for LocalUtils {}

impl ChannelOwner for LocalUtils {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}

/// [`Transport`] that forwards through a [`JsonPipe`].
pub struct TunnelTransport {
	local_utils: Arc<LocalUtils>,
	events: mpsc::UnboundedSender<TransportEvent>,
	pipe: Option<Arc<JsonPipe>>,
	listeners: Vec<Subscription>,
}

impl TunnelTransport {
	pub fn new(local_utils: Arc<LocalUtils>) -> (Self, TransportEvents) {
		let (tx, rx) = event_channel();
		let transport = Self {
			local_utils,
			events: tx,
			pipe: None,
			listeners: Vec::new(),
		};
		(transport, rx)
	}

	fn pipe(&self) -> Result<Arc<JsonPipe>> {
		self.pipe
			.clone()
			.ok_or_else(|| Error::Transport("Tunnel is not connected".to_string()))
	}
}

impl Transport for TunnelTransport {
	fn connect(&mut self, params: Value) -> TransportFuture<'_, Headers> {
		Box::pin(async move {
			let (pipe, headers) = self.local_utils.connect(params).await?;

			let tx = self.events.clone();
			self.listeners
				.push(pipe.base().add_listener("message", move |params| {
					let message = params.get("message").cloned().unwrap_or(Value::Null);
					let _ = tx.send(TransportEvent::Message(message));
				}));
			let tx = self.events.clone();
			self.listeners
				.push(pipe.base().add_listener("closed", move |params| {
					let reason = params
						.get("reason")
						.and_then(Value::as_str)
						.map(str::to_string);
					let _ = tx.send(TransportEvent::Closed(reason));
				}));

			self.pipe = Some(pipe);
			Ok(headers)
		})
	}

	fn send(&mut self, message: Value) -> TransportFuture<'_, ()> {
		Box::pin(async move { self.pipe()?.send(message).await })
	}

	fn close(&mut self) -> TransportFuture<'_, ()> {
		Box::pin(async move {
			self.listeners.clear();
			let Some(pipe) = self.pipe.take() else {
				return Ok(());
			};
			match pipe.close().await {
				Err(err) if err.is_closed() || matches!(err, Error::UseAfterDispose { .. }) => Ok(()),
				other => other,
			}
		})
	}
}
