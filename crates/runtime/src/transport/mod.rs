//! Bidirectional message transports.
//!
//! A transport moves whole JSON messages between the connection and a driver.
//! Outbound traffic goes through [`Transport::send`]; inbound messages and the
//! final close notification arrive on the [`TransportEvents`] channel handed
//! out when the transport is constructed.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

mod pipe;
mod tunnel;
mod websocket;

pub use pipe::{PipeTransport, PipeTransportReceiver, PipeTransportSender};
pub use tunnel::{JsonPipe, LocalUtils, TunnelTransport};
pub use websocket::WebSocketTransport;

/// Header name/value pairs, in wire order.
pub type Headers = Vec<(String, String)>;

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Inbound notification from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
	/// One complete message from the driver.
	Message(Value),
	/// The transport is gone. Sent at most once, always last.
	Closed(Option<String>),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

pub(crate) fn event_channel() -> (mpsc::UnboundedSender<TransportEvent>, TransportEvents) {
	mpsc::unbounded_channel()
}

/// A message channel to a driver.
pub trait Transport: Send {
	/// Opens the channel. Returns the handshake response headers, if any.
	fn connect(&mut self, params: Value) -> TransportFuture<'_, Headers>;

	/// Sends one message.
	fn send(&mut self, message: Value) -> TransportFuture<'_, ()>;

	/// Closes the channel. A `Closed` event follows on the event stream.
	fn close(&mut self) -> TransportFuture<'_, ()>;
}
