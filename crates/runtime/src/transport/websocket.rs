//! WebSocket transport: one JSON message per text frame.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Headers, Transport, TransportEvent, TransportEvents, TransportFuture, event_channel};
use crate::error::{Error, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Direct socket connection to a driver endpoint.
pub struct WebSocketTransport {
	url: String,
	headers: Headers,
	events: mpsc::UnboundedSender<TransportEvent>,
	sink: Option<WsSink>,
	reader_task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
	/// Prepares a transport for `url`; nothing is opened until `connect`.
	pub fn new(url: impl Into<String>, headers: Headers) -> (Self, TransportEvents) {
		let (tx, rx) = event_channel();
		let transport = Self {
			url: url.into(),
			headers,
			events: tx,
			sink: None,
			reader_task: None,
		};
		(transport, rx)
	}

	async fn open(&mut self) -> Result<Headers> {
		let mut request = self.url.as_str().into_client_request()?;
		for (name, value) in &self.headers {
			let name = HeaderName::from_bytes(name.as_bytes())
				.map_err(|e| Error::InvalidArgument(format!("Invalid header name {name}: {e}")))?;
			let value = HeaderValue::from_str(value)
				.map_err(|e| Error::InvalidArgument(format!("Invalid header value for {name}: {e}")))?;
			request.headers_mut().append(name, value);
		}

		tracing::debug!(url = %self.url, "Opening WebSocket transport");
		let (stream, response) = connect_async(request)
			.await
			.map_err(|e| Error::ConnectionFailed(format!("{}: {e}", self.url)))?;
		let response_headers = response
			.headers()
			.iter()
			.filter_map(|(name, value)| {
				value
					.to_str()
					.ok()
					.map(|value| (name.to_string(), value.to_string()))
			})
			.collect();

		let (sink, mut stream) = stream.split();
		self.sink = Some(sink);
		let events = self.events.clone();
		self.reader_task = Some(tokio::spawn(async move {
			let reason = loop {
				let frame = match stream.next().await {
					Some(Ok(frame)) => frame,
					Some(Err(err)) => break Some(err.to_string()),
					None => break None,
				};
				let parsed = match frame {
					WsMessage::Text(text) => serde_json::from_str::<Value>(&text),
					WsMessage::Binary(bytes) => serde_json::from_slice::<Value>(&bytes),
					WsMessage::Close(frame) => {
						break frame
							.map(|f| f.reason.to_string())
							.filter(|reason| !reason.is_empty());
					}
					WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
				};
				match parsed {
					Ok(message) => {
						if events.send(TransportEvent::Message(message)).is_err() {
							return;
						}
					}
					Err(err) => break Some(format!("Malformed message: {err}")),
				}
			};
			let _ = events.send(TransportEvent::Closed(reason));
		}));

		Ok(response_headers)
	}
}

impl Transport for WebSocketTransport {
	fn connect(&mut self, _params: Value) -> TransportFuture<'_, Headers> {
		Box::pin(self.open())
	}

	fn send(&mut self, message: Value) -> TransportFuture<'_, ()> {
		Box::pin(async move {
			let sink = self
				.sink
				.as_mut()
				.ok_or_else(|| Error::Transport("WebSocket is not connected".to_string()))?;
			sink.send(WsMessage::Text(serde_json::to_string(&message)?))
				.await?;
			Ok(())
		})
	}

	fn close(&mut self) -> TransportFuture<'_, ()> {
		Box::pin(async move {
			if let Some(mut sink) = self.sink.take() {
				if let Err(err) = sink.close().await {
					tracing::debug!("WebSocket close failed: {err}");
				}
			}
			Ok(())
		})
	}
}

impl Drop for WebSocketTransport {
	fn drop(&mut self) {
		if let Some(task) = self.reader_task.take() {
			task.abort();
		}
	}
}
