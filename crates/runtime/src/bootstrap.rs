//! Wiring of a transport to a fresh connection.
//!
//! Two tasks run per connection: a writer draining the outbound channel into
//! the transport and a reader feeding transport events to
//! [`Connection::dispatch`]. Either side going away tears the other down.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ConnectOptions;
use crate::connection::{Connection, ConnectionOptions};
use crate::error::Result;
use crate::timeout::{TimeoutSettings, with_timeout};
use crate::transport::{
	Headers, LocalUtils, PipeTransport, Transport, TransportEvent, TransportEvents,
	TunnelTransport, WebSocketTransport,
};

/// How to reach a driver endpoint.
pub enum TransportStrategy {
	/// Through a helper on an already-open connection.
	Tunnel(Arc<LocalUtils>),
	/// Directly over a WebSocket.
	Socket,
}

/// Prefers the tunnel whenever a local helper is available.
pub fn select_strategy(local_utils: Option<Arc<LocalUtils>>) -> TransportStrategy {
	match local_utils {
		Some(local_utils) => TransportStrategy::Tunnel(local_utils),
		None => TransportStrategy::Socket,
	}
}

/// Connects to `options.ws_endpoint` and returns the new connection with the
/// handshake response headers.
pub async fn connect(
	strategy: TransportStrategy,
	options: &ConnectOptions,
	timeouts: &TimeoutSettings,
	connection_options: ConnectionOptions,
) -> Result<(Arc<Connection>, Headers)> {
	let timeout = timeouts.timeout(options.timeout);
	let params = options.to_params(timeout)?;
	let what = format!("Connecting to {}", options.ws_endpoint);
	match strategy {
		TransportStrategy::Tunnel(local_utils) => {
			tracing::debug!(endpoint = %options.ws_endpoint, "Connecting through tunnel");
			let (transport, events) = TunnelTransport::new(local_utils);
			with_timeout(
				timeout,
				&what,
				connect_over(transport, events, params, connection_options),
			)
			.await
		}
		TransportStrategy::Socket => {
			tracing::debug!(endpoint = %options.ws_endpoint, "Connecting over WebSocket");
			let (transport, events) =
				WebSocketTransport::new(options.ws_endpoint.clone(), options.headers.clone());
			with_timeout(
				timeout,
				&what,
				connect_over(transport, events, params, connection_options),
			)
			.await
		}
	}
}

/// Connects to a driver speaking on a byte stream pair, e.g. its stdio.
pub async fn connect_pipe<W, R>(
	stdin: W,
	stdout: R,
	connection_options: ConnectionOptions,
) -> Result<Arc<Connection>>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	let (transport, events) = PipeTransport::new(stdin, stdout);
	let (connection, _) = connect_over(transport, events, Value::Null, connection_options).await?;
	Ok(connection)
}

/// Opens `transport` and attaches it to a new connection.
pub async fn connect_over<T>(
	mut transport: T,
	events: TransportEvents,
	params: Value,
	connection_options: ConnectionOptions,
) -> Result<(Arc<Connection>, Headers)>
where
	T: Transport + 'static,
{
	let headers = transport.connect(params).await?;
	let connection = attach(transport, events, connection_options);
	Ok((connection, headers))
}

/// Spawns the reader and writer tasks for an already open `transport`.
pub fn attach<T>(
	mut transport: T,
	mut events: TransportEvents,
	connection_options: ConnectionOptions,
) -> Arc<Connection>
where
	T: Transport + 'static,
{
	let (connection, mut outbound) = Connection::new(connection_options);

	let writer = Arc::clone(&connection);
	tokio::spawn(async move {
		loop {
			tokio::select! {
				message = outbound.recv() => {
					let Some(message) = message else { break };
					if let Err(err) = transport.send(message).await {
						tracing::error!("Transport write error: {err}");
						writer.close(Some(&err.to_string()));
						break;
					}
				}
				_ = writer.closed() => break,
			}
		}
		if let Err(err) = transport.close().await {
			tracing::debug!("Transport close failed: {err}");
		}
	});

	let reader = Arc::clone(&connection);
	tokio::spawn(async move {
		while let Some(event) = events.recv().await {
			match event {
				TransportEvent::Message(message) => {
					if let Err(err) = reader.dispatch(message).await {
						tracing::error!("Error dispatching message: {err}");
						reader.close(Some(&err.to_string()));
					}
				}
				TransportEvent::Closed(reason) => {
					tracing::debug!(?reason, "Transport closed");
					reader.close(reason.as_deref());
				}
			}
			if reader.is_closed() {
				break;
			}
		}
		reader.close(Some("Transport closed"));
	});

	connection
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::channel_owner::ChannelOwner;

	#[tokio::test]
	async fn tunnel_preferred_when_local_utils_available() {
		let (connection, _outbound) = Connection::new(ConnectionOptions::default());
		connection
			.dispatch(json!({
				"guid": "",
				"method": "__create__",
				"params": {"type": "LocalUtils", "guid": "localUtils@1", "initializer": {}},
			}))
			.await
			.unwrap();
		let local_utils = connection.get_typed::<LocalUtils>("localUtils@1").unwrap();

		match select_strategy(Some(local_utils)) {
			TransportStrategy::Tunnel(chosen) => assert_eq!(chosen.guid(), "localUtils@1"),
			TransportStrategy::Socket => panic!("expected the tunnel"),
		}
		assert!(matches!(select_strategy(None), TransportStrategy::Socket));
	}
}
