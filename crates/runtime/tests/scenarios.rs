//! End-to-end scenarios over an in-memory driver pipe.

use std::sync::Arc;
use std::time::Duration;

use pw_engine::bootstrap::connect_pipe;
use pw_engine::{ChannelOwner, Connection, ConnectionOptions, Error};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

/// The driver side of the pipe.
struct FakeDriver {
	from_client: DuplexStream,
	to_client: DuplexStream,
}

impl FakeDriver {
	async fn recv(&mut self) -> Option<Value> {
		let mut len_buf = [0u8; 4];
		self.from_client.read_exact(&mut len_buf).await.ok()?;
		let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
		self.from_client.read_exact(&mut body).await.ok()?;
		serde_json::from_slice(&body).ok()
	}

	async fn send(&mut self, message: Value) {
		let bytes = serde_json::to_vec(&message).unwrap();
		self.to_client
			.write_all(&(bytes.len() as u32).to_le_bytes())
			.await
			.unwrap();
		self.to_client.write_all(&bytes).await.unwrap();
		self.to_client.flush().await.unwrap();
	}
}

async fn start() -> (Arc<Connection>, FakeDriver) {
	let _ = tracing_subscriber::fmt()
		.with_test_writer()
		.with_max_level(tracing::Level::DEBUG)
		.try_init();

	let (client_stdin, from_client) = duplex(64 * 1024);
	let (to_client, client_stdout) = duplex(64 * 1024);
	let connection = connect_pipe(client_stdin, client_stdout, ConnectionOptions::default())
		.await
		.unwrap();
	(
		connection,
		FakeDriver {
			from_client,
			to_client,
		},
	)
}

#[tokio::test]
async fn initialize_over_pipe() -> anyhow::Result<()> {
	let (connection, mut driver) = start().await;
	let root = connection.root()?;
	let call = tokio::spawn(async move { root.initialize().await });

	let request = driver.recv().await.expect("initialize request");
	assert_eq!(request["id"], 1);
	assert_eq!(request["guid"], "");
	assert_eq!(request["method"], "initialize");

	driver
		.send(json!({
			"guid": "",
			"method": "__create__",
			"params": {"type": "Session", "guid": "s1", "initializer": {"version": "1"}},
		}))
		.await;
	driver
		.send(json!({"id": 1, "result": {"session": {"guid": "s1"}}}))
		.await;

	let result = call.await??;
	assert_eq!(result["session"]["guid"], "s1");
	let session = connection.get_object("s1")?;
	assert_eq!(session.type_name(), "Session");
	assert_eq!(session.initializer()["version"], "1");
	assert_eq!(session.parent().map(|p| p.guid().to_string()), Some(String::new()));
	Ok(())
}

#[tokio::test]
async fn driver_exit_rejects_in_flight_calls() {
	let (connection, mut driver) = start().await;
	let root = connection.root().unwrap();
	let call = tokio::spawn(async move { root.channel().send::<_, Value>("work", json!({})).await });
	driver.recv().await.expect("work request");

	drop(driver);
	tokio::time::timeout(Duration::from_secs(5), connection.closed())
		.await
		.expect("connection closes when the driver goes away");

	let err = call.await.unwrap().unwrap_err();
	assert!(err.is_closed());
	assert!(err.to_string().starts_with("root.work: "));
	assert_eq!(connection.pending_calls(), 0);
}

#[tokio::test]
async fn integrity_failure_closes_both_directions() {
	let (connection, mut driver) = start().await;

	driver.send(json!({"id": 77, "result": {}})).await;
	tokio::time::timeout(Duration::from_secs(5), connection.closed())
		.await
		.expect("dispatch error closes the connection");

	let reason = connection.close_reason().unwrap_or_default();
	assert!(reason.contains("Cannot find command to respond: 77"));
	assert!(driver.recv().await.is_none(), "transport is shut down");

	let root_gone = connection.root();
	assert!(root_gone.is_err());
}

#[tokio::test]
async fn local_close_shuts_the_transport() {
	let (connection, mut driver) = start().await;
	connection.close(Some("done"));
	assert!(driver.recv().await.is_none());

	let Err(err) = connection.get_object("") else {
		panic!("registry is cleared on close");
	};
	assert!(matches!(err, Error::ObjectNotFound(_)));
}

#[tokio::test]
async fn events_are_dispatched_in_order() {
	let (connection, mut driver) = start().await;
	driver
		.send(json!({
			"guid": "",
			"method": "__create__",
			"params": {"type": "Worker", "guid": "worker@1", "initializer": {}},
		}))
		.await;
	let worker = tokio::time::timeout(
		Duration::from_secs(5),
		connection.wait_for_object("worker@1", Duration::ZERO),
	)
	.await
	.unwrap()
	.unwrap();

	let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
	worker
		.base()
		.add_listener("log", move |params| {
			let _ = tx.send(params["n"].as_u64().unwrap_or_default());
		})
		.detach();

	for n in 1..=5 {
		driver
			.send(json!({"guid": "worker@1", "method": "log", "params": {"n": n}}))
			.await;
	}
	for expected in 1..=5 {
		assert_eq!(rx.recv().await, Some(expected));
	}
}
