//! Length-prefixed JSON frames over a pair of byte streams.
//!
//! Each frame is a 4-byte little-endian length followed by that many bytes of
//! UTF-8 JSON, the format the driver uses on its stdio.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Headers, Transport, TransportEvent, TransportEvents, TransportFuture, event_channel};
use crate::error::{Error, Result};

/// Writing half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	writer: W,
}

impl<W: AsyncWrite + Unpin + Send> PipeTransportSender<W> {
	/// Writes one framed message and flushes it.
	pub async fn send(&mut self, message: Value) -> Result<()> {
		let bytes = serde_json::to_vec(&message)?;
		let length = u32::try_from(bytes.len()).map_err(|_| {
			Error::Transport(format!("Message too large to frame: {} bytes", bytes.len()))
		})?;
		self.writer.write_all(&length.to_le_bytes()).await?;
		self.writer.write_all(&bytes).await?;
		self.writer.flush().await?;
		Ok(())
	}

	pub async fn close(&mut self) -> Result<()> {
		self.writer.shutdown().await?;
		Ok(())
	}
}

/// Reading half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	reader: R,
	events: mpsc::UnboundedSender<TransportEvent>,
}

impl<R: AsyncRead + Unpin + Send> PipeTransportReceiver<R> {
	/// Reads frames until the stream fails or the event receiver is dropped.
	///
	/// A read failure is reported as a `Closed` event and returned.
	pub async fn run(&mut self) -> Result<()> {
		loop {
			let message = match self.read_frame().await {
				Ok(message) => message,
				Err(err) => {
					let _ = self.events.send(TransportEvent::Closed(Some(err.to_string())));
					return Err(err);
				}
			};
			if self.events.send(TransportEvent::Message(message)).is_err() {
				tracing::debug!("Pipe transport receiver dropped, stopping reader");
				return Ok(());
			}
		}
	}

	async fn read_frame(&mut self) -> Result<Value> {
		let mut len_buf = [0u8; 4];
		self.reader
			.read_exact(&mut len_buf)
			.await
			.map_err(|e| Error::Transport(format!("Failed to read length prefix: {e}")))?;
		let length = u32::from_le_bytes(len_buf) as usize;

		let mut buf = vec![0u8; length];
		self.reader
			.read_exact(&mut buf)
			.await
			.map_err(|e| Error::Transport(format!("Failed to read message body: {e}")))?;
		Ok(serde_json::from_slice(&buf)?)
	}
}

/// Transport over driver stdio or any other byte stream pair.
pub struct PipeTransport<W, R> {
	sender: PipeTransportSender<W>,
	receiver: Option<PipeTransportReceiver<R>>,
	reader_task: Option<JoinHandle<()>>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport writing to `stdin` and reading from `stdout`.
	pub fn new(stdin: W, stdout: R) -> (Self, TransportEvents) {
		let (tx, rx) = event_channel();
		let transport = Self {
			sender: PipeTransportSender { writer: stdin },
			receiver: Some(PipeTransportReceiver {
				reader: stdout,
				events: tx,
			}),
			reader_task: None,
		};
		(transport, rx)
	}

	/// Splits into independently owned halves.
	///
	/// Returns `None` for the receiver once [`Transport::connect`] has
	/// started the background reader.
	pub fn into_parts(self) -> (PipeTransportSender<W>, Option<PipeTransportReceiver<R>>) {
		(self.sender, self.receiver)
	}

	/// Runs the reader on the current task.
	pub async fn run(&mut self) -> Result<()> {
		match self.receiver.as_mut() {
			Some(receiver) => receiver.run().await,
			None => Err(Error::Transport("Pipe reader already running".to_string())),
		}
	}
}

impl<W, R> Transport for PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	fn connect(&mut self, _params: Value) -> TransportFuture<'_, Headers> {
		Box::pin(async move {
			if let Some(mut receiver) = self.receiver.take() {
				self.reader_task = Some(tokio::spawn(async move {
					if let Err(err) = receiver.run().await {
						tracing::debug!("Pipe transport reader stopped: {err}");
					}
				}));
			}
			Ok(Headers::new())
		})
	}

	fn send(&mut self, message: Value) -> TransportFuture<'_, ()> {
		Box::pin(self.sender.send(message))
	}

	fn close(&mut self) -> TransportFuture<'_, ()> {
		Box::pin(async move {
			let result = self.sender.close().await;
			if let Some(task) = self.reader_task.take() {
				task.abort();
			}
			result
		})
	}
}
