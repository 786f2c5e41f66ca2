//! Error types for the protocol engine.

use thiserror::Error;

use crate::api_call::StackFrame;
use crate::validation::ValidationError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the protocol engine.
#[derive(Debug, Error)]
pub enum Error {
	/// The connection was torn down before or during the operation.
	#[error("Target page, context or browser has been closed{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
	Closed { reason: Option<String> },

	/// A call was attempted on an object that is no longer live.
	#[error("{}", if *collected {
		"The object has been collected to prevent unbounded heap growth.".to_string()
	} else {
		format!("Object has been disposed: {guid}")
	})]
	UseAfterDispose { guid: String, collected: bool },

	/// Outbound params or an inbound payload failed schema validation.
	#[error(transparent)]
	Validation(#[from] ValidationError),

	/// The driver reported a failure for a specific call.
	#[error("{message}")]
	Remote {
		/// Error type name (e.g., "TimeoutError", "Error", "TargetClosedError")
		name: String,
		/// Message with the driver call log appended
		message: String,
		/// Driver-side stack trace (if available)
		stack: Option<String>,
		/// Driver-side call log
		log: Vec<String>,
	},

	/// A caller-imposed deadline elapsed.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// The local object graph or call table has desynchronized from the driver.
	#[error("Protocol integrity violated: {0}")]
	ProtocolIntegrity(String),

	/// Failure of a wrapped API call, prefixed with the call name.
	#[error("{api_name}: {source}")]
	Api {
		api_name: String,
		frames: Vec<StackFrame>,
		source: Box<Error>,
	},

	/// An API call was dropped before it settled, e.g. by a timeout.
	#[error("{0}: operation was cancelled")]
	Cancelled(String),

	/// Object not found in the connection registry.
	#[error("Object not found: {0}")]
	ObjectNotFound(String),

	/// Transport-level error.
	#[error("Transport error: {0}")]
	Transport(String),

	/// Failed to establish a connection with the driver.
	#[error("Failed to connect: {0}")]
	ConnectionFailed(String),

	/// Invalid argument provided to method.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// WebSocket handshake or framing error.
	#[error("WebSocket error: {0}")]
	WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
	fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
		Self::WebSocket(Box::new(err))
	}
}

impl Error {
	/// Augments an error with the name and frames of the API call it escaped from.
	pub fn with_api_call(self, api_name: &str, frames: Vec<StackFrame>) -> Self {
		Error::Api {
			api_name: api_name.to_string(),
			frames,
			source: Box::new(self),
		}
	}

	/// The innermost error, looking through [`Error::Api`] wrappers.
	pub fn root_cause(&self) -> &Error {
		match self {
			Error::Api { source, .. } => source.root_cause(),
			other => other,
		}
	}

	/// Returns the error name if this is a Remote error.
	pub fn error_name(&self) -> Option<&str> {
		match self.root_cause() {
			Error::Remote { name, .. } => Some(name),
			_ => None,
		}
	}

	/// Returns the driver stack trace if this is a Remote error with a stack.
	pub fn stack_trace(&self) -> Option<&str> {
		match self.root_cause() {
			Error::Remote { stack, .. } => stack.as_deref(),
			_ => None,
		}
	}

	/// Returns the driver call log attached to a Remote error.
	pub fn call_log(&self) -> &[String] {
		match self.root_cause() {
			Error::Remote { log, .. } => log,
			_ => &[],
		}
	}

	/// Client-side frames captured by the outermost API wrapper.
	pub fn frames(&self) -> &[StackFrame] {
		match self {
			Error::Api { frames, .. } => frames,
			_ => &[],
		}
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		match self.root_cause() {
			Error::Timeout(_) => true,
			Error::Remote { name, .. } => name == "TimeoutError",
			_ => false,
		}
	}

	/// Returns true if the target or its connection was closed.
	pub fn is_closed(&self) -> bool {
		match self.root_cause() {
			Error::Closed { .. } => true,
			Error::Remote { name, .. } => name == "TargetClosedError",
			_ => false,
		}
	}

	/// Returns true for fatal dispatch failures.
	pub fn is_protocol_integrity(&self) -> bool {
		matches!(self.root_cause(), Error::ProtocolIntegrity(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn closed_message_carries_reason() {
		let err = Error::Closed {
			reason: Some("network drop".to_string()),
		};
		assert!(err.to_string().contains("network drop"));
		assert!(err.is_closed());
	}

	#[test]
	fn api_wrapper_prefixes_and_keeps_kind() {
		let err = Error::Timeout("30000ms exceeded".to_string()).with_api_call(
			"session.open",
			vec![StackFrame {
				file: "src/main.rs".to_string(),
				line: 10,
				column: 5,
			}],
		);
		assert_eq!(err.to_string(), "session.open: Timeout: 30000ms exceeded");
		assert!(err.is_timeout());
		assert_eq!(err.frames().len(), 1);
	}
}
