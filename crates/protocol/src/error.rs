//! Serialized driver-side errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol error details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// Error message
	pub message: String,
	/// Error type name (e.g., "TimeoutError", "TargetClosedError")
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Stack trace
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

/// Error as it appears in a [`Response`](crate::Response).
///
/// Drivers send either the bare payload or wrap it in an `error` field; a
/// thrown non-error value arrives as `{"value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerializedError {
	Wrapped { error: ErrorPayload },
	Plain(ErrorPayload),
	Thrown { value: Value },
}

impl SerializedError {
	/// Normalizes any of the accepted shapes into one payload.
	pub fn into_payload(self) -> ErrorPayload {
		match self {
			SerializedError::Wrapped { error } | SerializedError::Plain(error) => error,
			SerializedError::Thrown { value } => ErrorPayload {
				message: match value {
					Value::String(s) => s,
					other => other.to_string(),
				},
				name: None,
				stack: None,
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn thrown_value_becomes_message() {
		let error: SerializedError = serde_json::from_str(r#"{"value": 42}"#).unwrap();
		assert_eq!(error.into_payload().message, "42");
	}
}
