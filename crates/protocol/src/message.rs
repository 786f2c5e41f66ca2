//! Call, result and event envelopes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SerializedError;
use crate::metadata::Metadata;

/// Protocol request message sent to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Unique call id for correlating the response
	pub id: u32,
	/// GUID of the target object
	#[serde(
		serialize_with = "serialize_arc_str",
		deserialize_with = "deserialize_arc_str"
	)]
	pub guid: Arc<str>,
	/// Method name to invoke
	pub method: String,
	/// Method parameters as JSON object
	pub params: Value,
	/// Out-of-band call metadata (api name, location, internal flag)
	pub metadata: Metadata,
}

/// Serde helpers for `Arc<str>` serialization
pub fn serialize_arc_str<S>(arc: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
where
	S: serde::Serializer,
{
	serializer.serialize_str(arc)
}

pub fn deserialize_arc_str<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let s: String = serde::Deserialize::deserialize(deserializer)?;
	Ok(Arc::from(s.as_str()))
}

/// Protocol response message from the driver.
///
/// Exactly one of `result` / `error` is meaningful. A response carrying
/// neither resolves with `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// Call id this response correlates to
	pub id: u32,
	/// Success result
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error result
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<SerializedError>,
	/// Driver-side call log, attached to failed calls
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub log: Option<Vec<String>>,
}

/// Protocol event message from the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	/// GUID of the object the event is addressed to
	#[serde(
		serialize_with = "serialize_arc_str",
		deserialize_with = "deserialize_arc_str"
	)]
	pub guid: Arc<str>,
	/// Event method name
	pub method: String,
	/// Event parameters as JSON object
	#[serde(default)]
	pub params: Value,
}

/// Discriminated union of inbound protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Response message (has `id` field)
	Response(Response),
	/// Event message (no `id` field)
	Event(Event),
	/// Unknown message type (forward-compatible catch-all)
	Unknown(Value),
}

impl Message {
	/// Call id if this message answers a call.
	pub fn id(&self) -> Option<u32> {
		match self {
			Message::Response(response) => Some(response.id),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn response_with_plain_error() {
		let message: Message =
			serde_json::from_str(r#"{"id": 1, "error": {"message": "boom"}}"#).unwrap();
		let Message::Response(response) = message else {
			panic!("expected response");
		};
		assert_eq!(response.id, 1);
		assert_eq!(response.error.unwrap().into_payload().message, "boom");
	}

	#[test]
	fn response_with_wrapped_error_and_log() {
		let json = r#"{
			"id": 7,
			"error": {"error": {"message": "Timeout 30000ms exceeded", "name": "TimeoutError"}},
			"log": ["waiting for locator", "  locator resolved"]
		}"#;
		let Message::Response(response) = serde_json::from_str(json).unwrap() else {
			panic!("expected response");
		};
		let payload = response.error.unwrap().into_payload();
		assert_eq!(payload.name.as_deref(), Some("TimeoutError"));
		assert_eq!(response.log.unwrap().len(), 2);
	}

	#[test]
	fn event_without_params_defaults_to_null() {
		let Message::Event(event) = serde_json::from_str(r#"{"guid": "s1", "method": "tick"}"#).unwrap()
		else {
			panic!("expected event");
		};
		assert_eq!(event.guid.as_ref(), "s1");
		assert!(event.params.is_null());
	}

	#[test]
	fn unrecognized_shape_is_unknown() {
		let message: Message = serde_json::from_str(r#"{"hello": "world"}"#).unwrap();
		assert!(matches!(message, Message::Unknown(_)));
		assert_eq!(message.id(), None);
	}

	#[test]
	fn request_serializes_metadata_camel_case() {
		let request = Request {
			id: 3,
			guid: Arc::from("session@1"),
			method: "open".to_string(),
			params: serde_json::json!({}),
			metadata: Metadata {
				api_name: Some("session.open".to_string()),
				step_id: Some("step@2".to_string()),
				..Metadata::now()
			},
		};
		let value = serde_json::to_value(&request).unwrap();
		assert_eq!(value["guid"], "session@1");
		assert_eq!(value["metadata"]["apiName"], "session.open");
		assert_eq!(value["metadata"]["stepId"], "step@2");
		assert!(value["metadata"]["wallTime"].is_i64());
		assert!(value["metadata"].get("location").is_none());
	}
}
