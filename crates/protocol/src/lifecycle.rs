//! Reserved event names that mutate the object graph.
//!
//! The driver announces every remote object with `__create__` (addressed to
//! the parent), moves it with `__adopt__` (addressed to the new parent) and
//! retires it with `__dispose__` (addressed to the object itself).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CREATE: &str = "__create__";
pub const ADOPT: &str = "__adopt__";
pub const DISPOSE: &str = "__dispose__";

/// Params of a `__create__` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateParams {
	/// Protocol type name of the new object
	#[serde(rename = "type")]
	pub type_name: String,
	/// GUID of the new object
	pub guid: String,
	/// Initial state of the new object
	#[serde(default)]
	pub initializer: Value,
}

/// Params of an `__adopt__` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdoptParams {
	/// GUID of the child being moved
	pub guid: String,
}

/// Params of a `__dispose__` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisposeParams {
	/// `"gc"` when the driver collected the object to bound its heap
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}
