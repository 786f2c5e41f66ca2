//! Out-of-band call metadata.

use serde::{Deserialize, Serialize};

/// Metadata attached to every outbound call.
///
/// Contains timing information and the attribution the driver uses for its
/// own logs and traces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
	/// Unix timestamp in milliseconds
	pub wall_time: i64,
	/// Human-readable name of the API call this request belongs to
	#[serde(skip_serializing_if = "Option::is_none")]
	pub api_name: Option<String>,
	/// Source location where the API was called
	#[serde(skip_serializing_if = "Option::is_none")]
	pub location: Option<Location>,
	/// Whether this is an internal call (not user-facing API)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub internal: Option<bool>,
	/// Id of the enclosing test step, if any
	#[serde(skip_serializing_if = "Option::is_none")]
	pub step_id: Option<String>,
}

/// Source code location for a protocol call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
	/// Source file path
	pub file: String,
	/// Line number (1-indexed)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub line: Option<u32>,
	/// Column number (1-indexed)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub column: Option<u32>,
}

impl Metadata {
	/// Create minimal metadata with current timestamp
	pub fn now() -> Self {
		Self {
			wall_time: std::time::SystemTime::now()
				.duration_since(std::time::UNIX_EPOCH)
				.map(|d| d.as_millis() as i64)
				.unwrap_or_default(),
			..Self::default()
		}
	}

	/// Metadata for plumbing calls that must not show up in driver traces.
	pub fn internal() -> Self {
		Self {
			internal: Some(true),
			..Self::now()
		}
	}
}
