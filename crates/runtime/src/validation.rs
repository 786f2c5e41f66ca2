//! Schema validation seam.
//!
//! The engine does not know the shape of any remote type. It asks a
//! [`SchemaValidator`] for a validator keyed by `(type, method, direction)` and
//! runs it on every outbound parameter set and every inbound result, event and
//! initializer. A missing validator is a protocol-integrity failure.
//!
//! [`SchemaRegistry`] is the table-driven implementation: generated per-type
//! method tables register into it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::connection::ObjectStore;

/// Payload failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
	pub message: String,
}

impl ValidationError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}

	/// Prefixes the message with the location of the offending value.
	pub fn at(path: &str, message: impl std::fmt::Display) -> Self {
		Self::new(format!("{path}: {message}"))
	}
}

/// Which payload of a `(type, method)` pair is being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
	Params,
	Result,
	Event,
	Initializer,
}

/// Read-only view of connection state handed to validators.
pub struct ValidationContext<'a> {
	objects: &'a ObjectStore,
	is_remote: bool,
}

impl<'a> ValidationContext<'a> {
	pub(crate) fn new(objects: &'a ObjectStore, is_remote: bool) -> Self {
		Self { objects, is_remote }
	}

	/// Whether the driver is remote (binary payloads travel as base64).
	pub fn is_remote(&self) -> bool {
		self.is_remote
	}

	/// Type name of the live object with `guid`.
	pub fn object_type(&self, guid: &str) -> Option<String> {
		self.objects.object_type(guid)
	}
}

pub type ValidatorFn =
	Arc<dyn Fn(Value, &ValidationContext<'_>) -> Result<Value, ValidationError> + Send + Sync>;

/// Source of validators for each `(type, method, direction)`.
pub trait SchemaValidator: Send + Sync {
	fn find(&self, type_name: &str, method: &str, direction: Direction) -> Option<ValidatorFn>;

	/// Internal methods are plumbing: they are never reported to instrumentation.
	fn is_internal(&self, _type_name: &str, _method: &str) -> bool {
		false
	}
}

type Key = (String, String, Direction);

/// Table of per-type validators.
///
/// A strict registry rejects any lookup it has no entry for; a permissive one
/// falls back to [`validators::any`].
#[derive(Default)]
pub struct SchemaRegistry {
	validators: HashMap<Key, ValidatorFn>,
	internal: HashSet<(String, String)>,
	permissive: bool,
}

impl SchemaRegistry {
	pub fn strict() -> Self {
		Self::default()
	}

	pub fn permissive() -> Self {
		Self {
			permissive: true,
			..Self::default()
		}
	}

	pub fn register(
		&mut self,
		type_name: &str,
		method: &str,
		direction: Direction,
		validator: ValidatorFn,
	) {
		self.validators
			.insert((type_name.to_string(), method.to_string(), direction), validator);
	}

	/// Registers a call method with its params and result validators.
	pub fn method(
		mut self,
		type_name: &str,
		method: &str,
		params: ValidatorFn,
		result: ValidatorFn,
	) -> Self {
		self.register(type_name, method, Direction::Params, params);
		self.register(type_name, method, Direction::Result, result);
		self
	}

	/// Registers a call method that is excluded from instrumentation.
	pub fn internal_method(
		mut self,
		type_name: &str,
		method: &str,
		params: ValidatorFn,
		result: ValidatorFn,
	) -> Self {
		self.internal
			.insert((type_name.to_string(), method.to_string()));
		self.method(type_name, method, params, result)
	}

	pub fn event(mut self, type_name: &str, event: &str, validator: ValidatorFn) -> Self {
		self.register(type_name, event, Direction::Event, validator);
		self
	}

	pub fn initializer(mut self, type_name: &str, validator: ValidatorFn) -> Self {
		self.register(type_name, "", Direction::Initializer, validator);
		self
	}
}

impl SchemaValidator for SchemaRegistry {
	fn find(&self, type_name: &str, method: &str, direction: Direction) -> Option<ValidatorFn> {
		let key = (type_name.to_string(), method.to_string(), direction);
		match self.validators.get(&key) {
			Some(validator) => Some(Arc::clone(validator)),
			None if self.permissive => Some(validators::any()),
			None => None,
		}
	}

	fn is_internal(&self, type_name: &str, method: &str) -> bool {
		self.internal
			.contains(&(type_name.to_string(), method.to_string()))
	}
}

/// Building blocks for hand-written and generated validators.
pub mod validators {
	use super::*;

	/// Accepts any payload unchanged.
	pub fn any() -> ValidatorFn {
		from_fn(|value, _| Ok(value))
	}

	/// Accepts a JSON object; `null` normalizes to `{}`.
	pub fn object() -> ValidatorFn {
		from_fn(|value, _| match value {
			Value::Null => Ok(Value::Object(Default::default())),
			Value::Object(_) => Ok(value),
			other => Err(ValidationError::new(format!(
				"expected object, got {}",
				type_of(&other)
			))),
		})
	}

	/// Requires `field` to reference a live object of one of `types`.
	pub fn channel(field: &'static str, types: &'static [&'static str]) -> ValidatorFn {
		from_fn(move |value, ctx| {
			let guid = value
				.get(field)
				.and_then(|v| v.get("guid"))
				.and_then(Value::as_str)
				.ok_or_else(|| ValidationError::at(field, "expected channel reference"))?;
			let actual = ctx
				.object_type(guid)
				.ok_or_else(|| ValidationError::at(field, format!("no object with guid {guid}")))?;
			if !types.is_empty() && !types.contains(&actual.as_str()) {
				return Err(ValidationError::at(
					field,
					format!(
						"object with guid {guid} has type {actual}, expected {}",
						types.join(",")
					),
				));
			}
			Ok(value)
		})
	}

	pub fn from_fn<F>(f: F) -> ValidatorFn
	where
		F: Fn(Value, &ValidationContext<'_>) -> Result<Value, ValidationError> + Send + Sync + 'static,
	{
		Arc::new(f)
	}

	fn type_of(value: &Value) -> &'static str {
		match value {
			Value::Null => "null",
			Value::Bool(_) => "boolean",
			Value::Number(_) => "number",
			Value::String(_) => "string",
			Value::Array(_) => "array",
			Value::Object(_) => "object",
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn strict_registry_misses_unknown_keys() {
		let registry = SchemaRegistry::strict().method(
			"Session",
			"open",
			validators::object(),
			validators::any(),
		);
		assert!(registry.find("Session", "open", Direction::Params).is_some());
		assert!(registry.find("Session", "open", Direction::Event).is_none());
		assert!(registry.find("Session", "close", Direction::Params).is_none());
	}

	#[test]
	fn permissive_registry_falls_back_to_any() {
		let registry = SchemaRegistry::permissive();
		assert!(registry.find("Anything", "at_all", Direction::Result).is_some());
	}

	#[test]
	fn internal_methods_are_flagged() {
		let registry = SchemaRegistry::strict().internal_method(
			"Session",
			"updateSubscription",
			validators::any(),
			validators::any(),
		);
		assert!(registry.is_internal("Session", "updateSubscription"));
		assert!(!registry.is_internal("Session", "open"));
	}

	#[test]
	fn object_validator_normalizes_null() {
		let store = ObjectStore::new();
		let ctx = ValidationContext::new(&store, false);
		let validator = validators::object();
		assert_eq!(validator(Value::Null, &ctx).unwrap(), json!({}));
		let err = validator(json!(3), &ctx).unwrap_err();
		assert_eq!(err.message, "expected object, got number");
	}

	#[test]
	fn channel_validator_requires_live_object() {
		let store = ObjectStore::new();
		let ctx = ValidationContext::new(&store, false);
		let validator = validators::channel("session", &["Session"]);
		let err = validator(json!({"session": {"guid": "s1"}}), &ctx).unwrap_err();
		assert!(err.message.contains("no object with guid s1"));
	}
}
