//! Call-boundary bookkeeping for public API operations.
//!
//! Every public operation runs through [`wrap_api_call`]. The outermost wrap
//! captures the caller location, opens an [`ApiZone`] and reports the call to
//! instrumentation; nested wraps made while that zone is active join it and
//! report nothing, so one logical API call produces one begin/end pair.

use std::fmt;
use std::future::Future;
use std::panic::Location as CallerLocation;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pw_wire::{Location, Metadata};

use crate::error::{Error, Result};
use crate::instrumentation::Instrumentation;
use crate::zone::{ZoneManager, ZoneType};

/// One client-side source frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
	pub file: String,
	pub line: u32,
	pub column: u32,
}

impl From<&CallerLocation<'_>> for StackFrame {
	fn from(location: &CallerLocation<'_>) -> Self {
		Self {
			file: location.file().to_string(),
			line: location.line(),
			column: location.column(),
		}
	}
}

impl fmt::Display for StackFrame {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "    at {}:{}:{}", self.file, self.line, self.column)
	}
}

/// Zone data for an in-flight API call.
#[derive(Debug)]
pub struct ApiZone {
	api_name: Option<String>,
	frames: Vec<StackFrame>,
	internal: bool,
	reported: AtomicBool,
	wall_time: i64,
	step_id: Option<String>,
}

impl ApiZone {
	pub(crate) fn new(
		api_name: &str,
		frames: Vec<StackFrame>,
		internal: bool,
		step_id: Option<String>,
	) -> Self {
		Self {
			api_name: (!internal && !api_name.is_empty()).then(|| api_name.to_string()),
			frames,
			internal,
			reported: AtomicBool::new(false),
			wall_time: Metadata::now().wall_time,
			step_id,
		}
	}

	/// Externally visible call name; `None` for internal calls.
	pub fn api_name(&self) -> Option<&str> {
		self.api_name.as_deref()
	}

	pub fn frames(&self) -> &[StackFrame] {
		&self.frames
	}

	pub fn is_internal(&self) -> bool {
		self.internal
	}

	pub fn step_id(&self) -> Option<&str> {
		self.step_id.as_deref()
	}

	/// Wall-clock start of the call in unix milliseconds.
	pub fn wall_time(&self) -> i64 {
		self.wall_time
	}

	/// Metadata for the next wire call made inside this zone.
	///
	/// Only the first call of a non-internal zone carries the api name and
	/// location; the rest go out as internal so the driver traces the logical
	/// call once.
	pub(crate) fn next_metadata(&self) -> Metadata {
		let first = !self.internal && !self.reported.swap(true, Ordering::AcqRel);
		let mut metadata = Metadata {
			step_id: self.step_id.clone(),
			..Metadata::now()
		};
		if first && self.api_name.is_some() {
			metadata.api_name = self.api_name.clone();
			metadata.location = self.frames.first().map(|frame| Location {
				file: frame.file.clone(),
				line: Some(frame.line),
				column: Some(frame.column),
			});
			metadata.internal = Some(false);
		} else {
			metadata.internal = Some(true);
		}
		metadata
	}
}

/// Zone data for a test step; its id is stamped on every call inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepZone {
	pub step_id: String,
}

fn is_anonymous(api_name: &str) -> bool {
	api_name.is_empty() || api_name.contains("<anonymous>")
}

/// Runs `operation` as one API call.
///
/// Joins the active api zone if there is one. Otherwise opens a zone and reports
/// begin/end (unless `internal`). On failure the error is prefixed with the
/// call name and carries the captured frames.
pub(crate) async fn wrap_api_call<T, F, Fut>(
	zones: &ZoneManager,
	instrumentation: &Instrumentation,
	api_name: &str,
	location: &'static CallerLocation<'static>,
	internal: bool,
	operation: F,
) -> Result<T>
where
	F: FnOnce(Arc<ApiZone>) -> Fut,
	Fut: Future<Output = Result<T>>,
{
	if let Some(existing) = zones.lookup::<ApiZone>(ZoneType::Api) {
		return operation(existing).await;
	}

	let step_id = zones
		.lookup::<StepZone>(ZoneType::Step)
		.map(|step| step.step_id.clone());
	let zone = Arc::new(ApiZone::new(
		api_name,
		vec![StackFrame::from(location)],
		internal,
		step_id,
	));

	let guard = (!internal).then(|| {
		instrumentation.api_call_begin(&zone);
		EndGuard {
			instrumentation,
			zone: Arc::clone(&zone),
			armed: true,
		}
	});

	let result = zones
		.run(ZoneType::Api, Arc::clone(&zone), operation(Arc::clone(&zone)))
		.await;
	let Some(guard) = guard else {
		return result;
	};

	let result = result.map_err(|error| {
		if is_anonymous(api_name) {
			error
		} else {
			error.with_api_call(api_name, zone.frames().to_vec())
		}
	});
	guard.finish(result.as_ref().err());
	result
}

/// Fires the end hook exactly once, with [`Error::Cancelled`] if the call is
/// dropped before it settles.
struct EndGuard<'a> {
	instrumentation: &'a Instrumentation,
	zone: Arc<ApiZone>,
	armed: bool,
}

impl EndGuard<'_> {
	fn finish(mut self, error: Option<&Error>) {
		self.armed = false;
		self.instrumentation.api_call_end(&self.zone, error);
	}
}

impl Drop for EndGuard<'_> {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}
		let name = self.zone.api_name().unwrap_or_default().to_string();
		tracing::debug!(api_name = %name, "API call dropped before settling");
		let error = Error::Cancelled(name);
		self.instrumentation.api_call_end(&self.zone, Some(&error));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn zone(internal: bool) -> ApiZone {
		ApiZone::new(
			"session.open",
			vec![StackFrame {
				file: "src/lib.rs".to_string(),
				line: 3,
				column: 9,
			}],
			internal,
			Some("step@1".to_string()),
		)
	}

	#[test]
	fn first_call_is_attributed_rest_are_internal() {
		let zone = zone(false);
		let first = zone.next_metadata();
		assert_eq!(first.api_name.as_deref(), Some("session.open"));
		assert_eq!(first.internal, Some(false));
		assert_eq!(first.location.unwrap().line, Some(3));
		assert_eq!(first.step_id.as_deref(), Some("step@1"));

		let second = zone.next_metadata();
		assert!(second.api_name.is_none());
		assert_eq!(second.internal, Some(true));
		assert_eq!(second.step_id.as_deref(), Some("step@1"));
	}

	#[test]
	fn internal_zone_hides_name() {
		let zone = zone(true);
		assert!(zone.api_name().is_none());
		let metadata = zone.next_metadata();
		assert!(metadata.api_name.is_none());
		assert_eq!(metadata.internal, Some(true));
	}

	#[test]
	fn anonymous_names() {
		assert!(is_anonymous(""));
		assert!(is_anonymous("<anonymous>.run"));
		assert!(!is_anonymous("session.open"));
	}

	#[test]
	fn frame_display() {
		let frame = StackFrame {
			file: "src/lib.rs".to_string(),
			line: 3,
			column: 9,
		};
		assert_eq!(frame.to_string(), "    at src/lib.rs:3:9");
	}
}
