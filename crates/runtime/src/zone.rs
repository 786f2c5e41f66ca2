//! Ambient call context scoped to one logical async operation.
//!
//! A zone attaches typed data to everything that runs inside
//! [`ZoneManager::run`], however deeply nested and however many times it
//! suspends, without threading a context argument through every call. Zones
//! live in task-local storage: they are visible inside the operation and gone
//! once it settles. Tasks spawned from inside a zone start outside of it.
//!
//! Only one zone of a given [`ZoneType`] is visible at a time. A nested `run`
//! for a type that is already active joins the existing zone instead of
//! shadowing it.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
	static ZONES: ZoneStack;
}

/// Kind of context a zone carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneType {
	/// Established by `wrap_api_call`; carries an [`ApiZone`](crate::ApiZone).
	Api,
	/// Free for assertion layers built on top of the engine.
	Expect,
	/// Carries a [`StepZone`](crate::StepZone) whose id is stamped on call metadata.
	Step,
}

/// One active zone.
#[derive(Clone)]
pub struct Zone {
	id: u64,
	manager: u64,
	zone_type: ZoneType,
	data: Arc<dyn Any + Send + Sync>,
}

impl Zone {
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn zone_type(&self) -> ZoneType {
		self.zone_type
	}

	/// Typed view of the zone data.
	pub fn data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
		Arc::clone(&self.data).downcast::<T>().ok()
	}
}

impl fmt::Debug for Zone {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Zone")
			.field("id", &self.id)
			.field("type", &self.zone_type)
			.finish_non_exhaustive()
	}
}

/// Zones visible to the current task, innermost last.
#[derive(Clone, Default)]
struct ZoneStack {
	zones: Arc<Vec<Zone>>,
}

impl ZoneStack {
	fn current() -> Self {
		ZONES.try_with(Clone::clone).unwrap_or_default()
	}

	fn find(&self, manager: u64, zone_type: ZoneType) -> Option<&Zone> {
		self.zones
			.iter()
			.rev()
			.find(|z| z.manager == manager && z.zone_type == zone_type)
	}

	fn push(&self, zone: Zone) -> Self {
		let mut zones = Vec::with_capacity(self.zones.len() + 1);
		zones.extend(self.zones.iter().cloned());
		zones.push(zone);
		Self {
			zones: Arc::new(zones),
		}
	}
}

/// Allocates zones and answers lookups for one connection.
///
/// Each manager has its own namespace: zones created by one manager are
/// invisible to lookups on another, so independent connections never observe
/// each other's context even when their calls are nested.
#[derive(Debug)]
pub struct ZoneManager {
	id: u64,
	next_zone_id: AtomicU64,
}

impl Default for ZoneManager {
	fn default() -> Self {
		Self::new()
	}
}

impl ZoneManager {
	pub fn new() -> Self {
		Self {
			id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
			next_zone_id: AtomicU64::new(1),
		}
	}

	/// Runs `operation` inside a zone of `zone_type` holding `data`.
	///
	/// Joins the active zone of the same type if there is one; `data` is then
	/// dropped and `operation` observes the outer zone's data.
	pub async fn run<T, F>(&self, zone_type: ZoneType, data: Arc<T>, operation: F) -> F::Output
	where
		T: Any + Send + Sync,
		F: Future,
	{
		match self.enter(zone_type, data) {
			Some(stack) => ZONES.scope(stack, operation).await,
			None => operation.await,
		}
	}

	/// Synchronous counterpart of [`run`](Self::run).
	pub fn run_sync<T, R>(&self, zone_type: ZoneType, data: Arc<T>, f: impl FnOnce() -> R) -> R
	where
		T: Any + Send + Sync,
	{
		match self.enter(zone_type, data) {
			Some(stack) => ZONES.sync_scope(stack, f),
			None => f(),
		}
	}

	/// Data of the nearest enclosing zone of `zone_type`.
	pub fn lookup<T: Any + Send + Sync>(&self, zone_type: ZoneType) -> Option<Arc<T>> {
		self.current(zone_type).and_then(|zone| zone.data::<T>())
	}

	/// The nearest enclosing zone of `zone_type`.
	pub fn current(&self, zone_type: ZoneType) -> Option<Zone> {
		ZoneStack::current().find(self.id, zone_type).cloned()
	}

	fn enter<T: Any + Send + Sync>(&self, zone_type: ZoneType, data: Arc<T>) -> Option<ZoneStack> {
		let stack = ZoneStack::current();
		if stack.find(self.id, zone_type).is_some() {
			return None;
		}
		let zone = Zone {
			id: self.next_zone_id.fetch_add(1, Ordering::Relaxed),
			manager: self.id,
			zone_type,
			data,
		};
		Some(stack.push(zone))
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[derive(Debug, PartialEq)]
	struct Tag(&'static str);

	#[tokio::test]
	async fn data_visible_across_suspension_points() {
		let zones = ZoneManager::new();
		let seen = zones
			.run(ZoneType::Step, Arc::new(Tag("outer")), async {
				tokio::time::sleep(Duration::from_millis(1)).await;
				tokio::task::yield_now().await;
				zones.lookup::<Tag>(ZoneType::Step)
			})
			.await;
		assert_eq!(seen.as_deref(), Some(&Tag("outer")));
		assert!(zones.lookup::<Tag>(ZoneType::Step).is_none());
	}

	#[tokio::test]
	async fn nested_run_of_same_type_joins() {
		let zones = ZoneManager::new();
		let (outer_id, inner_id, inner_data) = zones
			.run(ZoneType::Api, Arc::new(Tag("outer")), async {
				let outer = zones.current(ZoneType::Api).unwrap().id();
				zones
					.run(ZoneType::Api, Arc::new(Tag("inner")), async {
						(
							outer,
							zones.current(ZoneType::Api).unwrap().id(),
							zones.lookup::<Tag>(ZoneType::Api),
						)
					})
					.await
			})
			.await;
		assert_eq!(outer_id, inner_id);
		assert_eq!(inner_data.as_deref(), Some(&Tag("outer")));
	}

	#[tokio::test]
	async fn different_types_stack() {
		let zones = ZoneManager::new();
		let both = zones
			.run(ZoneType::Step, Arc::new(Tag("step")), async {
				zones
					.run(ZoneType::Api, Arc::new(Tag("api")), async {
						(
							zones.lookup::<Tag>(ZoneType::Step),
							zones.lookup::<Tag>(ZoneType::Api),
						)
					})
					.await
			})
			.await;
		assert_eq!(both.0.as_deref(), Some(&Tag("step")));
		assert_eq!(both.1.as_deref(), Some(&Tag("api")));
	}

	#[tokio::test]
	async fn zone_purged_after_failure() {
		let zones = ZoneManager::new();
		let result: Result<(), &str> = zones
			.run(ZoneType::Step, Arc::new(Tag("failing")), async { Err("boom") })
			.await;
		assert!(result.is_err());
		assert!(zones.current(ZoneType::Step).is_none());
	}

	#[tokio::test]
	async fn spawned_task_is_outside_the_zone() {
		let zones = Arc::new(ZoneManager::new());
		let inner = Arc::clone(&zones);
		let seen = zones
			.run(ZoneType::Step, Arc::new(Tag("outer")), async move {
				tokio::spawn(async move { inner.lookup::<Tag>(ZoneType::Step) })
					.await
					.unwrap()
			})
			.await;
		assert!(seen.is_none());
	}

	#[tokio::test]
	async fn managers_do_not_see_each_other() {
		let a = ZoneManager::new();
		let b = ZoneManager::new();
		let seen = a
			.run(ZoneType::Api, Arc::new(Tag("a")), async {
				b.lookup::<Tag>(ZoneType::Api)
			})
			.await;
		assert!(seen.is_none());
	}

	#[test]
	fn sync_scope_lookup() {
		let zones = ZoneManager::new();
		let seen = zones.run_sync(ZoneType::Expect, Arc::new(Tag("sync")), || {
			zones.lookup::<Tag>(ZoneType::Expect)
		});
		assert_eq!(seen.as_deref(), Some(&Tag("sync")));
		assert!(zones.lookup::<Tag>(ZoneType::Expect).is_none());
	}

	#[tokio::test]
	async fn wrong_type_downcast_is_none() {
		let zones = ZoneManager::new();
		let seen = zones
			.run(ZoneType::Step, Arc::new(Tag("x")), async {
				zones.lookup::<String>(ZoneType::Step)
			})
			.await;
		assert!(seen.is_none());
	}
}
