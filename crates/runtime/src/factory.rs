//! Construction of local proxies for `__create__` events.
//!
//! The connection does not know concrete wrapper types. It hands each
//! `__create__` to an [`ObjectFactory`], which maps the type name to a
//! constructor. Higher layers install their own factory and usually delegate
//! unknown types to [`BuiltinFactory`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection, private};
use crate::error::Result;
use crate::transport::{JsonPipe, LocalUtils};

/// Type alias for complex async return type
pub type AsyncChannelOwnerResult<'a> =
	Pin<Box<dyn Future<Output = Result<Arc<dyn ChannelOwner>>> + Send + 'a>>;

/// Factory trait for creating protocol objects.
pub trait ObjectFactory: Send + Sync {
	/// Create a protocol object from a `__create__` message.
	///
	/// The returned object is registered under `parent` by the connection.
	fn create_object(
		&self,
		parent: ParentOrConnection,
		type_name: String,
		guid: Arc<str>,
		initializer: Value,
	) -> AsyncChannelOwnerResult<'_>;
}

/// Knows the tunnel helper types; everything else becomes a [`GenericObject`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinFactory;

impl ObjectFactory for BuiltinFactory {
	fn create_object(
		&self,
		parent: ParentOrConnection,
		type_name: String,
		guid: Arc<str>,
		initializer: Value,
	) -> AsyncChannelOwnerResult<'_> {
		Box::pin(async move {
			let object: Arc<dyn ChannelOwner> = match type_name.as_str() {
				"JsonPipe" => Arc::new(JsonPipe::new(parent, guid, initializer)),
				"LocalUtils" => Arc::new(LocalUtils::new(parent, guid, initializer)),
				_ => Arc::new(GenericObject::new(parent, &type_name, guid, initializer)),
			};
			Ok(object)
		})
	}
}

/// Proxy for a type without a dedicated wrapper.
///
/// Supports raw calls through its [`Channel`](crate::Channel) and local
/// listeners for its events.
pub struct GenericObject {
	base: ChannelOwnerImpl,
}

impl GenericObject {
	pub fn new(
		parent: ParentOrConnection,
		type_name: &str,
		guid: Arc<str>,
		initializer: Value,
	) -> Self {
		Self {
			base: ChannelOwnerImpl::new(parent, type_name, guid, initializer),
		}
	}
}

impl private::Sealed for GenericObject {}

impl ChannelOwner for GenericObject {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}
