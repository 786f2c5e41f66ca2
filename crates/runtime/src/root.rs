use std::future::Future;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection, private};
use crate::connection::Connection;
use crate::error::Result;

/// Guid of the implicit root object.
pub const ROOT_GUID: &str = "";

/// Implicit root of the object forest. The driver names it with guid `""`.
pub struct Root {
	base: ChannelOwnerImpl,
}

impl Root {
	pub(crate) fn new(connection: Arc<Connection>) -> Self {
		Self {
			base: ChannelOwnerImpl::new(
				ParentOrConnection::Connection(connection),
				"Root",
				Arc::from(ROOT_GUID),
				Value::Null,
			),
		}
	}

	/// Performs the `initialize` handshake and returns the driver's result.
	///
	/// The driver answers with the top-level objects, whose `__create__`
	/// events arrive before the result.
	#[track_caller]
	pub fn initialize(&self) -> impl Future<Output = Result<Value>> + Send {
		let sdk_language = self.base.connection().sdk_language().to_string();
		self.base
			.channel()
			.send("initialize", json!({ "sdkLanguage": sdk_language }))
	}
}

impl private::Sealed for Root {}

impl ChannelOwner for Root {
	fn base(&self) -> &ChannelOwnerImpl {
		&self.base
	}
}
