//! Protocol engine for out-of-process drivers.
//!
//! This crate turns a message channel to a driver into a tree of local proxy
//! objects with call/response/event semantics:
//!
//! - **Connection**: call-id correlation, the object registry, event dispatch
//! - **ChannelOwner**: the local proxy of one remote object and its listeners
//! - **Zones**: task-local call context (api call, step) joined by nested calls
//! - **Transport**: pipe, WebSocket and tunneled message channels
//! - **Timeouts**: hierarchical default resolution
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   wrappers   │  Domain objects built on ChannelOwnerImpl
//! └──────┬───────┘
//!        │ implements ObjectFactory
//! ┌──────▼───────┐
//! │  pw-engine   │  This crate
//! │  ┌────────┐  │
//! │  │ Conn   │  │  Correlation, registry, dispatch
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Zones  │  │  wrap_api_call, instrumentation
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  Pipe/WebSocket/Tunnel transport
//! │  └────────┘  │
//! └──────────────┘
//! ```
//!
//! # Decoupling via ObjectFactory
//!
//! The `Connection` builds proxies through an `ObjectFactory` and checks every
//! payload through a `SchemaValidator`, so this crate never names a concrete
//! remote type beyond the tunnel helpers.

pub mod api_call;
pub mod bootstrap;
pub mod channel;
pub mod channel_owner;
pub mod config;
pub mod connection;
pub mod error;
pub mod factory;
pub mod instrumentation;
pub mod root;
pub mod subscription;
pub mod timeout;
pub mod transport;
pub mod validation;
pub mod zone;

pub use api_call::{ApiZone, StackFrame, StepZone};
pub use bootstrap::{TransportStrategy, select_strategy};
pub use channel::{Channel, ResponseFuture};
pub use channel_owner::{
	CLOSED_EVENT, ChannelOwner, ChannelOwnerImpl, DISPOSE_EVENT, DisposeReason, Listener,
	ParentOrConnection, Subscription,
};
pub use config::{ConnectOptions, EngineConfig};
pub use connection::{Connection, ConnectionOptions, ObjectStore};
pub use error::{Error, Result};
pub use factory::{AsyncChannelOwnerResult, BuiltinFactory, GenericObject, ObjectFactory};
pub use instrumentation::{ApiCallListener, Instrumentation, LoggingListener};
pub use pw_wire as wire;
pub use root::Root;
pub use subscription::{SubscriptionChange, SubscriptionManager};
pub use timeout::{TimeoutSettings, with_timeout};
pub use transport::{
	Headers, JsonPipe, LocalUtils, PipeTransport, PipeTransportReceiver, PipeTransportSender,
	Transport, TransportEvent, TransportEvents, TunnelTransport, WebSocketTransport,
};
pub use validation::{
	Direction, SchemaRegistry, SchemaValidator, ValidationContext, ValidationError, ValidatorFn,
	validators,
};
pub use zone::{Zone, ZoneManager, ZoneType};
