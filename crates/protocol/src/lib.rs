//! Wire types for the driver protocol.
//!
//! This crate contains the serde-serializable shapes exchanged with a driver
//! over any transport. They are the "protocol layer": data as it appears on the
//! wire, with no behavior beyond serialization.
//!
//! # Message kinds
//!
//! - [`Request`]: client to server call, addressed to an object GUID
//! - [`Response`]: server to client result for one call id
//! - [`Event`]: server to client notification, addressed to an object GUID
//!
//! Object lifecycle rides on reserved event names, see [`lifecycle`].

pub mod error;
pub mod lifecycle;
pub mod message;
pub mod metadata;

pub use error::{ErrorPayload, SerializedError};
pub use lifecycle::{ADOPT, AdoptParams, CREATE, CreateParams, DISPOSE, DisposeParams};
pub use message::{Event, Message, Request, Response};
pub use metadata::{Location, Metadata};
