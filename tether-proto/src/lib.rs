//! Wire protocol for tether remote objects.
//!
//! Values are encoded with a small self-delimiting tagged codec (see
//! [`codec`]) suitable for any reliable byte stream. Every request and every
//! response is one encoded tuple whose first element is its verb or status
//! code (see [`Message`] and [`Response`]).

pub mod codec;
mod message;
mod value;

pub use codec::{CodecError, Limits, decode, encode};
pub use message::{FaultInfo, Message, MessageError, Response, status, verb};
pub use value::{Handle, WireValue};

/// Default TCP port for a tether server.
pub const DEFAULT_PORT: u16 = 8888;
