//! The `transport` module is responsible for everything that touches the wire.
//!
//! It defines the protocol messages exchanged between clients and the broker,
//! the length-prefixed frame codec that carries them over a byte stream, and
//! the connection state machine that performs the authentication handshake
//! before any other traffic is allowed.

pub mod codec;
pub mod connection;
pub mod message;

pub use codec::FrameCodec;
pub use connection::{Connection, ConnectionState, MessageReader, MessageWriter, Role};
pub use message::{AuthPayload, Message, MessageKind, PublishPayload, TopicPayload};
