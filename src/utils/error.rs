//! The `error` module defines the error type shared by every layer of `tidemq`.
//!
//! Transport, framing and handshake failures end the connection they occur on.
//! Payload and request-level failures are reported to the caller (or logged by
//! the broker) while the connection keeps running. Use [`Error::is_fatal`] to
//! tell the two apart.

use std::io;
use std::time::Duration;

use crate::transport::message::MessageKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("framing error: {0}")]
    Framing(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("no authentication received within {0:?}")]
    AuthTimeout(Duration),
    #[error("connection is not authenticated")]
    NotAuthenticated,
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("a subscribe/unsubscribe request for topic '{0}' is already outstanding")]
    DuplicateRequest(String),
    #[error("already subscribed to topic '{0}'")]
    AlreadySubscribed(String),
    #[error("not subscribed to topic '{0}'")]
    NotSubscribed(String),
    #[error("no acknowledgement for request {correlation_id} within {after:?}")]
    RequestTimeout {
        correlation_id: String,
        after: Duration,
    },
    #[error("expected {expected:?} reply, got {actual:?}")]
    UnexpectedReply {
        expected: MessageKind,
        actual: MessageKind,
    },
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error ends the connection it was raised on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::ConnectionClosed
                | Error::Framing(_)
                | Error::AuthRejected(_)
                | Error::AuthTimeout(_)
                | Error::HandshakeFailed(_)
        )
    }
}
