//! # TideMQ
//!
//! `tidemq` is a minimal, in-memory publish/subscribe broker and client
//! speaking a length-prefixed binary protocol over TCP.
//!
//! ## Core Modules
//!
//! - `transport`: frame codec, message types and the authenticated `Connection`.
//! - `auth`: the `Authenticator` capability and the token and JWT schemes.
//! - `broker`: accepts connections, owns the subscription registry and fans
//!   published messages out to subscribers.
//! - `client`: `ClientSession`, correlated requests and topic callbacks.
//! - `config`: layered configuration from file and environment.
//! - `utils`: the shared error type and logging setup.

pub mod auth;
pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;

pub use auth::{Authenticator, JwtAuthenticator, TokenAuthenticator};
pub use broker::Broker;
pub use client::ClientSession;
pub use transport::{AuthPayload, Message, MessageKind};
pub use utils::{Error, Result};

#[cfg(test)]
mod tests;
