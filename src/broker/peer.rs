//! Live inbound connections
//!
//! A `Peer` is the broker's handle on one authenticated connection: the
//! client id it presented, the sending side of its outbound queue (drained by
//! the connection's writer task) and the topics it has joined, so teardown
//! only visits those topics.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::transport::message::Message;

/// Broker-assigned identity of one accepted connection. Client ids are not
/// required to be unique, so the registry keys on this instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct Peer {
    pub id: ConnectionId,
    pub client_id: String,
    pub sender: UnboundedSender<Message>,
    pub topics: HashSet<String>,
    pub connected_at: DateTime<Utc>,
}

impl Peer {
    pub fn new(client_id: impl Into<String>, sender: UnboundedSender<Message>) -> Self {
        Self {
            id: ConnectionId::new(),
            client_id: client_id.into(),
            sender,
            topics: HashSet::new(),
            connected_at: Utc::now(),
        }
    }
}
