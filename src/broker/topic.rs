//! Topic management
//!
//! A `Topic` holds the set of connection ids subscribed to one topic name.
//! Duplicate subscriptions are a no-op.
//!
//! Concurrency note: callers must synchronize access to `Topic` (the broker
//! keeps every topic inside the registry lock).

use std::collections::HashSet;

use crate::broker::peer::ConnectionId;

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashSet<ConnectionId>,
}

impl Topic {
    /// Create a new topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Add a subscriber to the topic. Returns false if it was already present.
    pub fn subscribe(&mut self, id: ConnectionId) -> bool {
        self.subscribers.insert(id)
    }

    /// Remove a subscriber from the topic. Returns false if it was absent.
    pub fn unsubscribe(&mut self, id: &ConnectionId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
