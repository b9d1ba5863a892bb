//! Subscription registry
//!
//! Maps topic names to the connections subscribed to them and owns the set of
//! live connections. The broker keeps one registry behind a single mutex, so
//! every mutation is serialized and each fan-out works from a snapshot taken
//! under that lock: connections added after the snapshot are not guaranteed
//! delivery, connections removed after it may still receive one.
//!
//! Each `Peer` records the topics it joined, which makes dropping a
//! connection proportional to its own subscriptions rather than to the number
//! of topics.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::broker::peer::{ConnectionId, Peer};
use crate::broker::topic::Topic;
use crate::transport::message::Message;
use crate::utils::{Error, Result};

/// One entry of a fan-out snapshot.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: ConnectionId,
    pub client_id: String,
    pub sender: UnboundedSender<Message>,
}

impl Subscriber {
    /// Queue a message for this subscriber's writer task.
    pub fn deliver(&self, message: Message) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| Error::ConnectionClosed)
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: HashMap<String, Topic>,
    connections: HashMap<ConnectionId, Peer>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, peer: Peer) {
        self.connections.insert(peer.id, peer);
    }

    /// Remove a connection from the live set and from every topic it joined.
    /// Topics left without subscribers are dropped.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<Peer> {
        let peer = self.connections.remove(id)?;
        for name in &peer.topics {
            self.detach(name, id);
        }
        Some(peer)
    }

    /// Subscribe a live connection to `topic`. Returns false if the
    /// connection is unknown. Subscribing twice is a no-op.
    pub fn add(&mut self, topic: &str, id: ConnectionId) -> bool {
        let Some(peer) = self.connections.get_mut(&id) else {
            return false;
        };
        peer.topics.insert(topic.to_string());
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(id);
        true
    }

    /// Unsubscribe a connection from `topic`. Returns false if it was not
    /// subscribed.
    pub fn remove(&mut self, topic: &str, id: &ConnectionId) -> bool {
        if let Some(peer) = self.connections.get_mut(id) {
            peer.topics.remove(topic);
        }
        self.detach(topic, id)
    }

    fn detach(&mut self, topic: &str, id: &ConnectionId) -> bool {
        let Some(entry) = self.topics.get_mut(topic) else {
            return false;
        };
        let removed = entry.unsubscribe(id);
        if entry.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    /// The subscribers of `topic` at this instant.
    pub fn snapshot(&self, topic: &str) -> Vec<Subscriber> {
        let Some(entry) = self.topics.get(topic) else {
            return Vec::new();
        };
        entry
            .subscribers
            .iter()
            .filter_map(|id| self.connections.get(id))
            .map(|peer| Subscriber {
                id: peer.id,
                client_id: peer.client_id.clone(),
                sender: peer.sender.clone(),
            })
            .collect()
    }

    /// Queue a message on one connection's outbound queue.
    pub fn send_to(&self, id: &ConnectionId, message: Message) -> Result<()> {
        let peer = self.connections.get(id).ok_or(Error::ConnectionClosed)?;
        peer.sender
            .send(message)
            .map_err(|_| Error::ConnectionClosed)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    pub fn is_subscribed(&self, topic: &str, id: &ConnectionId) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|entry| entry.subscribers.contains(id))
    }
}
