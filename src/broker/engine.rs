//! Broker engine
//!
//! This module contains the broker that accepts client sockets and drives them:
//! - one task per accepted socket runs the handshake, then the message loop
//! - one writer task per authenticated connection drains its outbound queue
//! - subscriptions and the live-connection set live in a single
//!   `SubscriptionRegistry` behind a mutex
//!
//! Concurrency and usage notes:
//! - The registry lock is never held across an `.await`. Fan-out only pushes
//!   onto unbounded per-connection queues, so a slow subscriber cannot stall
//!   a publisher or other subscribers.
//! - `close()` stops the accept loop. Connections that are already open keep
//!   running until their peers disconnect.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::broker::peer::{ConnectionId, Peer};
use crate::broker::registry::SubscriptionRegistry;
use crate::config::BrokerSettings;
use crate::transport::connection::{Connection, MessageWriter};
use crate::transport::message::{Message, MessageKind};
use crate::utils::{Error, Result};

/// Pause after a failed `accept` so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Broker {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    running: Arc<AtomicBool>,
}

struct Shared {
    settings: BrokerSettings,
    authenticator: Arc<dyn Authenticator>,
    registry: Mutex<SubscriptionRegistry>,
    permits: Arc<Semaphore>,
}

impl Broker {
    pub fn new(settings: BrokerSettings, authenticator: Arc<dyn Authenticator>) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_connections));
        Self {
            shared: Arc::new(Shared {
                settings,
                authenticator,
                registry: Mutex::new(SubscriptionRegistry::new()),
                permits,
            }),
            shutdown: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind `addr` and start accepting connections in the background.
    ///
    /// Returns once the listener is bound, with the address actually bound
    /// (useful with port 0).
    pub async fn serve<A: ToSocketAddrs>(&self, addr: A) -> Result<SocketAddr> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Transport(std::io::Error::other(
                "broker has been closed",
            )));
        }
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::Transport(std::io::Error::other(
                "broker is already serving",
            )));
        }

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        self.running.store(true, Ordering::SeqCst);
        info!("broker listening on {local_addr}");

        tokio::spawn(accept_loop(
            listener,
            self.shared.clone(),
            self.shutdown.clone(),
            self.running.clone(),
        ));
        Ok(local_addr)
    }

    /// Stop accepting new connections and wake everything waiting on
    /// [`Broker::closed`].
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            info!("broker shutting down");
            self.shutdown.cancel();
        }
    }

    /// Resolves once `close()` has been called.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry().connection_count()
    }

    pub fn topic_count(&self) -> usize {
        self.shared.registry().topic_count()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared.registry().subscriber_count(topic)
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    running: Arc<AtomicBool>,
) {
    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };

        let Ok(permit) = shared.permits.clone().try_acquire_owned() else {
            warn!(
                "refusing connection from {peer_addr}: {} connections already open",
                shared.settings.max_connections
            );
            drop(stream);
            continue;
        };

        debug!("accepted connection from {peer_addr}");
        let shared = shared.clone();
        tokio::spawn(async move {
            let connection = Connection::inbound(stream, shared.settings.max_message_bytes);
            shared.handle_connection(connection, peer_addr).await;
            drop(permit);
        });
    }

    running.store(false, Ordering::SeqCst);
    info!("broker stopped accepting connections");
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, SubscriptionRegistry> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Handshake, then read and dispatch messages until the connection ends.
    async fn handle_connection<S>(&self, mut connection: Connection<S>, peer_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let credentials = match connection
            .accept_handshake(self.authenticator.as_ref(), self.settings.auth_timeout())
            .await
        {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!("handshake with {peer_addr} failed: {e}");
                return;
            }
        };

        let (mut reader, writer) = match connection.into_split() {
            Ok(halves) => halves,
            Err(e) => {
                warn!("connection from {peer_addr} unusable after handshake: {e}");
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Peer::new(credentials.client_id, tx);
        let id = peer.id;
        let client_id = peer.client_id.clone();
        self.registry().register(peer);
        info!("{client_id} authenticated from {peer_addr} (connection {id})");

        let cancel = CancellationToken::new();
        let writer_task = tokio::spawn(write_loop(writer, rx, cancel.clone()));

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = reader.receive_one() => received,
            };
            match received {
                Ok(message) => self.dispatch(id, &client_id, message),
                Err(Error::ConnectionClosed) => {
                    info!("{client_id} disconnected");
                    break;
                }
                Err(e) => {
                    warn!("closing connection for {client_id}: {e}");
                    break;
                }
            }
        }

        // dropping the peer's queue sender lets the writer flush and shut down
        self.teardown(&id);
        if let Err(e) = writer_task.await {
            warn!("writer task for {client_id} failed: {e}");
        }
    }

    fn dispatch(&self, id: ConnectionId, client_id: &str, message: Message) {
        match message.kind {
            MessageKind::Auth => debug!("{client_id} is already authenticated"),
            MessageKind::Subscribe => self.handle_subscribe(id, client_id, &message),
            MessageKind::Unsubscribe => self.handle_unsubscribe(id, client_id, &message),
            MessageKind::Publish => self.handle_publish(id, client_id, message),
            kind => warn!("ignoring unexpected {kind:?} from {client_id}"),
        }
    }

    fn handle_subscribe(&self, id: ConnectionId, client_id: &str, message: &Message) {
        let topic = match message.topic_payload() {
            Ok(payload) => payload.topic,
            Err(e) => {
                warn!("dropping subscribe from {client_id}: {e}");
                return;
            }
        };

        {
            let mut registry = self.registry();
            registry.add(&topic, id);
            // queued under the same lock so no fan-out can overtake the ack
            if let Some(ack) = message.ack() {
                if let Err(e) = registry.send_to(&id, ack) {
                    debug!("could not acknowledge subscribe from {client_id}: {e}");
                }
            }
        }
        info!("{client_id} subscribed to {topic}");
    }

    fn handle_unsubscribe(&self, id: ConnectionId, client_id: &str, message: &Message) {
        let topic = match message.topic_payload() {
            Ok(payload) => payload.topic,
            Err(e) => {
                warn!("dropping unsubscribe from {client_id}: {e}");
                return;
            }
        };

        {
            let mut registry = self.registry();
            if !registry.remove(&topic, &id) {
                debug!("{client_id} was not subscribed to {topic}");
            }
            if let Some(ack) = message.ack() {
                if let Err(e) = registry.send_to(&id, ack) {
                    debug!("could not acknowledge unsubscribe from {client_id}: {e}");
                }
            }
        }
        info!("{client_id} unsubscribed from {topic}");
    }

    fn handle_publish(&self, id: ConnectionId, client_id: &str, message: Message) {
        let topic = match message.publish_payload() {
            Ok(payload) => payload.topic,
            Err(e) => {
                warn!("dropping publish from {client_id}: {e}");
                return;
            }
        };

        let subscribers = self.registry().snapshot(&topic);
        let mut delivered = 0usize;
        for subscriber in &subscribers {
            match subscriber.deliver(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "failed to deliver {topic} message to {}: {e}",
                    subscriber.client_id
                ),
            }
        }
        debug!(
            "{client_id} published to {topic}: {delivered}/{} subscribers",
            subscribers.len()
        );

        if let Some(ack) = message.ack() {
            if let Err(e) = self.registry().send_to(&id, ack) {
                debug!("could not acknowledge publish from {client_id}: {e}");
            }
        }
    }

    /// Remove the connection from every topic it joined and from the live set.
    fn teardown(&self, id: &ConnectionId) {
        let Some(peer) = self.registry().unregister(id) else {
            return;
        };
        let lifetime = Utc::now() - peer.connected_at;
        info!(
            "cleaned up {} ({} subscriptions, connected for {}s)",
            peer.client_id,
            peer.topics.len(),
            lifetime.num_seconds()
        );
    }
}

async fn write_loop<S>(
    mut writer: MessageWriter<S>,
    mut queue: UnboundedReceiver<Message>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = queue.recv().await {
        if let Err(e) = writer.send_one(message).await {
            warn!("failed to send message to {}: {e}", writer.identity());
            cancel.cancel();
            break;
        }
    }
    writer.close().await;
    debug!("send loop closed for {}", writer.identity());
}
