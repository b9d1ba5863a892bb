//! Client session
//!
//! A `ClientSession` drives one outbound connection to the broker. Requests
//! (`subscribe`, `unsubscribe`, `publish`) are correlated with their acks by
//! id, and published payloads are handed to the callback registered for their
//! topic.
//!
//! Task layout:
//! - a background reader owns the read half and routes every incoming frame,
//!   either to the waiter of a pending request or to a topic callback
//! - callers write through a shared writer half, one frame at a time
//!
//! Every request waits at most `request_timeout` for its ack. When the reader
//! stops (broker gone, framing error or `close()`), all waiters fail with
//! `ConnectionClosed`.

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientSettings;
use crate::transport::connection::{Connection, MessageReader, MessageWriter};
use crate::transport::message::{AuthPayload, Message, MessageKind};
use crate::utils::{Error, Result};

/// Longest topic prefix carried in a correlation id. The counter alone keeps
/// ids unique; the prefix only makes them readable in logs.
const CORRELATION_TOPIC_PREFIX: usize = 32;

/// Upper bound on flushing and shutting the socket down in `close()`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Receives the `data` of every message published to a subscribed topic.
pub type Callback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// What the reader applies to the session when a request's ack arrives.
enum OnAck {
    Nothing,
    Register(Callback),
    Unregister,
}

impl OnAck {
    /// Subscribe and unsubscribe requests hold their topic while in flight.
    fn holds_topic(&self) -> bool {
        !matches!(self, OnAck::Nothing)
    }
}

struct Pending {
    topic: String,
    expected: MessageKind,
    on_ack: OnAck,
    reply: oneshot::Sender<Result<()>>,
}

#[derive(Default)]
struct SessionState {
    subscriptions: HashMap<String, Callback>,
    pending: HashMap<String, Pending>,
    in_flight: HashSet<String>,
    closed: bool,
}

impl SessionState {
    /// Check that a request for `topic` may be sent now and reserve the topic
    /// if it changes the subscription.
    fn admit(&mut self, topic: &str, on_ack: &OnAck) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        // the broker drops these without an ack
        if topic.is_empty() {
            return Err(Error::MalformedPayload("topic must not be empty".into()));
        }
        if !on_ack.holds_topic() {
            return Ok(());
        }
        if self.in_flight.contains(topic) {
            return Err(Error::DuplicateRequest(topic.to_string()));
        }
        match on_ack {
            OnAck::Register(_) if self.subscriptions.contains_key(topic) => {
                return Err(Error::AlreadySubscribed(topic.to_string()));
            }
            OnAck::Unregister if !self.subscriptions.contains_key(topic) => {
                return Err(Error::NotSubscribed(topic.to_string()));
            }
            _ => {}
        }
        self.in_flight.insert(topic.to_string());
        Ok(())
    }

    /// Drop a pending request without resolving it. Returns false if the
    /// reader already retired it.
    fn abandon(&mut self, correlation_id: &str) -> bool {
        let Some(pending) = self.pending.remove(correlation_id) else {
            return false;
        };
        if pending.on_ack.holds_topic() {
            self.in_flight.remove(&pending.topic);
        }
        true
    }
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Abandons the pending entry if the request future is dropped early.
struct PendingGuard<'a> {
    state: &'a Mutex<SessionState>,
    correlation_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).abandon(self.correlation_id);
    }
}

pub struct ClientSession {
    client_id: String,
    writer: tokio::sync::Mutex<MessageWriter<TcpStream>>,
    state: Arc<Mutex<SessionState>>,
    next_id: AtomicU64,
    request_timeout: Duration,
    shutdown: CancellationToken,
    closing: AtomicBool,
}

impl ClientSession {
    /// Connect with the default client settings.
    pub async fn connect<A: ToSocketAddrs>(addr: A, credentials: AuthPayload) -> Result<Self> {
        Self::connect_with(addr, credentials, &ClientSettings::default()).await
    }

    /// Dial the broker, run the handshake and start the background reader.
    pub async fn connect_with<A: ToSocketAddrs>(
        addr: A,
        credentials: AuthPayload,
        settings: &ClientSettings,
    ) -> Result<Self> {
        let deadline = settings.handshake_timeout();
        let stream = match timeout(deadline, TcpStream::connect(addr)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(Error::Transport(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out connecting to the broker",
                )));
            }
        };
        let peer_addr = stream.peer_addr()?;

        let mut connection = Connection::outbound(stream, settings.max_message_bytes);
        connection.initiate_handshake(&credentials, deadline).await?;
        let (reader, writer) = connection.into_split()?;
        info!("{} connected to {peer_addr}", credentials.client_id);

        let state = Arc::new(Mutex::new(SessionState::default()));
        let shutdown = CancellationToken::new();
        tokio::spawn(read_loop(reader, state.clone(), shutdown.clone()));

        Ok(Self {
            client_id: credentials.client_id,
            writer: tokio::sync::Mutex::new(writer),
            state,
            next_id: AtomicU64::new(1),
            request_timeout: settings.request_timeout(),
            shutdown,
            closing: AtomicBool::new(false),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_connected(&self) -> bool {
        !self.shutdown.is_cancelled() && !lock(&self.state).closed
    }

    /// Topics with a registered callback, sorted.
    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = lock(&self.state).subscriptions.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Subscribe to `topic`. The callback is registered once the broker acks,
    /// before any message published to the topic afterwards is delivered.
    pub async fn subscribe<F>(&self, topic: &str, callback: F) -> Result<()>
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        let message = Message::subscribe(self.next_correlation_id(topic), topic)?;
        self.request(message, topic, OnAck::Register(Arc::new(callback)))
            .await?;
        debug!("{} subscribed to {topic}", self.client_id);
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let message = Message::unsubscribe(self.next_correlation_id(topic), topic)?;
        self.request(message, topic, OnAck::Unregister).await?;
        debug!("{} unsubscribed from {topic}", self.client_id);
        Ok(())
    }

    /// Publish `data` to `topic` and wait for the broker's ack. The ack means
    /// the broker accepted the message and attempted delivery.
    pub async fn publish(&self, topic: &str, data: impl Into<Bytes>) -> Result<()> {
        let message = Message::publish(self.next_correlation_id(topic), topic, data.into())?;
        self.request(message, topic, OnAck::Nothing).await
    }

    /// Stop the reader and shut the connection down. Later calls do nothing.
    ///
    /// Requests still writing are aborted with `ConnectionClosed`; the final
    /// flush is bounded so a stalled socket cannot hold `close()` up.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.state).closed = true;
        self.shutdown.cancel();
        let shut_down = timeout(CLOSE_TIMEOUT, async {
            self.writer.lock().await.close().await;
        })
        .await;
        if shut_down.is_err() {
            warn!("{} gave up flushing the connection on close", self.client_id);
        }
        info!("{} closed its session", self.client_id);
    }

    fn next_correlation_id(&self, topic: &str) -> String {
        correlation_id(self.next_id.fetch_add(1, Ordering::Relaxed), topic)
    }

    async fn request(&self, message: Message, topic: &str, on_ack: OnAck) -> Result<()> {
        let Some(expected) = message.kind.ack_kind() else {
            return Err(Error::UnexpectedReply {
                expected: message.kind,
                actual: message.kind,
            });
        };
        let correlation_id = message.correlation_id.clone();
        let (reply, mut rx) = oneshot::channel();

        {
            let mut state = lock(&self.state);
            state.admit(topic, &on_ack)?;
            state.pending.insert(
                correlation_id.clone(),
                Pending {
                    topic: topic.to_string(),
                    expected,
                    on_ack,
                    reply,
                },
            );
        }
        let _guard = PendingGuard {
            state: &self.state,
            correlation_id: &correlation_id,
        };

        let deadline = Instant::now() + self.request_timeout;
        let timed_out = || Error::RequestTimeout {
            correlation_id: correlation_id.clone(),
            after: self.request_timeout,
        };

        let sent = timeout_at(deadline, async {
            tokio::select! {
                _ = self.shutdown.cancelled() => Err(Error::ConnectionClosed),
                sent = async { self.writer.lock().await.send_one(message).await } => sent,
            }
        })
        .await;
        match sent {
            Ok(result) => result?,
            Err(_) => return Err(timed_out()),
        }

        match timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                if lock(&self.state).abandon(&correlation_id) {
                    warn!("request {correlation_id} timed out after {:?}", self.request_timeout);
                    return Err(timed_out());
                }
                // the reader resolved it as the deadline passed
                rx.try_recv().unwrap_or(Err(Error::ConnectionClosed))
            }
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// `"{n}:{topic}"`, with the topic cut to a short prefix on a char boundary.
pub(crate) fn correlation_id(n: u64, topic: &str) -> String {
    let mut end = topic.len().min(CORRELATION_TOPIC_PREFIX);
    while !topic.is_char_boundary(end) {
        end -= 1;
    }
    format!("{n}:{}", &topic[..end])
}

/// Marks the session dead however the reader exits, unwinding included.
struct ReaderGuard {
    state: Arc<Mutex<SessionState>>,
    shutdown: CancellationToken,
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        fail_pending(&self.state);
        self.shutdown.cancel();
    }
}

async fn read_loop(
    mut reader: MessageReader<TcpStream>,
    state: Arc<Mutex<SessionState>>,
    shutdown: CancellationToken,
) {
    let _guard = ReaderGuard {
        state: state.clone(),
        shutdown: shutdown.clone(),
    };
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = reader.receive_one() => received,
        };
        match received {
            Ok(message) => route(&state, message),
            Err(Error::ConnectionClosed) => {
                info!("broker closed the connection for {}", reader.identity());
                break;
            }
            Err(e) => {
                warn!("session reader for {} stopped: {e}", reader.identity());
                break;
            }
        }
    }
}

fn route(state: &Mutex<SessionState>, message: Message) {
    match message.kind {
        MessageKind::Publish => {
            let payload = match message.publish_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("dropping publish {}: {e}", message.correlation_id);
                    return;
                }
            };
            let callback = lock(state).subscriptions.get(&payload.topic).cloned();
            let Some(callback) = callback else {
                debug!("no callback for topic {}", payload.topic);
                return;
            };
            if catch_unwind(AssertUnwindSafe(|| callback(payload.data))).is_err() {
                warn!("callback for topic {} panicked", payload.topic);
            }
        }
        kind if kind.is_ack() => resolve(state, kind, &message.correlation_id),
        kind => debug!("ignoring {kind:?} from broker"),
    }
}

/// Retire the pending request an ack answers. Its effect on the subscription
/// table and the wake-up happen under one lock so that a publish following the
/// ack on the wire always sees the new callback.
fn resolve(state: &Mutex<SessionState>, kind: MessageKind, correlation_id: &str) {
    let mut state = lock(state);
    let Some(pending) = state.pending.remove(correlation_id) else {
        debug!("dropping unmatched {kind:?} {correlation_id}");
        return;
    };
    let Pending {
        topic,
        expected,
        on_ack,
        reply,
    } = pending;

    if on_ack.holds_topic() {
        state.in_flight.remove(&topic);
    }
    let outcome = if kind != expected {
        Err(Error::UnexpectedReply {
            expected,
            actual: kind,
        })
    } else {
        match on_ack {
            OnAck::Register(callback) => {
                state.subscriptions.insert(topic, callback);
            }
            OnAck::Unregister => {
                state.subscriptions.remove(&topic);
            }
            OnAck::Nothing => {}
        }
        Ok(())
    };
    // a waiter that already gave up is not an error
    let _ = reply.send(outcome);
}

fn fail_pending(state: &Mutex<SessionState>) {
    let mut state = lock(state);
    state.closed = true;
    state.in_flight.clear();
    for (_, pending) in state.pending.drain() {
        let _ = pending.reply.send(Err(Error::ConnectionClosed));
    }
}
