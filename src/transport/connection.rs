//! Authenticated connections
//!
//! A [`Connection`] owns one byte stream and the framing state on top of it.
//! It starts `Unauthenticated`; only the handshake may touch the wire until it
//! reaches `Authenticated`, and it ends `Closed`.
//!
//! - Inbound (broker side): [`Connection::accept_handshake`] waits for `Auth`
//!   within a deadline, validates it, and replies `AuthAck`.
//! - Outbound (client side): [`Connection::initiate_handshake`] sends `Auth` and
//!   waits for the matching `AuthAck`.
//!
//! Once authenticated, a connection can be used directly with `receive_one` /
//! `send_one`, or split into a [`MessageReader`] and [`MessageWriter`] so that
//! reads and writes run on separate tasks.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::transport::codec::FrameCodec;
use crate::transport::message::{AuthPayload, Message, MessageKind};
use crate::utils::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

type FramedStream<S> = Framed<S, FrameCodec>;

pub struct Connection<S> {
    framed: FramedStream<S>,
    role: Role,
    state: ConnectionState,
    identity: Option<String>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a socket accepted by the broker.
    pub fn inbound(stream: S, max_message_bytes: usize) -> Self {
        Self::new(stream, Role::Inbound, max_message_bytes)
    }

    /// Wrap a socket dialed by a client.
    pub fn outbound(stream: S, max_message_bytes: usize) -> Self {
        Self::new(stream, Role::Outbound, max_message_bytes)
    }

    fn new(stream: S, role: Role, max_message_bytes: usize) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::new(max_message_bytes)),
            role,
            state: ConnectionState::Unauthenticated,
            identity: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    /// The client id established by the handshake.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Broker side of the handshake. On any failure the connection is closed
    /// without a reply.
    pub async fn accept_handshake(
        &mut self,
        authenticator: &dyn Authenticator,
        deadline: Duration,
    ) -> Result<AuthPayload> {
        self.expect_handshake(Role::Inbound)?;
        match self.try_accept_handshake(authenticator, deadline).await {
            Ok(credentials) => Ok(credentials),
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn try_accept_handshake(
        &mut self,
        authenticator: &dyn Authenticator,
        deadline: Duration,
    ) -> Result<AuthPayload> {
        let request = timeout(deadline, self.read_frame())
            .await
            .map_err(|_| Error::AuthTimeout(deadline))??;

        if request.kind != MessageKind::Auth {
            debug!("{:?} received before authentication", request.kind);
            return Err(Error::NotAuthenticated);
        }

        let credentials = request.auth_payload()?;
        if credentials.client_id.is_empty() {
            return Err(Error::AuthRejected("client id must not be empty".into()));
        }
        authenticator.authenticate(&credentials).await?;

        if let Some(ack) = request.ack() {
            self.write_frame(ack).await?;
        }
        self.identity = Some(credentials.client_id.clone());
        self.state = ConnectionState::Authenticated;
        Ok(credentials)
    }

    /// Client side of the handshake: send `Auth`, then require an `AuthAck`
    /// carrying the same correlation id.
    pub async fn initiate_handshake(
        &mut self,
        credentials: &AuthPayload,
        deadline: Duration,
    ) -> Result<()> {
        self.expect_handshake(Role::Outbound)?;
        match self.try_initiate_handshake(credentials, deadline).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn try_initiate_handshake(
        &mut self,
        credentials: &AuthPayload,
        deadline: Duration,
    ) -> Result<()> {
        let correlation_id = format!("auth:{}", Uuid::new_v4());
        self.write_frame(Message::auth(correlation_id.clone(), credentials)?)
            .await?;

        let reply = match timeout(deadline, self.read_frame()).await {
            Err(_) => return Err(Error::AuthTimeout(deadline)),
            // the broker closes without replying when it rejects credentials
            Ok(Err(Error::ConnectionClosed)) => {
                return Err(Error::AuthRejected(
                    "broker closed the connection during the handshake".into(),
                ));
            }
            Ok(reply) => reply?,
        };

        if reply.kind != MessageKind::AuthAck {
            return Err(Error::HandshakeFailed(format!(
                "expected AuthAck, got {:?}",
                reply.kind
            )));
        }
        if reply.correlation_id != correlation_id {
            return Err(Error::HandshakeFailed(format!(
                "AuthAck correlation id '{}' does not match '{correlation_id}'",
                reply.correlation_id
            )));
        }

        self.identity = Some(credentials.client_id.clone());
        self.state = ConnectionState::Authenticated;
        Ok(())
    }

    fn expect_handshake(&self, role: Role) -> Result<()> {
        match self.state {
            ConnectionState::Closed => return Err(Error::ConnectionClosed),
            ConnectionState::Authenticated => {
                return Err(Error::HandshakeFailed("already authenticated".into()));
            }
            ConnectionState::Unauthenticated => {}
        }
        if self.role != role {
            return Err(Error::HandshakeFailed(format!(
                "{:?} connection cannot run the {role:?} handshake",
                self.role
            )));
        }
        Ok(())
    }

    /// Wait for the next message.
    pub async fn receive_one(&mut self) -> Result<Message> {
        self.ensure_authenticated()?;
        self.read_frame().await
    }

    pub async fn send_one(&mut self, message: Message) -> Result<()> {
        self.ensure_authenticated()?;
        self.write_frame(message).await
    }

    fn ensure_authenticated(&self) -> Result<()> {
        match self.state {
            ConnectionState::Authenticated => Ok(()),
            ConnectionState::Unauthenticated => Err(Error::NotAuthenticated),
            ConnectionState::Closed => Err(Error::ConnectionClosed),
        }
    }

    async fn read_frame(&mut self) -> Result<Message> {
        match self.framed.next().await {
            Some(result) => result,
            None => Err(Error::ConnectionClosed),
        }
    }

    async fn write_frame(&mut self, message: Message) -> Result<()> {
        self.framed.send(message).await
    }

    /// Flush and shut the stream down. Later calls do nothing.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        if let Err(e) = SinkExt::<Message>::close(&mut self.framed).await {
            debug!("error closing connection: {e}");
        }
    }

    /// Split an authenticated connection into independent read and write halves.
    pub fn into_split(self) -> Result<(MessageReader<S>, MessageWriter<S>)> {
        self.ensure_authenticated()?;
        let identity = self.identity.unwrap_or_default();
        let (sink, stream) = self.framed.split();
        Ok((
            MessageReader {
                stream,
                identity: identity.clone(),
            },
            MessageWriter {
                sink,
                identity,
                closed: false,
            },
        ))
    }
}

/// Read half of an authenticated connection.
pub struct MessageReader<S> {
    stream: SplitStream<FramedStream<S>>,
    identity: String,
}

impl<S> MessageReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn receive_one(&mut self) -> Result<Message> {
        match self.stream.next().await {
            Some(result) => result,
            None => Err(Error::ConnectionClosed),
        }
    }
}

/// Write half of an authenticated connection. Owns shutting the stream down.
pub struct MessageWriter<S> {
    sink: SplitSink<FramedStream<S>, Message>,
    identity: String,
    closed: bool,
}

impl<S> MessageWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn send_one(&mut self, message: Message) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.sink.send(message).await
    }

    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.sink.close().await {
            debug!("error closing connection for {}: {e}", self.identity);
        }
    }
}
