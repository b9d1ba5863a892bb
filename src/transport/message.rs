//! Protocol messages
//!
//! A [`Message`] is the unit exchanged on the wire: a kind, a caller-chosen
//! correlation id and an opaque payload. Request kinds are answered by their
//! matching ack kind carrying the same correlation id.
//!
//! Payloads are JSON documents whose shape depends on the kind:
//! - `Auth`: [`AuthPayload`]
//! - `Subscribe` / `Unsubscribe`: [`TopicPayload`]
//! - `Publish`: [`PublishPayload`]
//! - every ack: empty

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::utils::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Auth = 0,
    AuthAck = 1,
    Subscribe = 2,
    SubscribeAck = 3,
    Unsubscribe = 4,
    UnsubscribeAck = 5,
    Publish = 6,
    PublishAck = 7,
}

impl MessageKind {
    /// The kind that acknowledges this one, if this is a request kind.
    pub fn ack_kind(self) -> Option<MessageKind> {
        match self {
            MessageKind::Auth => Some(MessageKind::AuthAck),
            MessageKind::Subscribe => Some(MessageKind::SubscribeAck),
            MessageKind::Unsubscribe => Some(MessageKind::UnsubscribeAck),
            MessageKind::Publish => Some(MessageKind::PublishAck),
            _ => None,
        }
    }

    pub fn is_ack(self) -> bool {
        self.ack_kind().is_none()
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => MessageKind::Auth,
            1 => MessageKind::AuthAck,
            2 => MessageKind::Subscribe,
            3 => MessageKind::SubscribeAck,
            4 => MessageKind::Unsubscribe,
            5 => MessageKind::UnsubscribeAck,
            6 => MessageKind::Publish,
            7 => MessageKind::PublishAck,
            other => return Err(Error::Framing(format!("unknown message kind {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub correlation_id: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(kind: MessageKind, correlation_id: impl Into<String>, payload: Bytes) -> Self {
        Self {
            kind,
            correlation_id: correlation_id.into(),
            payload,
        }
    }

    pub fn auth(correlation_id: impl Into<String>, credentials: &AuthPayload) -> Result<Self> {
        Self::with_json(MessageKind::Auth, correlation_id, credentials)
    }

    pub fn subscribe(correlation_id: impl Into<String>, topic: &str) -> Result<Self> {
        Self::with_json(
            MessageKind::Subscribe,
            correlation_id,
            &TopicPayload::new(topic),
        )
    }

    pub fn unsubscribe(correlation_id: impl Into<String>, topic: &str) -> Result<Self> {
        Self::with_json(
            MessageKind::Unsubscribe,
            correlation_id,
            &TopicPayload::new(topic),
        )
    }

    pub fn publish(correlation_id: impl Into<String>, topic: &str, data: Bytes) -> Result<Self> {
        Self::with_json(
            MessageKind::Publish,
            correlation_id,
            &PublishPayload {
                topic: topic.to_string(),
                data,
            },
        )
    }

    fn with_json<T: Serialize>(
        kind: MessageKind,
        correlation_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        let body = serde_json::to_vec(payload)?;
        Ok(Self::new(kind, correlation_id, Bytes::from(body)))
    }

    /// The acknowledgement for this request, or `None` if this is already an ack.
    pub fn ack(&self) -> Option<Message> {
        self.kind
            .ack_kind()
            .map(|kind| Message::new(kind, self.correlation_id.clone(), Bytes::new()))
    }

    /// Decode the payload as JSON into `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| Error::MalformedPayload(format!("{:?} payload: {e}", self.kind)))
    }

    pub fn auth_payload(&self) -> Result<AuthPayload> {
        self.expect_kind(MessageKind::Auth)?;
        self.decode_payload()
    }

    pub fn topic_payload(&self) -> Result<TopicPayload> {
        if !matches!(
            self.kind,
            MessageKind::Subscribe | MessageKind::Unsubscribe
        ) {
            return Err(Error::MalformedPayload(format!(
                "{:?} does not carry a topic payload",
                self.kind
            )));
        }
        let payload: TopicPayload = self.decode_payload()?;
        require_topic(&payload.topic)?;
        Ok(payload)
    }

    pub fn publish_payload(&self) -> Result<PublishPayload> {
        self.expect_kind(MessageKind::Publish)?;
        let payload: PublishPayload = self.decode_payload()?;
        require_topic(&payload.topic)?;
        Ok(payload)
    }

    fn expect_kind(&self, kind: MessageKind) -> Result<()> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(Error::MalformedPayload(format!(
                "expected a {kind:?} payload, message is {:?}",
                self.kind
            )))
        }
    }
}

fn require_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::MalformedPayload("topic must not be empty".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub token: String,
    pub client_id: String,
}

impl AuthPayload {
    pub fn new(client_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client_id: client_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPayload {
    pub topic: String,
}

impl TopicPayload {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishPayload {
    pub topic: String,
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
}

/// `data` travels as standard base64 text inside the JSON payload.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
