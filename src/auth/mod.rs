//! Connection-level authentication
//!
//! The broker hands every `Auth` payload to an [`Authenticator`] and treats
//! the answer as opaque policy. Implementations are shared by all connection
//! handlers and may be called concurrently.
//!
//! Two schemes ship with the crate:
//! - [`TokenAuthenticator`]: a single shared token
//! - [`JwtAuthenticator`]: HS256 tokens whose subject must match the client id

mod jwt;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AuthSettings;
use crate::transport::message::AuthPayload;
use crate::utils::{Error, Result};

pub use jwt::{Claims, JwtAuthenticator};

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Approve the credentials, or return [`Error::AuthRejected`] with a reason.
    async fn authenticate(&self, credentials: &AuthPayload) -> Result<()>;
}

/// Accepts any client presenting the configured shared token.
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    token: String,
}

impl TokenAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, credentials: &AuthPayload) -> Result<()> {
        if credentials.token == self.token {
            Ok(())
        } else {
            Err(Error::AuthRejected("invalid token".into()))
        }
    }
}

/// Build the authenticator selected by configuration. A JWT secret takes
/// precedence over the shared token.
pub fn from_settings(settings: &AuthSettings) -> Arc<dyn Authenticator> {
    match &settings.jwt_secret {
        Some(secret) => Arc::new(JwtAuthenticator::new(secret.as_bytes())),
        None => Arc::new(TokenAuthenticator::new(settings.token.clone())),
    }
}

#[cfg(test)]
mod tests;
