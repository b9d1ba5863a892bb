use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::Authenticator;
use crate::transport::message::AuthPayload;
use crate::utils::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Validates HS256 tokens signed with a shared secret. The `sub` claim must
/// equal the client id presented alongside the token.
#[derive(Clone)]
pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::default(),
        }
    }

    /// Mint a token for `client_id` that expires after `ttl`.
    pub fn issue(&self, client_id: &str, ttl: Duration) -> Result<String> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::AuthRejected(format!("invalid token lifetime: {e}")))?;
        let claims = Claims {
            sub: client_id.to_string(),
            exp: (chrono::Utc::now() + ttl).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| Error::AuthRejected(format!("failed to sign token: {e}")))
    }
}

impl std::fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthenticator")
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, credentials: &AuthPayload) -> Result<()> {
        let data = decode::<Claims>(&credentials.token, &self.decoding, &self.validation)
            .map_err(|e| Error::AuthRejected(format!("invalid token: {e}")))?;

        if data.claims.sub != credentials.client_id {
            return Err(Error::AuthRejected(format!(
                "token subject '{}' does not match client id '{}'",
                data.claims.sub, credentials.client_id
            )));
        }
        Ok(())
    }
}
