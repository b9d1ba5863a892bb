use std::time::Duration;

use super::{Authenticator, JwtAuthenticator, TokenAuthenticator, from_settings};
use crate::config::AuthSettings;
use crate::transport::message::AuthPayload;
use crate::utils::Error;

#[tokio::test]
async fn token_authenticator_accepts_matching_token() {
    let auth = TokenAuthenticator::new("password");
    assert!(
        auth.authenticate(&AuthPayload::new("sub1", "password"))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn token_authenticator_rejects_wrong_token() {
    let auth = TokenAuthenticator::new("password");
    let err = auth
        .authenticate(&AuthPayload::new("sub1", "hunter2"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthRejected(_)));
}

#[tokio::test]
async fn jwt_authenticator_accepts_token_for_same_client() {
    let auth = JwtAuthenticator::new(b"secret");
    let token = auth.issue("sub1", Duration::from_secs(60)).unwrap();
    assert!(
        auth.authenticate(&AuthPayload::new("sub1", token))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn jwt_authenticator_rejects_subject_mismatch() {
    let auth = JwtAuthenticator::new(b"secret");
    let token = auth.issue("sub1", Duration::from_secs(60)).unwrap();
    let err = auth
        .authenticate(&AuthPayload::new("someone-else", token))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthRejected(msg) if msg.contains("does not match")));
}

#[tokio::test]
async fn jwt_authenticator_rejects_foreign_signature() {
    let issuer = JwtAuthenticator::new(b"other-secret");
    let token = issuer.issue("sub1", Duration::from_secs(60)).unwrap();

    let auth = JwtAuthenticator::new(b"secret");
    let err = auth
        .authenticate(&AuthPayload::new("sub1", token))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthRejected(_)));
}

#[tokio::test]
async fn jwt_authenticator_rejects_garbage() {
    let auth = JwtAuthenticator::new(b"secret");
    let err = auth
        .authenticate(&AuthPayload::new("sub1", "invalid.token.here"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthRejected(_)));
}

#[tokio::test]
async fn settings_select_scheme() {
    let token_only = AuthSettings {
        token: "password".into(),
        jwt_secret: None,
    };
    let auth = from_settings(&token_only);
    assert!(
        auth.authenticate(&AuthPayload::new("a", "password"))
            .await
            .is_ok()
    );

    let jwt = AuthSettings {
        token: "password".into(),
        jwt_secret: Some("secret".into()),
    };
    let auth = from_settings(&jwt);
    // the shared token is no longer accepted once a JWT secret is configured
    assert!(
        auth.authenticate(&AuthPayload::new("a", "password"))
            .await
            .is_err()
    );
}
