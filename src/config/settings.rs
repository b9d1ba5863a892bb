use std::time::Duration;

use serde::Deserialize;

use crate::transport::codec::DEFAULT_MAX_MESSAGE_BYTES;

/// Top-level configuration settings for the application.
///
/// Groups the listener, broker, authentication, client session and logging
/// settings.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub auth: AuthSettings,
    pub client: ClientSettings,
    pub logging: LoggingSettings,
}

/// Host and port the broker binds to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Operational limits of the broker.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub max_connections: usize,
    pub max_message_bytes: usize,
    pub auth_timeout_ms: u64,
}

impl BrokerSettings {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }
}

/// Credentials policy. When `jwt_secret` is set, tokens are validated as
/// JWTs instead of being compared with `token`.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    pub token: String,
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    pub request_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub max_message_bytes: usize,
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional; missing values are filled from `Settings::default()`.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub auth: Option<PartialAuthSettings>,
    pub client: Option<PartialClientSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub max_message_bytes: Option<usize>,
    pub auth_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialAuthSettings {
    pub token: Option<String>,
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialClientSettings {
    pub request_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub max_message_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8081,
            },
            broker: BrokerSettings::default(),
            auth: AuthSettings {
                token: "password".to_string(),
                jwt_secret: None,
            },
            client: ClientSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            auth_timeout_ms: 10_000,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let auth = self.auth.unwrap_or_default();
        let client = self.client.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .max_connections
                    .unwrap_or(defaults.broker.max_connections),
                max_message_bytes: broker
                    .max_message_bytes
                    .unwrap_or(defaults.broker.max_message_bytes),
                auth_timeout_ms: broker
                    .auth_timeout_ms
                    .unwrap_or(defaults.broker.auth_timeout_ms),
            },
            auth: AuthSettings {
                token: auth.token.unwrap_or(defaults.auth.token),
                jwt_secret: auth.jwt_secret.or(defaults.auth.jwt_secret),
            },
            client: ClientSettings {
                request_timeout_ms: client
                    .request_timeout_ms
                    .unwrap_or(defaults.client.request_timeout_ms),
                handshake_timeout_ms: client
                    .handshake_timeout_ms
                    .unwrap_or(defaults.client.handshake_timeout_ms),
                max_message_bytes: client
                    .max_message_bytes
                    .unwrap_or(defaults.client.max_message_bytes),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(defaults.logging.level),
            },
        }
    }
}
