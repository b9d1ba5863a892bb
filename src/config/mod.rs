mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    AuthSettings, BrokerSettings, ClientSettings, LoggingSettings, ServerSettings, Settings,
};

/// Prefix of environment overrides, e.g. `TIDEMQ_SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "TIDEMQ";

/// Loads the configuration from `config/default` (if present) and environment
/// variables, then fills anything missing from `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}

#[cfg(test)]
mod tests;
