//! `tracing` setup shared by the server and client subcommands.

/// Install a plain `fmt` subscriber capped at the level named by `level`
/// (see [`parse_level`]). Installing twice is a no-op, so tests may call it
/// freely.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(level))
        .with_target(false)
        .try_init();
}

/// Map a configured level name to a `tracing::Level`.
///
/// Names are case-insensitive and surrounding whitespace is ignored; `warning`
/// is accepted for `warn`. Anything unrecognised falls back to `INFO`.
pub fn parse_level(name: &str) -> tracing::Level {
    match name.trim().to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" | "warning" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}
