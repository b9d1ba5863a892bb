use super::error::Error;
use super::logging;
use std::time::Duration;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
}

#[test]
fn parse_level_falls_back_to_info() {
    assert_eq!(logging::parse_level("WARNING"), tracing::Level::WARN);
    assert_eq!(logging::parse_level(" trace "), tracing::Level::TRACE);
    assert_eq!(logging::parse_level("verbose"), tracing::Level::INFO);
}

#[test]
fn fatal_errors_end_the_connection() {
    assert!(Error::ConnectionClosed.is_fatal());
    assert!(Error::Framing("too big".into()).is_fatal());
    assert!(Error::AuthTimeout(Duration::from_secs(1)).is_fatal());
    assert!(!Error::MalformedPayload("bad json".into()).is_fatal());
    assert!(!Error::DuplicateRequest("news".into()).is_fatal());
    assert!(!Error::NotAuthenticated.is_fatal());
}
