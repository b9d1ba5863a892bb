//! The `client` module provides [`ClientSession`], the embedding application's
//! handle on one authenticated connection to a broker.

pub mod session;

pub use session::{Callback, ClientSession};
