pub mod engine;
pub mod peer;
pub mod registry;
pub mod topic;

pub use engine::Broker;
pub use peer::{ConnectionId, Peer};
pub use registry::{Subscriber, SubscriptionRegistry};
