pub mod keys;
pub mod pool;
pub mod pubsub;
pub mod scripts;

pub use keys::Keys;
pub use pool::ConnectionPool;
pub use pubsub::{Delivery, PubSubCoordinator};
