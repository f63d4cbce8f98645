pub mod echo;
pub mod engine;
pub mod queue;
pub mod registry;
pub mod subscriptions;

pub use echo::LocalEchoSet;
pub use engine::Engine;
pub use queue::MessageQueue;
pub use registry::ClientRegistry;
pub use subscriptions::SubscriptionManager;
