pub mod client;
pub mod message;

pub use client::ClientRecord;
pub use message::QueuedMessage;
