pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod lifecycle;
pub mod producer;
pub mod service;
pub mod topic;

#[cfg(test)]
mod testing;

pub use bootstrap::{Backends, Runtime};
pub use consumer::{ConsumerLoop, ConsumerSettings, ConsumerStats, RedeliveryPolicy};
pub use error::EngineError;
pub use lifecycle::{Lifecycle, ShutdownReport};
pub use producer::{Producer, PublishError};
pub use service::{MessageService, ServiceError};
pub use topic::MemoryBroker;
