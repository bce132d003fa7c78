pub mod broker;
pub mod error;
pub mod message;
pub mod record;
pub mod store;

pub use broker::{Broker, TopicReader, TopicWriter};
pub use error::{BackendError, ErrorKind};
pub use message::{Message, NewMessage, Page};
pub use record::{ConsumedRecord, RecordPosition, TopicRecord};
pub use store::MessageStore;

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
