use std::future::Future;
use std::pin::Pin;

use crate::error::BackendError;
use crate::record::{ConsumedRecord, RecordPosition, TopicRecord};

/// Entry point to a message broker.
///
/// Writers are opened per publish and closed afterwards; readers live
/// for the lifetime of a consumer loop.
pub trait Broker: Send + Sync {
    /// Create the topic if it does not exist yet. Idempotent.
    fn ensure_topic(&self, topic: &str)
        -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;

    /// Open a fresh producer connection.
    fn open_writer(&self)
        -> Pin<Box<dyn Future<Output = Result<Box<dyn TopicWriter>, BackendError>> + Send + '_>>;

    /// Open a consumer for `topic` under consumer group `group`, positioned
    /// at the group's committed offset.
    fn open_reader(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TopicReader>, BackendError>> + Send + '_>>;
}

/// Producer side of a broker connection.
pub trait TopicWriter: Send {
    /// Write one record. Resolves once the broker has acknowledged it.
    fn write<'a>(
        &'a mut self,
        topic: &'a str,
        record: TopicRecord,
    ) -> Pin<Box<dyn Future<Output = Result<RecordPosition, BackendError>> + Send + 'a>>;

    /// Release the connection.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;
}

/// Consumer side of a broker connection, bound to one topic and group.
pub trait TopicReader: Send {
    /// Wait for the next record. Pending until one is available.
    fn fetch(&mut self)
        -> Pin<Box<dyn Future<Output = Result<ConsumedRecord, BackendError>> + Send + '_>>;

    /// Commit `position` for the group: the next delivery after a restart
    /// starts right after it.
    fn commit(
        &mut self,
        position: RecordPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;

    /// Move the fetch cursor back so the next `fetch` returns the record at
    /// `position` again. Does not touch the committed offset.
    fn rewind(
        &mut self,
        position: RecordPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;

    /// Release the reader.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;
}
