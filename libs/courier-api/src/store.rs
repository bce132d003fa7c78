use std::future::Future;
use std::pin::Pin;

use crate::error::BackendError;
use crate::message::{Message, NewMessage, Page};

/// Persistence gateway for messages.
///
/// The consumer loop only needs `upsert`; the stats query only needs
/// `count_where_processed`. `create`, `get` and `list` serve the submit
/// and read-back paths. Implementations must give read-your-writes
/// consistency within one process.
pub trait MessageStore: Send + Sync {
    /// Prepare the backend (create directories, tables). Called once at startup.
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>>;

    /// Store a new message with `processed = false`; storage assigns the id.
    fn create(
        &self,
        message: NewMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Message, BackendError>> + Send + '_>>;

    /// Insert or replace the record with `message.id`. Last write wins.
    fn upsert(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<Message, BackendError>> + Send + '_>>;

    fn get(&self, id: u64)
        -> Pin<Box<dyn Future<Output = Result<Option<Message>, BackendError>> + Send + '_>>;

    /// Messages ordered by id ascending, windowed by `page`.
    fn list(&self, page: Page)
        -> Pin<Box<dyn Future<Output = Result<Vec<Message>, BackendError>> + Send + '_>>;

    fn count_where_processed(
        &self,
        processed: bool,
    ) -> Pin<Box<dyn Future<Output = Result<i64, BackendError>> + Send + '_>>;
}
