use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use courier_api::{now_ms, BackendError, Message, MessageStore, NewMessage, Page};

// ═══════════════════════════════════════════════════════════════
//  MemoryMessageStore
// ═══════════════════════════════════════════════════════════════

/// In-memory message store. Nothing survives a restart. For tests and
/// single-process runs where the topic is in-process too.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    messages: BTreeMap<u64, Message>,
    next_id: u64,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            messages: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub async fn len(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl MessageStore for MemoryMessageStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn create(
        &self,
        message: NewMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Message, BackendError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let id = inner.next_id;
            inner.next_id = successor(id)?;
            let now = now_ms();
            let stored = Message {
                id,
                content: message.content,
                processed: false,
                created_at: now,
                updated_at: now,
            };
            inner.messages.insert(id, stored.clone());
            Ok(stored)
        })
    }

    fn upsert(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<Message, BackendError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            let now = now_ms();
            let mut stored = message;
            if stored.id == 0 {
                stored.id = inner.next_id;
            }
            if stored.id >= inner.next_id {
                inner.next_id = successor(stored.id)?;
            }
            if let Some(existing) = inner.messages.get(&stored.id) {
                stored.created_at = existing.created_at;
            } else if stored.created_at == 0 {
                stored.created_at = now;
            }
            stored.updated_at = now;
            inner.messages.insert(stored.id, stored.clone());
            Ok(stored)
        })
    }

    fn get(
        &self,
        id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Message>, BackendError>> + Send + '_>> {
        Box::pin(async move { Ok(self.inner.read().await.messages.get(&id).cloned()) })
    }

    fn list(
        &self,
        page: Page,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>, BackendError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner
                .messages
                .values()
                .skip(page.offset)
                .take(page.limit)
                .cloned()
                .collect())
        })
    }

    fn count_where_processed(
        &self,
        processed: bool,
    ) -> Pin<Box<dyn Future<Output = Result<i64, BackendError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner.messages.values().filter(|m| m.processed == processed).count() as i64)
        })
    }
}

fn successor(id: u64) -> Result<u64, BackendError> {
    id.checked_add(1)
        .ok_or_else(|| BackendError::logic(format!("message id {id} has no successor")))
}
