use std::sync::Arc;

use courier_api::{BackendError, Message, MessageStore, NewMessage, Page};

use crate::producer::{Producer, PublishError};

/// Page size used when the caller does not pass one.
pub const DEFAULT_LIST_LIMIT: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("storage: {0}")]
    Storage(#[from] BackendError),

    #[error("publish: {0}")]
    Publish(#[from] PublishError),

    #[error("message {0} not found")]
    NotFound(u64),
}

impl ServiceError {
    /// Short name of the stage that failed, for logs and exit output.
    pub fn stage(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::Storage(_) => "storage",
            ServiceError::Publish(_) => "publish",
            ServiceError::NotFound(_) => "lookup",
        }
    }
}

/// Submit and read-back entry points over a store and a producer.
#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    producer: Producer,
    topic: String,
}

impl MessageService {
    pub fn new(store: Arc<dyn MessageStore>, producer: Producer, topic: impl Into<String>) -> Self {
        Self {
            store,
            producer,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Store `content` with `processed = false` and publish it.
    ///
    /// The record is created before publishing so it carries its id on
    /// the topic. If publishing fails the record stays unprocessed and the
    /// error is returned.
    pub async fn submit(&self, content: &str) -> Result<Message, ServiceError> {
        if content.trim().is_empty() {
            return Err(ServiceError::Validation("content must not be empty".into()));
        }

        let message = self.store.create(NewMessage::new(content)).await?;
        tracing::info!(id = message.id, "message stored");

        let key = message.id.to_string();
        match self.producer.publish(&self.topic, &key, &message).await {
            Ok(position) => {
                tracing::info!(id = message.id, topic = %self.topic, %position, "message published");
                Ok(message)
            }
            Err(e) => {
                tracing::error!(id = message.id, topic = %self.topic, error = %e, "message stored but not published");
                Err(e.into())
            }
        }
    }

    /// Number of messages the consumer has written back.
    pub async fn processed_count(&self) -> Result<i64, ServiceError> {
        Ok(self.store.count_where_processed(true).await?)
    }

    pub async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Message>, ServiceError> {
        if offset < 0 {
            return Err(ServiceError::Validation(format!("offset must be >= 0, got {offset}")));
        }
        if limit <= 0 {
            return Err(ServiceError::Validation(format!("limit must be > 0, got {limit}")));
        }
        let page = Page::new(offset as usize, limit as usize);
        Ok(self.store.list(page).await?)
    }

    pub async fn get(&self, id: u64) -> Result<Message, ServiceError> {
        self.store.get(id).await?.ok_or(ServiceError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::testing::{FlakyBroker, FlakyStore};
    use crate::topic::MemoryBroker;
    use courier_api::Broker;
    use tokio_util::sync::CancellationToken;

    async fn service() -> (MessageService, FlakyBroker, FlakyStore) {
        let broker = FlakyBroker::new(MemoryBroker::new());
        broker.ensure_topic("messages").await.unwrap();
        let store = FlakyStore::new();
        let producer = Producer::new(Arc::new(broker.clone()), CancellationToken::new());
        let svc = MessageService::new(Arc::new(store.clone()), producer, "messages");
        (svc, broker, store)
    }

    #[tokio::test]
    async fn submit_stores_then_publishes() {
        let (svc, broker, store) = service().await;
        let msg = svc.submit("hello").await.unwrap();

        assert_eq!(msg.content, "hello");
        assert!(!msg.processed);
        assert_eq!(store.get(msg.id).await.unwrap(), Some(msg.clone()));

        let record = broker.inner.registry().get("messages").unwrap().get(0).unwrap();
        assert_eq!(record.key, msg.id.to_string());
        assert_eq!(codec::decode(&record.payload).unwrap(), msg);
    }

    #[tokio::test]
    async fn empty_content_is_rejected_before_storage() {
        let (svc, broker, store) = service().await;
        let err = svc.submit("   ").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(store.inner.is_empty().await);
        assert_eq!(broker.inner.topic_len("messages"), 0);
    }

    #[tokio::test]
    async fn publish_failure_leaves_record_unprocessed() {
        let (svc, broker, store) = service().await;
        broker.faults.fail_writes(usize::MAX);

        let err = svc.submit("lost").await.unwrap_err();
        assert_eq!(err.stage(), "publish");
        assert!(matches!(err, ServiceError::Publish(PublishError::Delivery { attempts: 3, .. })));

        let all = svc.list(0, 10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].processed);
        assert_eq!(svc.processed_count().await.unwrap(), 0);
        assert_eq!(store.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn storage_failure_skips_publish() {
        let (svc, broker, store) = service().await;
        store.fail_creates(1);
        let err = svc.submit("x").await.unwrap_err();
        assert_eq!(err.stage(), "storage");
        assert_eq!(broker.faults.write_calls(), 0);
    }

    #[tokio::test]
    async fn list_validates_window() {
        let (svc, _, _) = service().await;
        for i in 0..5 {
            svc.submit(&format!("m{i}")).await.unwrap();
        }

        let page = svc.list(1, 2).await.unwrap();
        let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m2"]);

        assert_eq!(svc.list(10, DEFAULT_LIST_LIMIT).await.unwrap(), vec![]);
        assert!(matches!(svc.list(-1, 10).await, Err(ServiceError::Validation(_))));
        assert!(matches!(svc.list(0, 0).await, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (svc, _, _) = service().await;
        assert!(matches!(svc.get(42).await, Err(ServiceError::NotFound(42))));
    }

    #[tokio::test]
    async fn processed_count_reflects_consumer_writes() {
        let (svc, _, store) = service().await;
        let a = svc.submit("a").await.unwrap();
        svc.submit("b").await.unwrap();
        assert_eq!(svc.processed_count().await.unwrap(), 0);

        store.upsert(a.mark_processed()).await.unwrap();
        assert_eq!(svc.processed_count().await.unwrap(), 1);
    }
}
