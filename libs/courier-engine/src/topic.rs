use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use courier_api::{
    BackendError, Broker, ConsumedRecord, RecordPosition, TopicReader, TopicRecord, TopicWriter,
};

/// The in-process log has a single partition per topic.
const PARTITION: u32 = 0;

struct StoredRecord {
    key: String,
    payload: Vec<u8>,
}

/// A named, append-only log with per-group committed offsets.
pub struct Topic {
    name: String,
    log: RwLock<Vec<StoredRecord>>,
    /// group → next offset to deliver after a restart.
    committed: Mutex<HashMap<String, u64>>,
    /// Notification channel: unit signal on every append.
    notify_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic").field("name", &self.name).finish()
    }
}

impl Topic {
    pub fn new(name: String) -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        Self {
            name,
            log: RwLock::new(Vec::new()),
            committed: Mutex::new(HashMap::new()),
            notify_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn append(&self, record: TopicRecord) -> RecordPosition {
        let offset = {
            let mut log = write_lock(&self.log);
            log.push(StoredRecord {
                key: record.key,
                payload: record.payload,
            });
            (log.len() - 1) as u64
        };
        // Ignore if no readers are waiting.
        let _ = self.notify_tx.send(());
        RecordPosition::new(PARTITION, offset)
    }

    pub fn get(&self, offset: u64) -> Option<ConsumedRecord> {
        let log = read_lock(&self.log);
        log.get(offset as usize).map(|r| ConsumedRecord {
            position: RecordPosition::new(PARTITION, offset),
            key: r.key.clone(),
            payload: r.payload.clone(),
        })
    }

    pub fn len(&self) -> usize {
        read_lock(&self.log).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed offset of `group`, 0 if the group never committed.
    pub fn committed(&self, group: &str) -> u64 {
        let guard = match self.committed.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(group).copied().unwrap_or(0)
    }

    /// Advance the committed offset of `group`. Never moves backwards.
    pub fn commit(&self, group: &str, next_offset: u64) {
        let mut guard = match self.committed.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(topic = %self.name, "offset table lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let entry = guard.entry(group.to_string()).or_insert(0);
        if next_offset > *entry {
            *entry = next_offset;
        }
    }

    pub fn subscribe_notify(&self) -> broadcast::Receiver<()> {
        self.notify_tx.subscribe()
    }
}

/// Registry of all in-process topics.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` unless it already exists. Returns the topic either way.
    pub fn ensure(&self, name: &str) -> Arc<Topic> {
        let mut guard = write_lock(&self.topics);
        guard
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(name.to_string())))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Topic>> {
        read_lock(&self.topics).get(name).cloned()
    }

    pub fn topic_names(&self) -> Vec<String> {
        read_lock(&self.topics).keys().cloned().collect()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("topic read lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("topic write lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryBroker: Broker over the in-process registry
// ---------------------------------------------------------------------------

/// Broker backed by in-process topics. Used for single-process deployments
/// and tests; nothing survives a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    registry: Arc<TopicRegistry>,
    open_readers: Arc<AtomicUsize>,
    writers_opened: Arc<AtomicUsize>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Committed offset of `group` on `topic`, `None` if the topic is unknown.
    pub fn committed_offset(&self, topic: &str, group: &str) -> Option<u64> {
        self.registry.get(topic).map(|t| t.committed(group))
    }

    /// Number of records in `topic`.
    pub fn topic_len(&self, topic: &str) -> usize {
        self.registry.get(topic).map(|t| t.len()).unwrap_or(0)
    }

    /// Append bytes as-is, bypassing the codec.
    pub fn append_raw(&self, topic: &str, key: &str, payload: Vec<u8>) -> RecordPosition {
        self.registry.ensure(topic).append(TopicRecord {
            key: key.to_string(),
            payload,
        })
    }

    /// Readers opened and not yet released.
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }

    /// Producer connections opened since creation.
    pub fn writers_opened(&self) -> usize {
        self.writers_opened.load(Ordering::SeqCst)
    }
}

impl Broker for MemoryBroker {
    fn ensure_topic(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            if topic.is_empty() {
                return Err(BackendError::config("topic name is empty"));
            }
            self.registry.ensure(&topic);
            Ok(())
        })
    }

    fn open_writer(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TopicWriter>, BackendError>> + Send + '_>> {
        Box::pin(async move {
            self.writers_opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemoryTopicWriter {
                registry: self.registry.clone(),
            }) as Box<dyn TopicWriter>)
        })
    }

    fn open_reader(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TopicReader>, BackendError>> + Send + '_>> {
        let topic = self.registry.get(topic).ok_or_else(|| {
            BackendError::not_found(format!("topic not found: {topic}"))
        });
        let group = group.to_string();
        Box::pin(async move {
            let topic = topic?;
            let notify_rx = topic.subscribe_notify();
            let next = topic.committed(&group);
            self.open_readers.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemoryTopicReader {
                topic,
                group,
                next,
                notify_rx,
                release: Some(ReaderRelease(self.open_readers.clone())),
            }) as Box<dyn TopicReader>)
        })
    }
}

// ---------------------------------------------------------------------------
// TopicWriter implementation, appends to any registered topic
// ---------------------------------------------------------------------------

struct MemoryTopicWriter {
    registry: Arc<TopicRegistry>,
}

impl TopicWriter for MemoryTopicWriter {
    fn write<'a>(
        &'a mut self,
        topic: &'a str,
        record: TopicRecord,
    ) -> Pin<Box<dyn Future<Output = Result<RecordPosition, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            let topic = self
                .registry
                .get(topic)
                .ok_or_else(|| BackendError::not_found(format!("topic not found: {topic}")))?;
            Ok(topic.append(record))
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

// ---------------------------------------------------------------------------
// TopicReader implementation, sequential cursor with group commits
// ---------------------------------------------------------------------------

/// Decrements the open-reader gauge exactly once.
struct ReaderRelease(Arc<AtomicUsize>);

impl Drop for ReaderRelease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemoryTopicReader {
    topic: Arc<Topic>,
    group: String,
    next: u64,
    notify_rx: broadcast::Receiver<()>,
    release: Option<ReaderRelease>,
}

impl TopicReader for MemoryTopicReader {
    fn fetch(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<ConsumedRecord, BackendError>> + Send + '_>> {
        Box::pin(async move {
            if self.release.is_none() {
                return Err(BackendError::logic("reader is closed"));
            }
            loop {
                if let Some(record) = self.topic.get(self.next) {
                    self.next += 1;
                    return Ok(record);
                }
                // No data yet, wait for an append. Lag just means re-read.
                match self.notify_rx.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(BackendError::io(format!(
                            "topic '{}' closed",
                            self.topic.name()
                        )));
                    }
                }
            }
        })
    }

    fn commit(
        &mut self,
        position: RecordPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            if position.partition != PARTITION {
                return Err(BackendError::logic(format!("unknown partition {}", position.partition)));
            }
            self.topic.commit(&self.group, position.next_offset());
            Ok(())
        })
    }

    fn rewind(
        &mut self,
        position: RecordPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            self.next = position.offset;
            Ok(())
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        self.release.take();
        Box::pin(async { Ok(()) })
    }
}
