//! Fault-injecting wrappers around the in-memory backends.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use courier_api::{
    BackendError, Broker, ConsumedRecord, Message, MessageStore, NewMessage, Page,
    RecordPosition, TopicReader, TopicRecord, TopicWriter,
};
use courier_storage_memory::MemoryMessageStore;

use crate::topic::MemoryBroker;

/// Take one pending failure from `counter`. `true` means "fail now".
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Faults {
    opens: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
    rewinds: Arc<AtomicUsize>,
    hang_writes: Arc<AtomicBool>,
    write_calls: Arc<AtomicUsize>,
    commit_calls: Arc<AtomicUsize>,
    rewind_calls: Arc<AtomicUsize>,
}

impl Faults {
    pub(crate) fn fail_opens(&self, n: usize) {
        self.opens.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self, n: usize) {
        self.writes.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_fetches(&self, n: usize) {
        self.fetches.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_commits(&self, n: usize) {
        self.commits.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_rewinds(&self, n: usize) {
        self.rewinds.store(n, Ordering::SeqCst);
    }

    pub(crate) fn hang_writes(&self) {
        self.hang_writes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn rewind_calls(&self) -> usize {
        self.rewind_calls.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// FlakyBroker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub(crate) struct FlakyBroker {
    pub(crate) inner: MemoryBroker,
    pub(crate) faults: Faults,
}

impl FlakyBroker {
    pub(crate) fn new(inner: MemoryBroker) -> Self {
        Self {
            inner,
            faults: Faults::default(),
        }
    }
}

impl Broker for FlakyBroker {
    fn ensure_topic(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        self.inner.ensure_topic(topic)
    }

    fn open_writer(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TopicWriter>, BackendError>> + Send + '_>> {
        Box::pin(async move {
            if take(&self.faults.opens) {
                return Err(BackendError::io("injected: connection refused"));
            }
            let inner = self.inner.open_writer().await?;
            Ok(Box::new(FlakyWriter {
                inner,
                faults: self.faults.clone(),
            }) as Box<dyn TopicWriter>)
        })
    }

    fn open_reader(
        &self,
        topic: &str,
        group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TopicReader>, BackendError>> + Send + '_>> {
        let topic = topic.to_string();
        let group = group.to_string();
        Box::pin(async move {
            let inner = self.inner.open_reader(&topic, &group).await?;
            Ok(Box::new(FlakyReader {
                inner,
                faults: self.faults.clone(),
            }) as Box<dyn TopicReader>)
        })
    }
}

struct FlakyWriter {
    inner: Box<dyn TopicWriter>,
    faults: Faults,
}

impl TopicWriter for FlakyWriter {
    fn write<'a>(
        &'a mut self,
        topic: &'a str,
        record: TopicRecord,
    ) -> Pin<Box<dyn Future<Output = Result<RecordPosition, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            self.faults.write_calls.fetch_add(1, Ordering::SeqCst);
            if self.faults.hang_writes.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if take(&self.faults.writes) {
                return Err(BackendError::io("injected: broker unavailable"));
            }
            self.inner.write(topic, record).await
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        self.inner.close()
    }
}

struct FlakyReader {
    inner: Box<dyn TopicReader>,
    faults: Faults,
}

impl TopicReader for FlakyReader {
    fn fetch(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<ConsumedRecord, BackendError>> + Send + '_>> {
        Box::pin(async move {
            if take(&self.faults.fetches) {
                return Err(BackendError::io("injected: fetch failed"));
            }
            self.inner.fetch().await
        })
    }

    fn commit(
        &mut self,
        position: RecordPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            self.faults.commit_calls.fetch_add(1, Ordering::SeqCst);
            if take(&self.faults.commits) {
                return Err(BackendError::io("injected: commit failed"));
            }
            self.inner.commit(position).await
        })
    }

    fn rewind(
        &mut self,
        position: RecordPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            self.faults.rewind_calls.fetch_add(1, Ordering::SeqCst);
            if take(&self.faults.rewinds) {
                return Err(BackendError::io("injected: rewind failed"));
            }
            self.inner.rewind(position).await
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        self.inner.close()
    }
}

// ---------------------------------------------------------------------------
// FlakyStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub(crate) struct FlakyStore {
    pub(crate) inner: Arc<MemoryMessageStore>,
    fail_upserts: Arc<AtomicUsize>,
    fail_creates: Arc<AtomicUsize>,
    upsert_calls: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_upserts(&self, n: usize) {
        self.fail_upserts.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_creates(&self, n: usize) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    pub(crate) fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

impl MessageStore for FlakyStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        self.inner.init()
    }

    fn create(
        &self,
        message: NewMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Message, BackendError>> + Send + '_>> {
        Box::pin(async move {
            if take(&self.fail_creates) {
                return Err(BackendError::io("injected: storage timeout"));
            }
            self.inner.create(message).await
        })
    }

    fn upsert(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<Message, BackendError>> + Send + '_>> {
        Box::pin(async move {
            self.upsert_calls.fetch_add(1, Ordering::SeqCst);
            if take(&self.fail_upserts) {
                return Err(BackendError::io("injected: storage timeout"));
            }
            self.inner.upsert(message).await
        })
    }

    fn get(
        &self,
        id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Message>, BackendError>> + Send + '_>> {
        self.inner.get(id)
    }

    fn list(
        &self,
        page: Page,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>, BackendError>> + Send + '_>> {
        self.inner.list(page)
    }

    fn count_where_processed(
        &self,
        processed: bool,
    ) -> Pin<Box<dyn Future<Output = Result<i64, BackendError>> + Send + '_>> {
        self.inner.count_where_processed(processed)
    }
}
