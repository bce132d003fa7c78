use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_api::{
    now_ms, BackendError, Broker, ConsumedRecord, RecordPosition, TopicReader, TopicRecord,
    TopicWriter,
};

use crate::disk::{self, DiskRecord};

// ════════════════════════════════════════════════════════════════
//  FileBroker
// ════════════════════════════════════════════════════════════════

/// Appends to one topic file are serialized across every clone of the
/// broker. Separate processes appending to the same directory are not.
#[derive(Debug, Clone)]
pub struct FileBroker {
    dir: Arc<PathBuf>,
    poll_interval: Duration,
    append_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl FileBroker {
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: Arc::new(dir.into()),
            poll_interval,
            append_locks: Arc::default(),
        }
    }

    /// Use the first broker address as the directory.
    pub fn from_addresses(addresses: &[String], poll_interval: Duration) -> Result<Self, BackendError> {
        let dir = addresses
            .first()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| BackendError::config("file broker needs a directory address"))?;
        Ok(Self::new(dir.trim(), poll_interval))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn topic_path(&self, topic: &str) -> PathBuf {
        self.dir.join(format!("{topic}.jsonl"))
    }

    fn append_lock(&self, topic: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.append_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(topic.to_string()).or_default().clone()
    }

    fn offset_path(&self, topic: &str, group: &str) -> PathBuf {
        self.dir.join(format!("{topic}.offsets")).join(group)
    }

    fn do_ensure_topic(&self, topic: &str) -> Result<(), BackendError> {
        let offsets = self.dir.join(format!("{topic}.offsets"));
        std::fs::create_dir_all(&offsets)
            .map_err(|e| BackendError::io(format!("mkdir {}: {e}", offsets.display())))?;
        let path = self.topic_path(topic);
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| BackendError::io(format!("create {}: {e}", path.display())))?;
        Ok(())
    }
}

/// Topic and group names become file names.
fn check_name(what: &str, name: &str) -> Result<(), BackendError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(BackendError::config(format!("invalid {what} name '{name}'")))
    }
}

/// Run blocking file work off the async threads.
async fn blocking<T, F>(f: F) -> Result<T, BackendError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackendError::io(format!("blocking task: {e}")))?
}

impl Broker for FileBroker {
    fn ensure_topic(&self, topic: &str) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            check_name("topic", &topic)?;
            let this = self.clone();
            let name = topic.clone();
            blocking(move || this.do_ensure_topic(&name)).await?;
            tracing::debug!(topic = %topic, dir = %self.dir.display(), "topic file ready");
            Ok(())
        })
    }

    fn open_writer(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TopicWriter>, BackendError>> + Send + '_>> {
        Box::pin(async move {
            if !self.dir.is_dir() {
                return Err(BackendError::io(format!(
                    "broker directory {} is not available",
                    self.dir.display()
                )));
            }
            Ok(Box::new(FileTopicWriter {
                broker: self.clone(),
                closed: false,
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
            check_name("topic", &topic)?;
            check_name("group", &group)?;

            let path = self.topic_path(&topic);
            let offset_path = self.offset_path(&topic, &group);
            let (cursor, byte_pos) = {
                let path = path.clone();
                let offset_path = offset_path.clone();
                blocking(move || {
                    let committed = disk::read_offset(&offset_path)?;
                    match disk::locate_line(&path, committed)? {
                        Some(pos) => Ok((committed, pos)),
                        None => Err(BackendError::logic(format!(
                            "committed offset {committed} is past the end of {}",
                            path.display()
                        ))),
                    }
                })
                .await?
            };

            tracing::info!(topic = %topic, group = %group, offset = cursor, "reader opened");
            Ok(Box::new(FileTopicReader {
                path,
                offset_path,
                topic,
                poll_interval: self.poll_interval,
                cursor,
                byte_pos,
            }) as Box<dyn TopicReader>)
        })
    }
}

// ════════════════════════════════════════════════════════════════
//  Writer
// ════════════════════════════════════════════════════════════════

struct FileTopicWriter {
    broker: FileBroker,
    closed: bool,
}

impl TopicWriter for FileTopicWriter {
    fn write<'a>(
        &'a mut self,
        topic: &'a str,
        record: TopicRecord,
    ) -> Pin<Box<dyn Future<Output = Result<RecordPosition, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            if self.closed {
                return Err(BackendError::logic("writer is closed"));
            }
            check_name("topic", topic)?;
            let path = self.broker.topic_path(topic);
            let line = DiskRecord::from_record(&record, now_ms()).to_line()?;
            // The guard moves into the blocking task so a dropped write
            // still holds the lock until its append is done.
            let guard = self.broker.append_lock(topic).lock_owned().await;
            let offset = blocking(move || {
                let _guard = guard;
                disk::append_line(&path, &line)
            })
            .await?;
            Ok(RecordPosition::new(0, offset))
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        self.closed = true;
        Box::pin(async { Ok(()) })
    }
}

// ════════════════════════════════════════════════════════════════
//  Reader
// ════════════════════════════════════════════════════════════════

/// Polls the topic file from `byte_pos`. State only changes after a read
/// completes, so dropping a pending `fetch` loses nothing.
struct FileTopicReader {
    path: PathBuf,
    offset_path: PathBuf,
    topic: String,
    poll_interval: Duration,
    /// Line index of the next record to return.
    cursor: u64,
    /// Byte position of line `cursor`.
    byte_pos: u64,
}

impl FileTopicReader {
    fn to_record(&self, line: Vec<u8>) -> ConsumedRecord {
        let position = RecordPosition::new(0, self.cursor);
        match disk::parse_line(&line) {
            Ok((key, payload)) => ConsumedRecord { position, key, payload },
            Err(e) => {
                // Hand the raw line on; decoding it will fail and the
                // consumer skips it.
                tracing::warn!(topic = %self.topic, %position, error = %e, "malformed topic line");
                ConsumedRecord {
                    position,
                    key: String::new(),
                    payload: line,
                }
            }
        }
    }
}

impl TopicReader for FileTopicReader {
    fn fetch(&mut self) -> Pin<Box<dyn Future<Output = Result<ConsumedRecord, BackendError>> + Send + '_>> {
        Box::pin(async move {
            loop {
                let path = self.path.clone();
                let pos = self.byte_pos;
                if let Some((line, next)) = blocking(move || disk::read_line_at(&path, pos)).await? {
                    let record = self.to_record(line);
                    self.cursor += 1;
                    self.byte_pos = next;
                    return Ok(record);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        })
    }

    fn commit(
        &mut self,
        position: RecordPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            let path = self.offset_path.clone();
            let next = position.next_offset();
            blocking(move || {
                if disk::read_offset(&path)? >= next {
                    return Ok(());
                }
                disk::write_offset(&path, next)
            })
            .await
        })
    }

    fn rewind(
        &mut self,
        position: RecordPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        Box::pin(async move {
            let path = self.path.clone();
            let index = position.offset;
            let byte_pos = blocking(move || disk::locate_line(&path, index))
                .await?
                .ok_or_else(|| BackendError::not_found(format!("no record at {position}")))?;
            self.cursor = index;
            self.byte_pos = byte_pos;
            Ok(())
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        tracing::debug!(topic = %self.topic, offset = self.cursor, "reader closed");
        Box::pin(async { Ok(()) })
    }
}
