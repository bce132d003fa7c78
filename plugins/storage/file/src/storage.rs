use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use courier_api::{now_ms, BackendError, Message, MessageStore, NewMessage, Page};

const EXT: &str = ".json";

/// Per-process counter for temp file names.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

// ════════════════════════════════════════════════════════════════
//  FileMessageStore
// ════════════════════════════════════════════════════════════════

/// `{data_dir}/{id:020}.json`, one message per file. Ids are claimed with
/// `create_new`, replacements go through a temp file and `rename`.
#[derive(Debug, Clone)]
pub struct FileMessageStore {
    data_dir: Arc<PathBuf>,
}

impl FileMessageStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Arc::new(data_dir.into()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn record_path(&self, id: u64) -> PathBuf {
        self.data_dir.join(format!("{id:020}{EXT}"))
    }

    /// Run blocking file work off the async threads.
    async fn blocking<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(FileMessageStore) -> Result<T, BackendError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(this))
            .await
            .map_err(|e| BackendError::io(format!("blocking task: {e}")))?
    }

    // ── Write ──

    fn do_create(&self, message: NewMessage) -> Result<Message, BackendError> {
        let now = now_ms();
        let mut id = next_id(self.max_id()?)?;
        loop {
            let stored = Message {
                id,
                content: message.content.clone(),
                processed: false,
                created_at: now,
                updated_at: now,
            };
            let path = self.record_path(id);
            match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut f) => {
                    let body = serde_json::to_vec(&stored)?;
                    f.write_all(&body)
                        .and_then(|_| f.sync_all())
                        .map_err(|e| BackendError::io(format!("write {}: {e}", path.display())))?;
                    return Ok(stored);
                }
                // Another writer claimed this id first.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => id = next_id(id)?,
                Err(e) => {
                    return Err(BackendError::io(format!("create {}: {e}", path.display())));
                }
            }
        }
    }

    fn do_upsert(&self, message: Message) -> Result<Message, BackendError> {
        let now = now_ms();
        let mut stored = message;
        if stored.id == 0 {
            stored.id = next_id(self.max_id()?)?;
        }
        if let Some(existing) = self.do_get(stored.id)? {
            stored.created_at = existing.created_at;
        } else if stored.created_at == 0 {
            stored.created_at = now;
        }
        stored.updated_at = now;

        let path = self.record_path(stored.id);
        let tmp = self.data_dir.join(format!(
            ".{:020}.{}.{}.tmp",
            stored.id,
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let body = serde_json::to_vec(&stored)?;
        write_file(&tmp, &body)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(BackendError::io(format!("rename {}: {e}", path.display())));
        }
        Ok(stored)
    }

    // ── Read ──

    fn do_get(&self, id: u64) -> Result<Option<Message>, BackendError> {
        let path = self.record_path(id);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| BackendError::format(format!("parse {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::io(format!("read {}: {e}", path.display()))),
        }
    }

    /// Ids of all stored messages, ascending.
    fn ids(&self) -> Result<Vec<u64>, BackendError> {
        let dir = match std::fs::read_dir(self.data_dir.as_path()) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BackendError::io(format!("read dir {}: {e}", self.data_dir.display())));
            }
        };

        let mut ids = Vec::new();
        for entry in dir {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(EXT) else {
                continue;
            };
            if let Ok(id) = stem.parse::<u64>() {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn max_id(&self) -> Result<u64, BackendError> {
        Ok(self.ids()?.last().copied().unwrap_or(0))
    }

    fn do_list(&self, page: Page) -> Result<Vec<Message>, BackendError> {
        let mut result = Vec::new();
        for id in self.ids()?.into_iter().skip(page.offset).take(page.limit) {
            // Skip files removed between listing and reading.
            if let Some(m) = self.do_get(id)? {
                result.push(m);
            }
        }
        Ok(result)
    }

    fn do_count(&self, processed: bool) -> Result<i64, BackendError> {
        let mut count = 0;
        for id in self.ids()? {
            if let Some(m) = self.do_get(id)? {
                if m.processed == processed {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

// ════════════════════════════════════════════════════════════════
//  MessageStore impl
// ════════════════════════════════════════════════════════════════

impl MessageStore for FileMessageStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + '_>> {
        let dir = self.data_dir.clone();
        Box::pin(async move {
            std::fs::create_dir_all(dir.as_path())
                .map_err(|e| BackendError::io(format!("mkdir {}: {e}", dir.display())))
        })
    }

    fn create(
        &self,
        message: NewMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Message, BackendError>> + Send + '_>> {
        Box::pin(self.blocking(move |this| this.do_create(message)))
    }

    fn upsert(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = Result<Message, BackendError>> + Send + '_>> {
        Box::pin(self.blocking(move |this| this.do_upsert(message)))
    }

    fn get(
        &self,
        id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Message>, BackendError>> + Send + '_>> {
        Box::pin(self.blocking(move |this| this.do_get(id)))
    }

    fn list(
        &self,
        page: Page,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Message>, BackendError>> + Send + '_>> {
        Box::pin(self.blocking(move |this| this.do_list(page)))
    }

    fn count_where_processed(
        &self,
        processed: bool,
    ) -> Pin<Box<dyn Future<Output = Result<i64, BackendError>> + Send + '_>> {
        Box::pin(self.blocking(move |this| this.do_count(processed)))
    }
}

// ════════════════════════════════════════════════════════════════
//  Helpers
// ════════════════════════════════════════════════════════════════

/// The id after `id`, or a logic error once the id space is used up.
fn next_id(id: u64) -> Result<u64, BackendError> {
    id.checked_add(1)
        .ok_or_else(|| BackendError::logic(format!("message id {id} has no successor")))
}

fn write_file(path: &Path, body: &[u8]) -> Result<(), BackendError> {
    let mut f = std::fs::File::create(path)
        .map_err(|e| BackendError::io(format!("create {}: {e}", path.display())))?;
    f.write_all(body)
        .and_then(|_| f.sync_all())
        .map_err(|e| BackendError::io(format!("write {}: {e}", path.display())))
}
