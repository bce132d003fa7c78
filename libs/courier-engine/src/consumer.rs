//! Consumer loop: read → persist → commit, one record at a time.
//!
//! The committed offset never passes a record whose persistence has not
//! succeeded. A record that cannot be decoded is skipped without a commit;
//! a record whose write fails is rewound and redelivered. Reading only
//! resumes once the rewind has succeeded.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use courier_api::{BackendError, Broker, ConsumedRecord, MessageStore, RecordPosition, TopicReader};

use crate::codec;

/// Pause after a failed read before trying again.
pub const DEFAULT_READ_ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Pause after a failed write before the record is redelivered.
pub const DEFAULT_PERSIST_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// What to do with a record that is delivered again after it was
/// already persisted (crash or failed commit between phases).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedeliveryPolicy {
    /// Persist every delivery again. Duplicate writes are harmless because
    /// the write sets the same `processed = true` state.
    #[default]
    Reprocess,
    /// Look the record up first and only commit if it is already processed.
    SkipProcessed,
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub topic: String,
    pub group: String,
    pub read_error_backoff: Duration,
    pub persist_error_backoff: Duration,
    pub redelivery: RedeliveryPolicy,
}

impl ConsumerSettings {
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            read_error_backoff: DEFAULT_READ_ERROR_BACKOFF,
            persist_error_backoff: DEFAULT_PERSIST_ERROR_BACKOFF,
            redelivery: RedeliveryPolicy::default(),
        }
    }
}

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub read: u64,
    pub read_errors: u64,
    pub decode_failures: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub rewind_failures: u64,
    pub skipped_duplicates: u64,
    pub committed: u64,
    pub commit_failures: u64,
}

/// Loop states. `Committing` is only reachable from `Persisting` after
/// the write succeeded.
#[derive(Debug)]
enum State {
    Reading,
    Persisting(ConsumedRecord),
    Committing(RecordPosition),
    Stopped,
}

pub struct ConsumerLoop {
    reader: Box<dyn TopicReader>,
    store: Arc<dyn MessageStore>,
    settings: ConsumerSettings,
    token: CancellationToken,
    stats: ConsumerStats,
}

impl ConsumerLoop {
    /// Open a reader for the configured topic and group.
    pub async fn open(
        broker: &dyn Broker,
        store: Arc<dyn MessageStore>,
        settings: ConsumerSettings,
        token: CancellationToken,
    ) -> Result<Self, BackendError> {
        let reader = broker
            .open_reader(&settings.topic, &settings.group)
            .await
            .map_err(|e| e.with_context(format!("consumer '{}'", settings.group)))?;
        Ok(Self::new(reader, store, settings, token))
    }

    pub fn new(
        reader: Box<dyn TopicReader>,
        store: Arc<dyn MessageStore>,
        settings: ConsumerSettings,
        token: CancellationToken,
    ) -> Self {
        Self {
            reader,
            store,
            settings,
            token,
            stats: ConsumerStats::default(),
        }
    }

    /// Run until the token is cancelled. Releases the reader before returning.
    pub async fn run(mut self) -> ConsumerStats {
        tracing::info!(topic = %self.settings.topic, group = %self.settings.group, "consumer started");

        let mut state = State::Reading;
        loop {
            state = match state {
                State::Reading => self.read().await,
                State::Persisting(record) => self.persist(record).await,
                State::Committing(position) => self.commit(position).await,
                State::Stopped => break,
            };
        }

        if let Err(e) = self.reader.close().await {
            tracing::warn!(topic = %self.settings.topic, error = %e, "error closing reader");
        }
        tracing::info!(
            topic = %self.settings.topic,
            group = %self.settings.group,
            read = self.stats.read,
            committed = self.stats.committed,
            "consumer stopped"
        );
        self.stats
    }

    async fn read(&mut self) -> State {
        if self.token.is_cancelled() {
            return State::Stopped;
        }
        let fetched = tokio::select! {
            biased;
            _ = self.token.cancelled() => return State::Stopped,
            fetched = self.reader.fetch() => fetched,
        };

        match fetched {
            Ok(record) => {
                self.stats.read += 1;
                tracing::debug!(
                    topic = %self.settings.topic,
                    position = %record.position,
                    key = %record.key,
                    bytes = record.payload.len(),
                    "record read"
                );
                State::Persisting(record)
            }
            Err(e) => {
                self.stats.read_errors += 1;
                tracing::error!(topic = %self.settings.topic, error = %e, "read failed");
                if pause(self.token.clone(), self.settings.read_error_backoff).await {
                    State::Reading
                } else {
                    State::Stopped
                }
            }
        }
    }

    async fn persist(&mut self, record: ConsumedRecord) -> State {
        let message = match codec::decode(&record.payload) {
            Ok(m) => m,
            Err(e) => {
                self.stats.decode_failures += 1;
                tracing::warn!(
                    topic = %self.settings.topic,
                    position = %record.position,
                    error = %e,
                    "undecodable record, skipping"
                );
                return State::Reading;
            }
        };

        if self.settings.redelivery == RedeliveryPolicy::SkipProcessed {
            match self.store.get(message.id).await {
                Ok(Some(stored)) if stored.processed => {
                    self.stats.skipped_duplicates += 1;
                    tracing::info!(id = message.id, position = %record.position, "already processed, committing");
                    return State::Committing(record.position);
                }
                Ok(_) => {}
                Err(e) => {
                    self.stats.persist_failures += 1;
                    tracing::error!(id = message.id, position = %record.position, error = %e, "lookup failed");
                    return self.redeliver(record.position).await;
                }
            }
        }

        match self.store.upsert(message.mark_processed()).await {
            Ok(saved) => {
                self.stats.persisted += 1;
                tracing::info!(id = saved.id, position = %record.position, "message processed");
                State::Committing(record.position)
            }
            Err(e) => {
                self.stats.persist_failures += 1;
                tracing::error!(
                    id = message.id,
                    position = %record.position,
                    error = %e,
                    "persist failed, record will be redelivered"
                );
                self.redeliver(record.position).await
            }
        }
    }

    async fn commit(&mut self, position: RecordPosition) -> State {
        match self.reader.commit(position).await {
            Ok(()) => {
                self.stats.committed += 1;
                tracing::debug!(topic = %self.settings.topic, %position, "offset committed");
            }
            Err(e) => {
                // The record is already persisted; a lost commit only means
                // it may be delivered again.
                self.stats.commit_failures += 1;
                tracing::warn!(topic = %self.settings.topic, %position, error = %e, "commit failed");
            }
        }
        State::Reading
    }

    /// Rewind to `position` so the next read returns the same record, then
    /// back off. A failed rewind is retried under the same backoff; reading
    /// never resumes from a cursor past `position`.
    async fn redeliver(&mut self, position: RecordPosition) -> State {
        let backoff = self.settings.persist_error_backoff;
        while let Err(e) = self.reader.rewind(position).await {
            self.stats.rewind_failures += 1;
            tracing::error!(topic = %self.settings.topic, %position, error = %e, "rewind failed, retrying");
            if !pause(self.token.clone(), backoff).await {
                return State::Stopped;
            }
        }
        if pause(self.token.clone(), backoff).await {
            State::Reading
        } else {
            State::Stopped
        }
    }
}

/// Sleep for `backoff`. Returns `false` if `token` is cancelled meanwhile.
async fn pause(token: CancellationToken, backoff: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(backoff) => true,
    }
}
