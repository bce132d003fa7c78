use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use courier_api::{BackendError, Broker, Message, RecordPosition, TopicRecord, TopicWriter};

use crate::codec::{self, CodecError};

/// Delivery attempts per publish before the failure is reported.
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("topic name is empty")]
    InvalidTopic,

    #[error("encode: {0}")]
    Encode(#[from] CodecError),

    #[error("delivery failed after {attempts} attempt(s): {source}")]
    Delivery { attempts: u32, source: BackendError },

    #[error("publish cancelled")]
    Cancelled,
}

/// Synchronous publisher: every call opens a broker connection, writes
/// one record with a bounded number of attempts and releases the
/// connection. Returns only after the broker acknowledged the write.
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
    max_attempts: u32,
    token: CancellationToken,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>, token: CancellationToken) -> Self {
        Self {
            broker,
            max_attempts: DEFAULT_PUBLISH_ATTEMPTS,
            token,
        }
    }

    /// Set the attempt bound. Values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Publish `message` to `topic` under `key`.
    ///
    /// Transient broker errors are retried immediately up to the attempt
    /// bound; the last error is returned once it is exhausted. The wait
    /// for acknowledgement observes the shared cancellation token.
    pub async fn publish(
        &self,
        topic: &str,
        key: &str,
        message: &Message,
    ) -> Result<RecordPosition, PublishError> {
        if topic.is_empty() {
            return Err(PublishError::InvalidTopic);
        }
        let payload = codec::encode(message)?;

        let mut writer: Option<Box<dyn TopicWriter>> = None;
        let mut last_error = BackendError::logic("no delivery attempt made");

        for attempt in 1..=self.max_attempts {
            if self.token.is_cancelled() {
                release(writer, topic).await;
                return Err(PublishError::Cancelled);
            }

            if writer.is_none() {
                let opened = tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return Err(PublishError::Cancelled),
                    opened = self.broker.open_writer() => opened,
                };
                match opened {
                    Ok(w) => writer = Some(w),
                    Err(e) => {
                        tracing::warn!(topic, attempt, error = %e, "broker connection failed");
                        last_error = e;
                        continue;
                    }
                }
            }
            let Some(w) = writer.as_mut() else {
                continue;
            };

            let record = TopicRecord {
                key: key.to_string(),
                payload: payload.clone(),
            };
            let written = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                written = w.write(topic, record) => Some(written),
            };

            match written {
                None => {
                    release(writer, topic).await;
                    return Err(PublishError::Cancelled);
                }
                Some(Ok(position)) => {
                    tracing::info!(topic, key, id = message.id, %position, attempt, "message published");
                    release(writer, topic).await;
                    return Ok(position);
                }
                Some(Err(e)) => {
                    tracing::warn!(topic, attempt, error = %e, "publish attempt failed");
                    last_error = e;
                }
            }
        }

        release(writer, topic).await;
        tracing::error!(topic, id = message.id, attempts = self.max_attempts, error = %last_error, "publish failed");
        Err(PublishError::Delivery {
            attempts: self.max_attempts,
            source: last_error,
        })
    }
}

async fn release(writer: Option<Box<dyn TopicWriter>>, topic: &str) {
    if let Some(mut w) = writer {
        if let Err(e) = w.close().await {
            tracing::warn!(topic, error = %e, "error closing broker connection");
        }
    }
}
