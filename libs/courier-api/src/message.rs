use serde::{Deserialize, Serialize};

/// A message record as stored and as carried on the topic.
///
/// `id` is assigned by storage on create. After creation the only
/// mutation is `processed` flipping to `true` once the consumer has
/// read the record back from the topic and re-persisted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub content: String,
    #[serde(default)]
    pub processed: bool,
    /// Unix ms.
    #[serde(default)]
    pub created_at: i64,
    /// Unix ms.
    #[serde(default)]
    pub updated_at: i64,
}

impl Message {
    /// Copy of this record with `processed = true`.
    pub fn mark_processed(&self) -> Self {
        Self {
            processed: true,
            ..self.clone()
        }
    }
}

/// Input for creating a message. Storage assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
}

impl NewMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into() }
    }
}

/// Offset/limit window over messages ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}
