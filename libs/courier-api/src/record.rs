/// Wire record handed to a broker.
///
/// `key` is used only for partition routing and is not unique.
/// `payload` is opaque to the broker; the engine encodes a `Message` into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRecord {
    pub key: String,
    pub payload: Vec<u8>,
}

/// Position of a single record inside a topic partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordPosition {
    pub partition: u32,
    pub offset: u64,
}

impl RecordPosition {
    pub fn new(partition: u32, offset: u64) -> Self {
        Self { partition, offset }
    }

    /// Offset to store when committing this record: the next one to deliver.
    pub fn next_offset(&self) -> u64 {
        self.offset + 1
    }
}

impl std::fmt::Display for RecordPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

/// Record returned by a `TopicReader`, with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub position: RecordPosition,
    pub key: String,
    pub payload: Vec<u8>,
}
