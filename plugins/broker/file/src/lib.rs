//! File broker: each topic is an append-only JSON-lines file, each line one
//! record, the line index its offset. Consumer groups keep their committed
//! offset in a small file next to the topic.
//!
//! Layout under the broker directory:
//!
//! ```text
//! {topic}.jsonl              records
//! {topic}.offsets/{group}    next offset to read, decimal
//! ```

mod broker;
mod disk;

pub use broker::FileBroker;
