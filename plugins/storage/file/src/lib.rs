//! File-backed message store: one JSON document per message under a data
//! directory. Survives restarts and can be shared by several processes
//! on the same host.

mod storage;

pub use storage::FileMessageStore;
