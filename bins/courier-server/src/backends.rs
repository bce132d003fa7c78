use std::sync::Arc;

use courier_api::{Broker, MessageStore};
use courier_broker_file::FileBroker;
use courier_engine::config::{BrokerKind, CourierConfig, StorageKind};
use courier_engine::{Backends, MemoryBroker};
use courier_storage_file::FileMessageStore;
use courier_storage_memory::MemoryMessageStore;

use crate::error::ServerError;

/// Instantiate the configured store and broker.
pub fn build(config: &CourierConfig) -> Result<Backends, ServerError> {
    let store: Arc<dyn MessageStore> = match config.storage.kind {
        StorageKind::Memory => Arc::new(MemoryMessageStore::new()),
        StorageKind::File => Arc::new(FileMessageStore::new(&config.storage.path)),
    };

    let broker: Arc<dyn Broker> = match config.broker.kind {
        BrokerKind::Memory => {
            tracing::warn!("memory broker: topics are not shared with other processes");
            Arc::new(MemoryBroker::new())
        }
        BrokerKind::File => Arc::new(FileBroker::from_addresses(
            &config.broker.addresses,
            config.poll_interval(),
        )?),
    };

    tracing::info!(storage = ?config.storage.kind, broker = ?config.broker.kind, "backends selected");
    Ok(Backends { store, broker })
}
