use std::sync::Arc;

use courier_api::{Broker, MessageStore};

use crate::config::CourierConfig;
use crate::consumer::{ConsumerLoop, ConsumerStats};
use crate::error::EngineError;
use crate::lifecycle::{Lifecycle, ShutdownReport};
use crate::producer::Producer;
use crate::service::MessageService;

/// Concrete backends chosen by the binary.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn MessageStore>,
    pub broker: Arc<dyn Broker>,
}

/// A bootstrapped process: backends initialised, topic provisioned,
/// lifecycle ready to run tasks.
pub struct Runtime {
    config: CourierConfig,
    backends: Backends,
    lifecycle: Lifecycle,
    service: MessageService,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("tasks", &self.lifecycle.task_count())
            .finish()
    }
}

impl Runtime {
    /// Initialise storage and make sure the topic exists. Either failing
    /// is fatal.
    pub async fn bootstrap(config: CourierConfig, backends: Backends) -> Result<Self, EngineError> {
        config.validate()?;

        // --- 1. Storage ---
        backends
            .store
            .init()
            .await
            .map_err(|e| EngineError::from(e).with_context("storage init"))?;
        tracing::info!(kind = ?config.storage.kind, "storage ready");

        // --- 2. Topic ---
        let topic_ctx = format!("topic '{}'", config.broker.topic);
        backends
            .broker
            .ensure_topic(&config.broker.topic)
            .await
            .map_err(|e| EngineError::from(e).with_context(&topic_ctx))?;
        tracing::info!(topic = %config.broker.topic, kind = ?config.broker.kind, "topic ready");

        // --- 3. Producer + service ---
        let lifecycle = Lifecycle::new(config.grace_period());
        let producer = Producer::new(backends.broker.clone(), lifecycle.token())
            .with_max_attempts(config.broker.publish_attempts);
        let service = MessageService::new(backends.store.clone(), producer, config.broker.topic.clone());

        Ok(Self {
            config,
            backends,
            lifecycle,
            service,
        })
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn service(&self) -> &MessageService {
        &self.service
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Open the consumer reader and spawn the loop. A reader that cannot be
    /// opened is fatal.
    pub async fn start_consumer(&mut self) -> Result<(), EngineError> {
        let settings = self.config.consumer_settings();
        let consumer = ConsumerLoop::open(
            self.backends.broker.as_ref(),
            self.backends.store.clone(),
            settings,
            self.lifecycle.token(),
        )
        .await?;

        self.lifecycle.spawn("consumer", async move {
            let stats: ConsumerStats = consumer.run().await;
            tracing::debug!(?stats, "consumer stats");
        });
        Ok(())
    }

    /// Wait for SIGINT/SIGTERM, then drain.
    pub async fn run_until_signal(self) -> ShutdownReport {
        tracing::info!("running, press ctrl-c to stop");
        self.lifecycle.wait_for_signal().await;
        self.shutdown().await
    }

    pub async fn shutdown(self) -> ShutdownReport {
        self.lifecycle.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerKind;
    use crate::testing::{FlakyBroker, FlakyStore};
    use crate::topic::MemoryBroker;
    use std::time::Duration;

    fn config() -> CourierConfig {
        let mut config = CourierConfig::default();
        config.broker.kind = BrokerKind::Memory;
        config.consumer.read_error_backoff_ms = 10;
        config.consumer.persist_error_backoff_ms = 10;
        config
    }

    #[tokio::test]
    async fn bootstrap_provisions_topic() {
        let broker = MemoryBroker::new();
        let backends = Backends {
            store: Arc::new(FlakyStore::new()),
            broker: Arc::new(broker.clone()),
        };
        let rt = Runtime::bootstrap(config(), backends).await.unwrap();
        assert!(broker.registry().get("messages").is_some());
        assert_eq!(rt.service().topic(), "messages");
    }

    #[tokio::test]
    async fn invalid_config_is_fatal() {
        let mut cfg = config();
        cfg.broker.topic.clear();
        let backends = Backends {
            store: Arc::new(FlakyStore::new()),
            broker: Arc::new(MemoryBroker::new()),
        };
        assert!(matches!(
            Runtime::bootstrap(cfg, backends).await,
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn submitted_message_ends_up_processed() {
        let store = FlakyStore::new();
        let broker = FlakyBroker::new(MemoryBroker::new());
        let backends = Backends {
            store: Arc::new(store.clone()),
            broker: Arc::new(broker.clone()),
        };
        let mut rt = Runtime::bootstrap(config(), backends).await.unwrap();
        rt.start_consumer().await.unwrap();

        let msg = rt.service().submit("hello").await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if rt.service().get(msg.id).await.unwrap().processed {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "message never processed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(rt.service().processed_count().await.unwrap(), 1);

        let report = rt.shutdown().await;
        assert_eq!(report.finished, vec!["consumer"]);
        assert!(report.is_clean());
        assert_eq!(broker.inner.open_readers(), 0);
        assert_eq!(broker.inner.committed_offset("messages", "courier"), Some(1));
    }

    #[tokio::test]
    async fn persist_failure_then_recovery_end_to_end() {
        let store = FlakyStore::new();
        store.fail_upserts(2);
        let broker = FlakyBroker::new(MemoryBroker::new());
        let backends = Backends {
            store: Arc::new(store.clone()),
            broker: Arc::new(broker.clone()),
        };
        let mut rt = Runtime::bootstrap(config(), backends).await.unwrap();
        rt.start_consumer().await.unwrap();
        let msg = rt.service().submit("retry me").await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while broker.inner.committed_offset("messages", "courier") != Some(1) {
            assert!(tokio::time::Instant::now() < deadline, "offset never committed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(rt.service().get(msg.id).await.unwrap().processed);
        assert_eq!(store.upsert_calls(), 3);
        assert!(rt.shutdown().await.is_clean());
    }
}
