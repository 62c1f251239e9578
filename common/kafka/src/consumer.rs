use std::sync::Arc;

use health::HealthRegistry;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ConsumerConfigBuilder, KafkaConfig};
use crate::engine::{BatchConsumer, ConsumeSummary};
use crate::error::SetupError;
use crate::handler::{BatchHandler, PerRecord, RecordHandler};
use crate::kafka_client::{ConsumeContext, KafkaBrokerClient};
use crate::metrics::ConsumerMetrics;
use crate::subscription::Subscription;

/// Entry point for services: owns the broker settings and the metrics sink,
/// and runs one consume loop per `consume`/`consume_batch` call.
///
/// Cheap to clone, so every loop of a service can share one.
#[derive(Clone)]
pub struct KafkaConsumer {
    kafka: KafkaConfig,
    metrics: Arc<dyn ConsumerMetrics>,
    health: Option<HealthRegistry>,
}

impl KafkaConsumer {
    pub fn new(kafka: KafkaConfig, metrics: Arc<dyn ConsumerMetrics>) -> Self {
        Self {
            kafka,
            metrics,
            health: None,
        }
    }

    /// Every loop started afterwards registers a liveness component, kept
    /// alive by librdkafka's statistics callback.
    pub fn with_health(mut self, registry: HealthRegistry) -> Self {
        self.health = Some(registry);
        self
    }

    /// Validate the subscription and connect a subscribed client for it.
    pub fn connect<T>(&self, subscription: &Subscription<T>) -> Result<KafkaBrokerClient, SetupError> {
        if self.kafka.kafka_hosts.trim().is_empty() {
            return Err(SetupError::MissingBrokerAddress);
        }
        subscription.validate()?;

        let topics = subscription.topics_label();
        let config = ConsumerConfigBuilder::from_kafka_config(&self.kafka, subscription.group_id())
            .with_offset_reset(subscription.offset_reset())
            .build();
        let context = ConsumeContext::new(topics.clone(), self.metrics.clone());
        let client = KafkaBrokerClient::new(&config, subscription.topics(), context)?;

        // registered only for clients that exist, a failed setup must not hold liveness down
        if let Some(registry) = &self.health {
            // a few missed statistics callbacks before the loop counts as stalled
            let deadline = time::Duration::milliseconds(
                3 * i64::from(self.kafka.kafka_statistics_interval_ms.max(1000)),
            );
            client.attach_liveness(registry.register(&format!("kafka-consumer-{}", topics), deadline));
        }
        Ok(client)
    }

    /// Consume batches until `cancel` fires.
    ///
    /// Only setup problems are returned as errors. Once the loop runs, every
    /// failure is logged and counted and consumption carries on; the summary
    /// is returned after the loop has left the consumer group.
    pub async fn consume_batch<T, H>(
        &self,
        subscription: Subscription<T>,
        handler: H,
        cancel: CancellationToken,
    ) -> Result<ConsumeSummary, SetupError>
    where
        T: Send + 'static,
        H: BatchHandler<T>,
    {
        let client = self.connect(&subscription)?;
        info!(
            topics = subscription.topics_label(),
            group_id = subscription.group_id(),
            offset_reset = %subscription.offset_reset(),
            "consumer created"
        );

        let consumer = BatchConsumer::new(client, &subscription, self.metrics.clone());
        Ok(consumer.run(&handler, cancel).await)
    }

    /// Consume records one at a time until `cancel` fires. Each record is
    /// committed once its handler succeeded.
    pub async fn consume<T, H>(
        &self,
        subscription: Subscription<T>,
        handler: H,
        cancel: CancellationToken,
    ) -> Result<ConsumeSummary, SetupError>
    where
        T: Send + 'static,
        H: RecordHandler<T>,
    {
        let subscription = subscription.with_max_chunk_size(1);
        self.consume_batch(subscription, PerRecord(handler), cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::metrics::NoopConsumerMetrics;

    fn kafka_config(hosts: &str) -> KafkaConfig {
        KafkaConfig {
            kafka_hosts: hosts.to_string(),
            kafka_tls: false,
            kafka_session_timeout_ms: 60000,
            kafka_heartbeat_interval_ms: 5000,
            kafka_max_poll_interval_ms: 300000,
            kafka_statistics_interval_ms: 10000,
            kafka_client_id: None,
        }
    }

    #[tokio::test]
    async fn missing_broker_address_is_a_setup_error() {
        let consumer = KafkaConsumer::new(kafka_config(""), Arc::new(NoopConsumerMetrics));
        let handler = handler_fn(|_batch: Vec<String>, _cancel| async { Ok::<_, anyhow::Error>(()) });

        let result = consumer
            .consume_batch(
                Subscription::new(["listings"]),
                handler,
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(SetupError::MissingBrokerAddress)));
    }

    #[tokio::test]
    async fn invalid_subscription_fails_before_connecting() {
        let consumer =
            KafkaConsumer::new(kafka_config("localhost:9092"), Arc::new(NoopConsumerMetrics));
        let handler = handler_fn(|_batch: Vec<String>, _cancel| async { Ok::<_, anyhow::Error>(()) });

        let result = consumer
            .consume_batch(
                Subscription::new(Vec::<String>::new()),
                handler,
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(SetupError::NoTopics)));
    }

    #[tokio::test]
    async fn connecting_registers_a_liveness_component() {
        let registry = HealthRegistry::new("liveness");
        let consumer =
            KafkaConsumer::new(kafka_config("localhost:9092"), Arc::new(NoopConsumerMetrics))
                .with_health(registry.clone());

        // librdkafka connects lazily, so creating the client needs no broker
        let subscription: Subscription<String> = Subscription::new(["listings"]);
        let client = consumer.connect(&subscription).unwrap();

        let status = registry.get_status();
        assert!(status.components.contains_key("kafka-consumer-listings"));
        assert!(!status.healthy);
        drop(client);
    }

    #[test]
    fn failed_client_creation_registers_nothing() {
        let registry = HealthRegistry::new("liveness");
        let mut kafka = kafka_config("localhost:9092");
        // librdkafka rejects a zero session timeout when creating the client
        kafka.kafka_session_timeout_ms = 0;
        let consumer =
            KafkaConsumer::new(kafka, Arc::new(NoopConsumerMetrics)).with_health(registry.clone());

        let subscription: Subscription<String> = Subscription::new(["listings"]);
        let result = consumer.connect(&subscription);

        assert!(matches!(result, Err(SetupError::Client(_))));
        assert!(registry.get_status().components.is_empty());
    }
}
