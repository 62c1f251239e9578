// Adaptive batch consumption on top of rdkafka
pub mod batch;
pub mod client;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod handler;
pub mod kafka_client;
pub mod metrics;
pub mod metrics_consts;
pub mod subscription;
pub mod types;

// Used in "mod tests" and tests/ directory (integration tests)
pub mod test_utils;

// Public API
pub use client::BrokerClient;
pub use codec::{BincodeDeserializer, JsonDeserializer, PayloadDeserializer, PayloadFormat};
pub use config::{ConsumerConfigBuilder, ConsumerDefaults, KafkaConfig, OffsetReset};
pub use consumer::KafkaConsumer;
pub use engine::{BatchConsumer, ConsumeSummary, LoopState};
pub use error::{CommitError, DeserializeError, FetchError, SetupError};
pub use handler::{handler_fn, BatchHandler, PerRecord, RecordHandler};
pub use metrics::{ConsumerMetrics, NoopConsumerMetrics, PrometheusConsumerMetrics};
pub use subscription::Subscription;
