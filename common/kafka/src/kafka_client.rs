use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use health::HealthHandle;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, ClientContext, Offset, Statistics, TopicPartitionList};
use tracing::{debug, error, info, warn};

use crate::client::BrokerClient;
use crate::error::{CommitError, FetchError, SetupError};
use crate::metrics::{ConsumerMetrics, RebalanceKind};
use crate::types::{OffsetMap, Partition, Position, RawRecord};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// librdkafka callbacks for a consume loop: rebalance logging, commit
/// results, and liveness from the periodic statistics callback.
pub struct ConsumeContext {
    topics: String,
    metrics: Arc<dyn ConsumerMetrics>,
    // set once the client is subscribed
    liveness: OnceLock<HealthHandle>,
}

impl ConsumeContext {
    pub fn new(topics: String, metrics: Arc<dyn ConsumerMetrics>) -> Self {
        Self {
            topics,
            metrics,
            liveness: OnceLock::new(),
        }
    }
}

impl ClientContext for ConsumeContext {
    fn stats(&self, _statistics: Statistics) {
        // librdkafka's main loop is alive and calling us
        if let Some(liveness) = self.liveness.get() {
            liveness.report_healthy();
        }
    }
}

impl ConsumerContext for ConsumeContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                // cooperative-sticky sends empty revokes whenever group membership changes
                if partitions.count() == 0 {
                    debug!(topics = self.topics, "skipping empty revoke rebalance");
                    return;
                }
                let revoked: Vec<String> = partitions
                    .elements()
                    .into_iter()
                    .map(|elem| Partition::from(elem).to_string())
                    .collect();
                info!(
                    topics = self.topics,
                    "revoking {} partitions: {}",
                    revoked.len(),
                    revoked.join(",")
                );
                self.metrics.rebalance(RebalanceKind::Revoke, revoked.len());
            }
            Rebalance::Assign(partitions) => {
                debug!(
                    topics = self.topics,
                    "pre-rebalance assign of {} partitions",
                    partitions.count()
                );
            }
            Rebalance::Error(e) => {
                error!(topics = self.topics, "rebalance error: {}", e);
                self.metrics.rebalance(RebalanceKind::Error, 0);
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                if partitions.count() == 0 {
                    debug!(topics = self.topics, "skipping empty assign rebalance");
                    return;
                }
                let assigned: Vec<String> = partitions
                    .elements()
                    .into_iter()
                    .map(|elem| Partition::from(elem).to_string())
                    .collect();
                info!(
                    topics = self.topics,
                    "assigned {} partitions: {}",
                    assigned.len(),
                    assigned.join(",")
                );
                self.metrics.rebalance(RebalanceKind::Assign, assigned.len());
            }
            Rebalance::Revoke(_) => {
                debug!(topics = self.topics, "post-rebalance revoke");
            }
            Rebalance::Error(e) => {
                error!(topics = self.topics, "post-rebalance error: {}", e);
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(_) => debug!(
                topics = self.topics,
                "committed offsets for {} partitions",
                offsets.count()
            ),
            Err(e) => warn!(topics = self.topics, "offset commit callback error: {}", e),
        }
    }
}

/// `BrokerClient` over an rdkafka `StreamConsumer` subscribed to a set of
/// topics with manual commits.
pub struct KafkaBrokerClient {
    consumer: StreamConsumer<ConsumeContext>,
    topics: Vec<String>,
}

impl KafkaBrokerClient {
    pub fn new(
        config: &ClientConfig,
        topics: &[String],
        context: ConsumeContext,
    ) -> Result<Self, SetupError> {
        let consumer: StreamConsumer<ConsumeContext> = config
            .create_with_context(context)
            .map_err(SetupError::Client)?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|source| SetupError::Subscribe {
                topics: topics.join(","),
                source,
            })?;

        info!(topics = topics.join(","), "kafka consumer subscribed");

        Ok(Self {
            consumer,
            topics: topics.to_vec(),
        })
    }

    /// Statistics callbacks report to `liveness` from now on. Only the first
    /// handle attached is kept.
    pub fn attach_liveness(&self, liveness: HealthHandle) {
        if self.consumer.context().liveness.set(liveness).is_err() {
            warn!(topics = self.topics.join(","), "liveness already attached");
        }
    }

    fn to_raw(message: &BorrowedMessage<'_>) -> RawRecord {
        RawRecord::new(
            Position::new(
                Partition::new(message.topic(), message.partition()),
                message.offset(),
            ),
            message.payload().map(|p| p.to_vec()),
        )
    }
}

#[async_trait]
impl BrokerClient for KafkaBrokerClient {
    async fn fetch(&mut self) -> Result<RawRecord, FetchError> {
        let message = self.consumer.recv().await?;
        Ok(Self::to_raw(&message))
    }

    fn try_fetch(&mut self) -> Result<Option<RawRecord>, FetchError> {
        // A single poll of the receive future only yields what is already queued
        match self.consumer.recv().now_or_never() {
            Some(Ok(message)) => Ok(Some(Self::to_raw(&message))),
            Some(Err(e)) => Err(FetchError::Kafka(e)),
            None => Ok(None),
        }
    }

    fn commit(&mut self, offsets: &OffsetMap) -> Result<(), CommitError> {
        if offsets.is_empty() {
            return Ok(());
        }
        // Kafka stores the next offset to read, one past the last handled record
        let mut list = TopicPartitionList::new();
        for (partition, offset) in offsets.iter() {
            list.add_partition_offset(
                partition.topic(),
                partition.partition_number(),
                Offset::Offset(offset + 1),
            )
            .map_err(CommitError::OffsetList)?;
        }
        self.consumer.commit(&list, CommitMode::Sync)?;
        Ok(())
    }

    fn rewind(&mut self, offsets: &OffsetMap) -> Result<(), FetchError> {
        for (partition, offset) in offsets.iter() {
            self.consumer
                .seek(
                    partition.topic(),
                    partition.partition_number(),
                    Offset::Offset(offset),
                    SEEK_TIMEOUT,
                )
                .map_err(FetchError::Rewind)?;
        }
        Ok(())
    }

    fn close(self) {
        info!(topics = self.topics.join(","), "leaving consumer group");
        self.consumer.unsubscribe();
        // Dropping the consumer closes it, which sends the leave-group request
        drop(self.consumer);
    }
}
