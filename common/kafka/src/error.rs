use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::types::Position;

/// Fatal problems found while building a consumer. The only errors a
/// consume call ever returns.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no broker address configured")]
    MissingBrokerAddress,
    #[error("subscription has no topics")]
    NoTopics,
    #[error("subscription has an empty topic name")]
    EmptyTopic,
    #[error("consumer group id is empty")]
    EmptyGroupId,
    #[error("max chunk size must be at least 1")]
    ZeroChunkSize,
    #[error("failed to create kafka consumer: {0}")]
    Client(#[source] KafkaError),
    #[error("failed to subscribe to {topics}: {source}")]
    Subscribe {
        topics: String,
        #[source]
        source: KafkaError,
    },
}

#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid bincode payload: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("invalid payload: {0}")]
    Custom(#[from] anyhow::Error),
}

/// Recoverable failure while pulling records. Abandons or seals the
/// current iteration, never the loop.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("kafka error while fetching: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to deserialize record at {position}: {source}")]
    Deserialize {
        position: Position,
        #[source]
        source: DeserializeError,
    },
    #[error("failed to rewind to uncommitted records: {0}")]
    Rewind(#[source] KafkaError),
}

impl FetchError {
    pub fn position(&self) -> Option<&Position> {
        match self {
            FetchError::Deserialize { position, .. } => Some(position),
            _ => None,
        }
    }
}

/// Commit failed after the handler already ran; its effects stay.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("kafka error while committing: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to build commit list: {0}")]
    OffsetList(#[source] KafkaError),
}
