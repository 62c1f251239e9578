use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::codec::{JsonDeserializer, PayloadDeserializer, PayloadFormat};
use crate::config::{ConsumerDefaults, OffsetReset};
use crate::error::SetupError;

pub const DEFAULT_GROUP_ID: &str = "default";
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 500;

/// What one consume loop reads and how it turns payloads into `T`.
pub struct Subscription<T> {
    topics: Vec<String>,
    group_id: String,
    offset_reset: OffsetReset,
    max_chunk_size: usize,
    deserializer: Arc<dyn PayloadDeserializer<T>>,
}

impl<T> Subscription<T>
where
    T: DeserializeOwned + Default + 'static,
{
    /// JSON is the default payload format for every subscription; use
    /// `with_deserializer` or `with_format` to read something else.
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_payload_deserializer(topics, Arc::new(JsonDeserializer))
    }

    pub fn from_defaults<I, S>(topics: I, defaults: &ConsumerDefaults) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(topics)
            .with_group_id(&defaults.kafka_consumer_group)
            .with_offset_reset(defaults.kafka_consumer_offset_reset)
            .with_max_chunk_size(defaults.kafka_consumer_max_chunk_size)
            .with_format(defaults.kafka_consumer_payload_format)
    }

    pub fn with_format(self, format: PayloadFormat) -> Self {
        self.with_deserializer(format.deserializer())
    }
}

impl<T> Subscription<T> {
    /// For payload types that are not serde types. `T` only has to be what
    /// `deserializer` produces.
    pub fn with_payload_deserializer<I, S>(
        topics: I,
        deserializer: Arc<dyn PayloadDeserializer<T>>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            group_id: DEFAULT_GROUP_ID.to_owned(),
            offset_reset: OffsetReset::Earliest,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            deserializer,
        }
    }

    pub fn with_group_id(mut self, group_id: &str) -> Self {
        self.group_id = group_id.to_owned();
        self
    }

    pub fn with_offset_reset(mut self, offset_reset: OffsetReset) -> Self {
        self.offset_reset = offset_reset;
        self
    }

    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    pub fn with_deserializer(mut self, deserializer: Arc<dyn PayloadDeserializer<T>>) -> Self {
        self.deserializer = deserializer;
        self
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Topics joined with commas, used as a label in logs and metrics.
    pub fn topics_label(&self) -> String {
        self.topics.join(",")
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn offset_reset(&self) -> OffsetReset {
        self.offset_reset
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    pub fn deserializer(&self) -> Arc<dyn PayloadDeserializer<T>> {
        self.deserializer.clone()
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        if self.topics.is_empty() {
            return Err(SetupError::NoTopics);
        }
        if self.topics.iter().any(|t| t.trim().is_empty()) {
            return Err(SetupError::EmptyTopic);
        }
        if self.group_id.trim().is_empty() {
            return Err(SetupError::EmptyGroupId);
        }
        if self.max_chunk_size == 0 {
            return Err(SetupError::ZeroChunkSize);
        }
        Ok(())
    }
}
