use anyhow::Result;
use async_trait::async_trait;
use common_kafka::BatchHandler;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Consumer handler that only logs what it receives. Wired to the topics in
/// CONSUMER_TOPICS to check a deployment end to end.
pub struct BatchLogger {
    topics: String,
}

impl BatchLogger {
    pub fn new(topics: &[String]) -> Self {
        Self {
            topics: topics.join(","),
        }
    }
}

#[async_trait]
impl BatchHandler<Value> for BatchLogger {
    async fn handle_batch(&self, batch: Vec<Value>, _cancel: CancellationToken) -> Result<()> {
        metrics::counter!("batch_logger_records_total", "topics" => self.topics.clone())
            .increment(batch.len() as u64);

        let first = batch.first().map(Value::to_string).unwrap_or_default();
        info!(
            topics = self.topics,
            size = batch.len(),
            first = first.chars().take(200).collect::<String>(),
            "received batch"
        );
        Ok(())
    }
}
