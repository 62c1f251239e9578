use std::fmt;

use crate::metrics_consts::{
    CONSUMER_BATCH_SIZE, CONSUMER_OFFSETS_COMMITTED, CONSUMER_PROCESS_FAILED,
    CONSUMER_RECORDS_HANDLED, CONSUMER_REBALANCE_EVENTS, CONSUMER_REWIND_FAILED,
};

/// Why a consume iteration did not end with a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Fetch,
    Handler,
    Commit,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Fetch => "fetch",
            FailureKind::Handler => "handler",
            FailureKind::Commit => "commit",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceKind {
    Assign,
    Revoke,
    Error,
}

impl RebalanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebalanceKind::Assign => "assign",
            RebalanceKind::Revoke => "revoke",
            RebalanceKind::Error => "error",
        }
    }
}

/// Where consume loops report what happened to them. Injected when the
/// consumer is built; nothing in the loop depends on what it does.
pub trait ConsumerMetrics: Send + Sync {
    fn iteration_failed(&self, topics: &str, kind: FailureKind);
    fn batch_handled(&self, topics: &str, size: usize);
    fn offsets_committed(&self, topics: &str, partitions: usize);
    fn rewind_failed(&self, topics: &str);
    fn rebalance(&self, kind: RebalanceKind, partitions: usize);
}

/// Reports through the `metrics` facade, picked up by the Prometheus exporter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusConsumerMetrics;

impl ConsumerMetrics for PrometheusConsumerMetrics {
    fn iteration_failed(&self, topics: &str, kind: FailureKind) {
        metrics::counter!(
            CONSUMER_PROCESS_FAILED,
            "topics" => topics.to_owned(),
            "kind" => kind.as_str()
        )
        .increment(1);
    }

    fn batch_handled(&self, topics: &str, size: usize) {
        metrics::histogram!(CONSUMER_BATCH_SIZE, "topics" => topics.to_owned())
            .record(size as f64);
        metrics::counter!(CONSUMER_RECORDS_HANDLED, "topics" => topics.to_owned())
            .increment(size as u64);
    }

    fn offsets_committed(&self, topics: &str, partitions: usize) {
        metrics::counter!(CONSUMER_OFFSETS_COMMITTED, "topics" => topics.to_owned())
            .increment(partitions as u64);
    }

    fn rewind_failed(&self, topics: &str) {
        metrics::counter!(CONSUMER_REWIND_FAILED, "topics" => topics.to_owned()).increment(1);
    }

    fn rebalance(&self, kind: RebalanceKind, partitions: usize) {
        metrics::counter!(CONSUMER_REBALANCE_EVENTS, "event_type" => kind.as_str())
            .increment(partitions as u64);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConsumerMetrics;

impl ConsumerMetrics for NoopConsumerMetrics {
    fn iteration_failed(&self, _topics: &str, _kind: FailureKind) {}
    fn batch_handled(&self, _topics: &str, _size: usize) {}
    fn offsets_committed(&self, _topics: &str, _partitions: usize) {}
    fn rewind_failed(&self, _topics: &str) {}
    fn rebalance(&self, _kind: RebalanceKind, _partitions: usize) {}
}
