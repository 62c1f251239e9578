//! An in-memory `BrokerClient` for driving consume loops in tests without a
//! broker. Records are published through a `BrokerControl`, which also exposes
//! what the loop committed, rewound and whether it closed the client.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use serde::Serialize;
use tokio::sync::Notify;

use crate::client::BrokerClient;
use crate::error::{CommitError, FetchError};
use crate::types::{OffsetMap, Partition, Position, RawRecord};

enum Entry {
    Record(RawRecord),
    Error,
}

#[derive(Default)]
struct BrokerState {
    queue: VecDeque<Entry>,
    next_offsets: HashMap<Partition, i64>,
    // every record handed out, per partition, by offset
    delivered: BTreeMap<Partition, BTreeMap<i64, RawRecord>>,
    commits: Vec<OffsetMap>,
    rewinds: Vec<OffsetMap>,
    failing_commits: usize,
    closed: usize,
}

impl BrokerState {
    fn pop(&mut self) -> Option<Result<RawRecord, FetchError>> {
        let entry = self.queue.pop_front()?;
        Some(match entry {
            Entry::Record(record) => {
                self.delivered
                    .entry(record.position.partition().clone())
                    .or_default()
                    .insert(record.position.offset(), record.clone());
                Ok(record)
            }
            Entry::Error => Err(FetchError::Kafka(KafkaError::MessageConsumption(
                RDKafkaErrorCode::BrokerTransportFailure,
            ))),
        })
    }
}

pub struct ScriptedBroker {
    state: Arc<Mutex<BrokerState>>,
    published: Arc<Notify>,
}

#[derive(Clone)]
pub struct BrokerControl {
    state: Arc<Mutex<BrokerState>>,
    published: Arc<Notify>,
}

impl ScriptedBroker {
    pub fn new() -> (Self, BrokerControl) {
        let state = Arc::new(Mutex::new(BrokerState::default()));
        let published = Arc::new(Notify::new());
        let broker = Self {
            state: state.clone(),
            published: published.clone(),
        };
        (broker, BrokerControl { state, published })
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    fn next(&self) -> Option<Result<RawRecord, FetchError>> {
        self.lock().pop()
    }
}

#[async_trait]
impl BrokerClient for ScriptedBroker {
    async fn fetch(&mut self) -> Result<RawRecord, FetchError> {
        let published = self.published.clone();
        loop {
            // registered before checking the queue so a publish in between still wakes us
            let notified = published.notified();
            if let Some(next) = self.next() {
                return next;
            }
            notified.await;
        }
    }

    fn try_fetch(&mut self) -> Result<Option<RawRecord>, FetchError> {
        self.next().transpose()
    }

    fn commit(&mut self, offsets: &OffsetMap) -> Result<(), CommitError> {
        let mut state = self.lock();
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(CommitError::Kafka(KafkaError::ConsumerCommit(
                RDKafkaErrorCode::RebalanceInProgress,
            )));
        }
        state.commits.push(offsets.clone());
        Ok(())
    }

    fn rewind(&mut self, offsets: &OffsetMap) -> Result<(), FetchError> {
        let mut state = self.lock();
        state.rewinds.push(offsets.clone());

        let mut replay = Vec::new();
        for (partition, offset) in offsets.iter() {
            // drop what is still queued for the partition, it is re-queued in order below
            let mut pending = Vec::new();
            state.queue.retain(|entry| match entry {
                Entry::Record(r) if r.position.partition() == partition => {
                    pending.push(r.clone());
                    false
                }
                _ => true,
            });
            if let Some(delivered) = state.delivered.get(partition) {
                replay.extend(delivered.range(offset..).map(|(_, r)| r.clone()));
            }
            replay.extend(pending.into_iter().filter(|r| r.position.offset() >= offset));
        }

        for record in replay.into_iter().rev() {
            state.queue.push_front(Entry::Record(record));
        }
        Ok(())
    }

    fn close(self) {
        self.lock().closed += 1;
    }
}

impl BrokerControl {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    /// Append a record to the end of the partition, returns its offset.
    pub fn publish(&self, topic: &str, partition: i32, payload: Option<Vec<u8>>) -> i64 {
        let partition = Partition::new(topic, partition);
        let offset = {
            let mut state = self.lock();
            let next = state.next_offsets.entry(partition.clone()).or_insert(0);
            let offset = *next;
            *next += 1;
            state.queue.push_back(Entry::Record(RawRecord::new(
                Position::new(partition, offset),
                payload,
            )));
            offset
        };
        self.published.notify_waiters();
        offset
    }

    pub fn publish_json<T: Serialize>(&self, topic: &str, partition: i32, value: &T) -> i64 {
        let payload = serde_json::to_vec(value).unwrap();
        self.publish(topic, partition, Some(payload))
    }

    /// The next fetch at this point in the stream fails with a broker error.
    pub fn inject_fetch_error(&self) {
        self.lock().queue.push_back(Entry::Error);
        self.published.notify_waiters();
    }

    pub fn fail_next_commits(&self, count: usize) {
        self.lock().failing_commits = count;
    }

    /// Successful commits, in order.
    pub fn commits(&self) -> Vec<OffsetMap> {
        self.lock().commits.clone()
    }

    pub fn rewinds(&self) -> Vec<OffsetMap> {
        self.lock().rewinds.clone()
    }

    pub fn close_count(&self) -> usize {
        self.lock().closed
    }
}
