use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{next_batch_size, Batch};
use crate::client::BrokerClient;
use crate::codec::PayloadDeserializer;
use crate::error::FetchError;
use crate::handler::BatchHandler;
use crate::metrics::{ConsumerMetrics, FailureKind};
use crate::subscription::Subscription;
use crate::types::{OffsetMap, RawRecord, Record};

const DEFAULT_REWIND_BACKOFF: Duration = Duration::from_millis(100);
const MAX_REWIND_BACKOFF: Duration = Duration::from_secs(10);

/// Lifecycle of a consume loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Between iterations, about to check for cancellation
    Running,
    /// Fetching, handling or committing a batch
    Iterating,
    /// Cancellation observed, leaving the consumer group
    Stopping,
    Stopped,
}

/// What a consume loop did over its lifetime, returned once it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    pub iterations: u64,
    pub batches_handled: u64,
    pub records_handled: u64,
    pub fetch_failures: u64,
    pub handler_failures: u64,
    pub commit_failures: u64,
    pub final_batch_size: usize,
}

enum Fill {
    Sealed,
    Failed(FetchError),
    Cancelled,
}

/// Drives one subscription: fetch a batch, hand it to the handler, commit it.
///
/// Batches start at one record and grow by one per handled batch up to the
/// subscription's max chunk size. Every iteration blocks for a first record
/// and then only takes what the client already has buffered, so a quiet
/// topic produces small batches rather than waiting to fill them.
///
/// Nothing short of cancellation ends the loop. Fetch, handler and commit
/// failures are logged, counted and the loop moves on; a failed handler
/// causes the batch's records to be delivered again instead of committed.
/// Nothing new is fetched until the client has been rewound to them.
pub struct BatchConsumer<B, T> {
    client: B,
    topics: String,
    max_chunk_size: usize,
    rewind_backoff: Duration,
    deserializer: Arc<dyn PayloadDeserializer<T>>,
    metrics: Arc<dyn ConsumerMetrics>,
    state: watch::Sender<LoopState>,
}

impl<B, T> BatchConsumer<B, T>
where
    B: BrokerClient,
    T: Send + 'static,
{
    pub fn new(
        client: B,
        subscription: &Subscription<T>,
        metrics: Arc<dyn ConsumerMetrics>,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Running);
        Self {
            client,
            topics: subscription.topics_label(),
            max_chunk_size: subscription.max_chunk_size().max(1),
            rewind_backoff: DEFAULT_REWIND_BACKOFF,
            deserializer: subscription.deserializer(),
            metrics,
            state,
        }
    }

    /// First wait before retrying a failed rewind, doubled per attempt.
    pub fn with_rewind_backoff(mut self, backoff: Duration) -> Self {
        self.rewind_backoff = backoff;
        self
    }

    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: LoopState) {
        self.state.send_replace(state);
    }

    /// Consume until `cancel` fires, then leave the consumer group.
    pub async fn run<H>(mut self, handler: &H, cancel: CancellationToken) -> ConsumeSummary
    where
        H: BatchHandler<T> + ?Sized,
    {
        info!(
            topics = self.topics,
            max_chunk_size = self.max_chunk_size,
            "starting batch consumption"
        );

        let mut summary = ConsumeSummary::default();
        let mut target = 1;
        let mut batch = Batch::new();

        self.set_state(LoopState::Running);
        while !cancel.is_cancelled() {
            self.set_state(LoopState::Iterating);
            summary.iterations += 1;
            batch.begin(target);

            match self.fill(&mut batch, &cancel, &mut summary).await {
                Fill::Sealed => {}
                Fill::Cancelled => break,
                Fill::Failed(e) => {
                    match e.position() {
                        Some(position) => error!(
                            topics = self.topics,
                            partition = %position.partition(),
                            offset = position.offset(),
                            "on consume: {}",
                            e
                        ),
                        None => error!(topics = self.topics, "on consume: {}", e),
                    }
                    self.count_failure(FailureKind::Fetch, &mut summary);
                    self.set_state(LoopState::Running);
                    continue;
                }
            }

            let commit_offsets = batch.commit_offsets();
            let rewind_offsets = batch.rewind_offsets();
            let size = batch.len();
            debug!(
                topics = self.topics,
                batch_target = target,
                "handling batch of {} up to {}",
                size,
                commit_offsets
            );
            let payloads: Vec<T> = batch.drain().into_iter().map(Record::into_payload).collect();

            match handler.handle_batch(payloads, cancel.clone()).await {
                Ok(()) => {
                    summary.batches_handled += 1;
                    summary.records_handled += size as u64;
                    self.metrics.batch_handled(&self.topics, size);

                    match self.client.commit(&commit_offsets) {
                        Ok(()) => {
                            self.metrics
                                .offsets_committed(&self.topics, commit_offsets.len());
                        }
                        Err(e) => {
                            error!(
                                topics = self.topics,
                                offsets = %commit_offsets,
                                "on commit: {}",
                                e
                            );
                            self.count_failure(FailureKind::Commit, &mut summary);
                        }
                    }
                    target = next_batch_size(target, self.max_chunk_size);
                }
                Err(e) => {
                    error!(
                        topics = self.topics,
                        offsets = %rewind_offsets,
                        "batch handler failed, records will be delivered again: {:#}",
                        e
                    );
                    self.count_failure(FailureKind::Handler, &mut summary);
                    if !self.rewind(&rewind_offsets, &cancel).await {
                        break;
                    }
                }
            }

            self.set_state(LoopState::Running);
        }

        summary.final_batch_size = target;
        self.shutdown();
        summary
    }

    /// Retry the rewind until it succeeds. Fetching past the failed records
    /// would let the next commit skip them. Returns false when cancelled
    /// first; they stay uncommitted and come back after a restart.
    async fn rewind(&mut self, offsets: &OffsetMap, cancel: &CancellationToken) -> bool {
        let mut backoff = self.rewind_backoff;
        loop {
            let e = match self.client.rewind(offsets) {
                Ok(()) => return true,
                Err(e) => e,
            };
            error!(
                topics = self.topics,
                offsets = %offsets,
                retry_in_ms = backoff.as_millis() as u64,
                "failed to rewind after handler failure: {}",
                e
            );
            self.metrics.rewind_failed(&self.topics);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_REWIND_BACKOFF);
        }
    }

    /// Block for one record, then top up with whatever is already buffered.
    async fn fill(
        &mut self,
        batch: &mut Batch<T>,
        cancel: &CancellationToken,
        summary: &mut ConsumeSummary,
    ) -> Fill {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Fill::Cancelled,
            fetched = self.client.fetch() => fetched,
        };

        let record = match first.and_then(|raw| self.decode(raw)) {
            Ok(record) => record,
            Err(e) => return Fill::Failed(e),
        };
        if batch.try_add(record) {
            return Fill::Sealed;
        }

        loop {
            let raw = match self.client.try_fetch() {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    self.seal_on_error(e, batch, summary);
                    break;
                }
            };
            match self.decode(raw) {
                Ok(record) => {
                    if batch.try_add(record) {
                        break;
                    }
                }
                Err(e) => {
                    self.seal_on_error(e, batch, summary);
                    break;
                }
            }
        }
        Fill::Sealed
    }

    // Records already collected are still handled, the failing one is skipped
    fn seal_on_error(&self, e: FetchError, batch: &Batch<T>, summary: &mut ConsumeSummary) {
        match e.position() {
            Some(position) => warn!(
                topics = self.topics,
                partition = %position.partition(),
                offset = position.offset(),
                sealed = batch.len(),
                "on consume, sealing batch early: {}",
                e
            ),
            None => warn!(
                topics = self.topics,
                sealed = batch.len(),
                "on consume, sealing batch early: {}",
                e
            ),
        }
        self.count_failure(FailureKind::Fetch, summary);
    }

    fn decode(&self, raw: RawRecord) -> Result<Record<T>, FetchError> {
        let RawRecord { position, payload } = raw;
        match self.deserializer.deserialize(payload.as_deref()) {
            Ok(value) => Ok(Record::new(value, position)),
            Err(source) => Err(FetchError::Deserialize { position, source }),
        }
    }

    fn count_failure(&self, kind: FailureKind, summary: &mut ConsumeSummary) {
        match kind {
            FailureKind::Fetch => summary.fetch_failures += 1,
            FailureKind::Handler => summary.handler_failures += 1,
            FailureKind::Commit => summary.commit_failures += 1,
        }
        self.metrics.iteration_failed(&self.topics, kind);
    }

    fn shutdown(self) {
        self.set_state(LoopState::Stopping);
        info!(topics = self.topics, "consume loop cancelled, shutting down");
        let Self { client, state, .. } = self;
        client.close();
        state.send_replace(LoopState::Stopped);
    }
}
