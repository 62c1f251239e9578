use crate::types::{OffsetMap, Record};

/// Records collected during one iteration of a consume loop.
///
/// Sealed by the loop once `try_add` reports the target size was reached or
/// the broker has nothing more buffered. Records keep fetch order, so within a
/// partition they are in increasing offset order.
pub struct Batch<T> {
    records: Vec<Record<T>>,
    target: usize,
}

impl<T> Batch<T> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            target: 1,
        }
    }

    /// Reset to empty, ready to accept up to `target` records.
    pub fn begin(&mut self, target: usize) {
        self.records.clear();
        self.target = target.max(1);
        self.records.reserve(self.target);
    }

    /// Append a record, returns true once the batch is full.
    pub fn try_add(&mut self, record: Record<T>) -> bool {
        self.records.push(record);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.target
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Highest offset per partition, what a successful batch commits.
    pub fn commit_offsets(&self) -> OffsetMap {
        OffsetMap::highest_of(self.records.iter().map(|r| r.position()))
    }

    /// Lowest offset per partition, where to seek back to if the batch failed.
    pub fn rewind_offsets(&self) -> OffsetMap {
        OffsetMap::lowest_of(self.records.iter().map(|r| r.position()))
    }

    /// Take the records out, leaving the batch empty.
    pub fn drain(&mut self) -> Vec<Record<T>> {
        std::mem::take(&mut self.records)
    }
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Grow the target batch size by one after a handled batch, capped at `max`.
pub fn next_batch_size(current: usize, max: usize) -> usize {
    current.saturating_add(1).min(max.max(1))
}
