use async_trait::async_trait;

use crate::error::{CommitError, FetchError};
use crate::types::{OffsetMap, RawRecord};

/// The broker connection a consume loop drives.
///
/// Each loop exclusively owns its client, so implementations need no
/// internal locking. Cancellation is handled by the loop racing `fetch`
/// against its token; a client never reports it as an error.
#[async_trait]
pub trait BrokerClient: Send {
    /// Wait for the next record.
    async fn fetch(&mut self) -> Result<RawRecord, FetchError>;

    /// Return a record only if one is already buffered. `Ok(None)` means
    /// nothing is available right now.
    fn try_fetch(&mut self) -> Result<Option<RawRecord>, FetchError>;

    /// Acknowledge everything up to and including the given offset, one entry
    /// per partition.
    fn commit(&mut self, offsets: &OffsetMap) -> Result<(), CommitError>;

    /// Move the fetch position of each partition back to the given offset so
    /// the records from there on are delivered again.
    fn rewind(&mut self, offsets: &OffsetMap) -> Result<(), FetchError>;

    /// Leave the consumer group so partitions are handed over without waiting
    /// for a session timeout. Consumes the client.
    fn close(self)
    where
        Self: Sized;
}
