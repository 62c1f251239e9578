use std::future::Future;
use std::marker::PhantomData;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Processes one sealed batch of payloads.
///
/// Returning `Ok` lets the consumer commit the batch; returning an error
/// discards it and the same records are delivered again.
#[async_trait]
pub trait BatchHandler<T>: Send + Sync {
    async fn handle_batch(&self, batch: Vec<T>, cancel: CancellationToken) -> Result<()>;
}

/// Processes one payload at a time.
#[async_trait]
pub trait RecordHandler<T>: Send + Sync {
    async fn handle(&self, record: T, cancel: CancellationToken) -> Result<()>;
}

/// Wraps an async closure as a `BatchHandler`.
pub struct FnHandler<F, T> {
    f: F,
    _payload: PhantomData<fn(T)>,
}

pub fn handler_fn<F, Fut, T>(f: F) -> FnHandler<F, T>
where
    F: Fn(Vec<T>, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    FnHandler {
        f,
        _payload: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, T> BatchHandler<T> for FnHandler<F, T>
where
    F: Fn(Vec<T>, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
    T: Send + 'static,
{
    async fn handle_batch(&self, batch: Vec<T>, cancel: CancellationToken) -> Result<()> {
        (self.f)(batch, cancel).await
    }
}

/// Hands the records of a batch to a `RecordHandler` one by one, in order.
/// The first failing record fails the whole batch.
pub struct PerRecord<H>(pub H);

#[async_trait]
impl<T, H> BatchHandler<T> for PerRecord<H>
where
    T: Send + 'static,
    H: RecordHandler<T>,
{
    async fn handle_batch(&self, batch: Vec<T>, cancel: CancellationToken) -> Result<()> {
        for record in batch {
            self.0.handle(record, cancel.clone()).await?;
        }
        Ok(())
    }
}
