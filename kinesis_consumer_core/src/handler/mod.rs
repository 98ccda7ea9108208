//! The user-supplied processing step.

use async_trait::async_trait;

use crate::record::{Record, ShardId};

pub mod mock;

/// Error returned by a [`RecordHandler`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a scanner should do after a batch was handled successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    /// Checkpoint the batch and keep reading.
    Continue,

    /// Checkpoint the batch and stop reading this shard.
    Stop,
}

/// Processes the batches flushed by a scanner.
///
/// A single handler is shared by the scanners of all shards, so calls for different shards may
/// run concurrently. Calls for one shard never overlap and arrive in sequence number order.
///
/// Delivery is at-least-once: the checkpoint is only written after this returns `Ok`, so a batch
/// whose handling failed, or whose checkpoint was lost, is delivered again after a restart.
#[async_trait]
pub trait RecordHandler: std::fmt::Debug + Send + Sync {
    async fn handle_records(
        &self,
        shard_id: &ShardId,
        records: &[Record],
    ) -> Result<HandlerAction, HandlerError>;
}

#[async_trait]
impl<T> RecordHandler for std::sync::Arc<T>
where
    T: RecordHandler + ?Sized,
{
    async fn handle_records(
        &self,
        shard_id: &ShardId,
        records: &[Record],
    ) -> Result<HandlerAction, HandlerError> {
        (**self).handle_records(shard_id, records).await
    }
}
