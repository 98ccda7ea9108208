//! Durable per-shard read progress.
//!
//! A checkpoint is the sequence number of the last record a handler has fully processed for one
//! (application, stream, shard) triple. Checkpoints only ever move forward: every
//! [`CheckpointStore`] rejects a write that would move a key backwards, otherwise the next resume
//! would silently skip records.

use std::{fmt::Display, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{SequenceNumber, ShardId};

mod memory;
mod object_store;

pub use self::memory::MemoryCheckpointStore;
pub use self::object_store::ObjectStoreCheckpointStore;

/// Identifies one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckpointKey {
    pub app: Arc<str>,
    pub stream: Arc<str>,
    pub shard: ShardId,
}

impl CheckpointKey {
    pub fn new(app: impl AsRef<str>, stream: impl AsRef<str>, shard: ShardId) -> Self {
        Self {
            app: Arc::from(app.as_ref()),
            stream: Arc::from(stream.as_ref()),
            shard,
        }
    }
}

impl Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.app, self.stream, self.shard)
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(
        "refusing to move checkpoint {key} backwards from {stored} to {attempted}"
    )]
    Regression {
        key: CheckpointKey,
        stored: SequenceNumber,
        attempted: SequenceNumber,
    },

    #[error("checkpoint storage error for {key}: {source}")]
    Storage {
        key: CheckpointKey,
        source: ::object_store::Error,
    },

    #[error("checkpoint for {key} is corrupt: {reason}")]
    Corrupt { key: CheckpointKey, reason: String },
}

/// Persistence of checkpoints.
///
/// Implementations must be safe to call concurrently for distinct keys. A consumer owns each of
/// its keys exclusively, but backends still serialise writes per key so that racing writers can
/// never regress a stored value.
#[async_trait]
pub trait CheckpointStore: std::fmt::Debug + Send + Sync {
    /// Whether a checkpoint has been committed for `key`.
    async fn exists(&self, key: &CheckpointKey) -> Result<bool, CheckpointError> {
        Ok(self.get(key).await?.is_some())
    }

    /// The committed sequence number for `key`, if any.
    async fn get(&self, key: &CheckpointKey) -> Result<Option<SequenceNumber>, CheckpointError>;

    /// Commit `sequence_number` for `key`.
    ///
    /// Committing the currently stored value again is a no-op; committing a lower value fails
    /// with [`CheckpointError::Regression`] and leaves the store unchanged.
    async fn set(
        &self,
        key: &CheckpointKey,
        sequence_number: SequenceNumber,
    ) -> Result<(), CheckpointError>;
}

#[async_trait]
impl<T> CheckpointStore for Arc<T>
where
    T: CheckpointStore + ?Sized,
{
    async fn exists(&self, key: &CheckpointKey) -> Result<bool, CheckpointError> {
        (**self).exists(key).await
    }

    async fn get(&self, key: &CheckpointKey) -> Result<Option<SequenceNumber>, CheckpointError> {
        (**self).get(key).await
    }

    async fn set(
        &self,
        key: &CheckpointKey,
        sequence_number: SequenceNumber,
    ) -> Result<(), CheckpointError> {
        (**self).set(key, sequence_number).await
    }
}

/// Shared monotonicity check used by the backends.
fn check_advance(
    key: &CheckpointKey,
    stored: Option<&SequenceNumber>,
    attempted: &SequenceNumber,
) -> Result<bool, CheckpointError> {
    match stored {
        Some(stored) if attempted < stored => Err(CheckpointError::Regression {
            key: key.clone(),
            stored: stored.clone(),
            attempted: attempted.clone(),
        }),
        Some(stored) if attempted == stored => Ok(false),
        _ => Ok(true),
    }
}
