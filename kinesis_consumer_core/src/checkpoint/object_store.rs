use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use object_store::{ObjectStore, PutPayload, path::Path};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CheckpointError, CheckpointKey, CheckpointStore, check_advance};
use crate::record::SequenceNumber;

const CHECKPOINT_ROOT: &str = "checkpoints";

/// On-disk representation of one checkpoint.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    sequence_number: String,
    updated_at: DateTime<Utc>,
}

/// [`CheckpointStore`] that keeps one small JSON document per key in an [`ObjectStore`].
///
/// Documents live at `checkpoints/<app>/<stream>/<shard>.json`. Any object store works: the
/// in-memory one for tests, the local file system for a single host, or a bucket for durable
/// storage that outlives the host.
#[derive(Debug)]
pub struct ObjectStoreCheckpointStore {
    object_store: Arc<dyn ObjectStore>,
    /// Serialises the read-compare-write of [`CheckpointStore::set`] per key.
    key_locks: parking_lot::Mutex<HashMap<CheckpointKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ObjectStoreCheckpointStore {
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            object_store,
            key_locks: Default::default(),
        }
    }

    fn key_lock(&self, key: &CheckpointKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.key_locks.lock().entry(key.clone()).or_default())
    }

    async fn read(&self, key: &CheckpointKey) -> Result<Option<SequenceNumber>, CheckpointError> {
        let path = checkpoint_path(key);

        let bytes = match self.object_store.get(&path).await {
            Ok(res) => res.bytes().await.map_err(|source| CheckpointError::Storage {
                key: key.clone(),
                source,
            })?,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Storage {
                    key: key.clone(),
                    source,
                });
            }
        };

        let doc: CheckpointDocument =
            serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        let sequence_number =
            doc.sequence_number
                .parse()
                .map_err(|e: crate::record::ParseSequenceNumberError| {
                    CheckpointError::Corrupt {
                        key: key.clone(),
                        reason: e.to_string(),
                    }
                })?;

        Ok(Some(sequence_number))
    }
}

#[async_trait]
impl CheckpointStore for ObjectStoreCheckpointStore {
    async fn get(&self, key: &CheckpointKey) -> Result<Option<SequenceNumber>, CheckpointError> {
        self.read(key).await
    }

    async fn set(
        &self,
        key: &CheckpointKey,
        sequence_number: SequenceNumber,
    ) -> Result<(), CheckpointError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let stored = self.read(key).await?;
        if !check_advance(key, stored.as_ref(), &sequence_number)? {
            return Ok(());
        }

        let doc = CheckpointDocument {
            sequence_number: sequence_number.to_string(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec(&doc).map_err(|e| CheckpointError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        let path = checkpoint_path(key);
        self.object_store
            .put(&path, PutPayload::from(json))
            .await
            .map_err(|source| CheckpointError::Storage {
                key: key.clone(),
                source,
            })?;

        debug!(%key, %sequence_number, %path, "checkpoint written");
        Ok(())
    }
}

fn checkpoint_path(key: &CheckpointKey) -> Path {
    let file_name = format!("{}.json", key.shard);
    Path::from_iter([
        CHECKPOINT_ROOT,
        key.app.as_ref(),
        key.stream.as_ref(),
        file_name.as_str(),
    ])
}
