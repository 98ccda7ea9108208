use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CheckpointError, CheckpointKey, CheckpointStore, check_advance};
use crate::record::SequenceNumber;

/// Process-local [`CheckpointStore`].
///
/// Progress is lost when the process exits, so this is only useful for tests and for consumers
/// that always start from the configured initial position.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<CheckpointKey, SequenceNumber>>,
}

impl MemoryCheckpointStore {
    /// All committed checkpoints.
    pub fn snapshot(&self) -> HashMap<CheckpointKey, SequenceNumber> {
        self.checkpoints.read().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &CheckpointKey) -> Result<Option<SequenceNumber>, CheckpointError> {
        Ok(self.checkpoints.read().get(key).cloned())
    }

    async fn set(
        &self,
        key: &CheckpointKey,
        sequence_number: SequenceNumber,
    ) -> Result<(), CheckpointError> {
        let mut guard = self.checkpoints.write();
        if check_advance(key, guard.get(key), &sequence_number)? {
            guard.insert(key.clone(), sequence_number);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::test_utils::{key, perform_generic_tests};

    #[tokio::test]
    async fn generic() {
        perform_generic_tests(MemoryCheckpointStore::default()).await;
    }

    #[tokio::test]
    async fn snapshot_lists_committed_keys() {
        let store = MemoryCheckpointStore::default();
        store.set(&key("a"), SequenceNumber::from(1)).await.unwrap();
        store.set(&key("b"), SequenceNumber::from(2)).await.unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&key("b")], SequenceNumber::from(2));
    }
}
