//! CLI handling for checkpoint store config (via CLI arguments and environment variables).

use std::{fs, path::PathBuf, sync::Arc};

use kinesis_consumer_core::{CheckpointStore, MemoryCheckpointStore, ObjectStoreCheckpointStore};
use object_store::local::LocalFileSystem;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ParseError {
    #[error("Unable to create checkpoint directory {path:?}: {source}")]
    CreatingCheckpointDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unable to create local store {path:?}: {source}")]
    CreateLocalFileSystem {
        path: PathBuf,
        source: object_store::Error,
    },

    #[error("Specified {store:?} for the checkpoint store, required configuration missing for {missing}")]
    MissingConfig {
        store: CheckpointStoreType,
        missing: String,
    },
}

/// Where checkpoints are kept.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CheckpointStoreType {
    /// In process memory. Progress is lost on exit.
    #[default]
    Memory,

    /// One JSON file per shard below `--checkpoint-dir`.
    File,
}

/// CLI config for the checkpoint store.
#[derive(Debug, Clone, clap::Parser)]
pub struct CheckpointStoreConfig {
    /// Which checkpoint store to use.
    ///
    /// The default keeps checkpoints in memory only, so every run starts from the configured
    /// initial position. Pass `--checkpoint-store file` to resume where the last run left off.
    #[clap(
        value_enum,
        long = "checkpoint-store",
        env = "KINESIS_CHECKPOINT_STORE",
        ignore_case = true,
        default_value_t = CheckpointStoreType::default(),
        action
    )]
    pub checkpoint_store: CheckpointStoreType,

    /// Directory for checkpoint files.
    ///
    /// Required for `--checkpoint-store file`.
    #[clap(long = "checkpoint-dir", env = "KINESIS_CHECKPOINT_DIR", action)]
    pub checkpoint_dir: Option<PathBuf>,
}

impl CheckpointStoreConfig {
    /// Create the configured checkpoint store, creating the checkpoint directory if needed.
    pub fn make_checkpoint_store(&self) -> Result<Arc<dyn CheckpointStore>, ParseError> {
        if self.checkpoint_dir.is_some() && self.checkpoint_store != CheckpointStoreType::File {
            warn!(
                "checkpoint dir specified, but ignored for checkpoint store type {:?}",
                self.checkpoint_store
            );
        }

        match self.checkpoint_store {
            CheckpointStoreType::Memory => {
                warn!(
                    checkpoint_store = "memory",
                    "checkpoints are not persisted, use --checkpoint-store file to resume after a restart"
                );
                Ok(Arc::new(MemoryCheckpointStore::default()))
            }
            CheckpointStoreType::File => {
                let path = self
                    .checkpoint_dir
                    .as_ref()
                    .ok_or_else(|| ParseError::MissingConfig {
                        store: self.checkpoint_store,
                        missing: "checkpoint-dir".to_string(),
                    })?;

                fs::create_dir_all(path).map_err(|source| {
                    ParseError::CreatingCheckpointDirectory {
                        path: path.clone(),
                        source,
                    }
                })?;
                let object_store = LocalFileSystem::new_with_prefix(path).map_err(|source| {
                    ParseError::CreateLocalFileSystem {
                        path: path.clone(),
                        source,
                    }
                })?;

                info!(checkpoint_store = "file", checkpoint_dir = ?path, "persisting checkpoints");
                Ok(Arc::new(ObjectStoreCheckpointStore::new(Arc::new(
                    object_store,
                ))))
            }
        }
    }
}
