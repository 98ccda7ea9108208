//! Consume a partitioned event stream shard by shard, with durable per-shard progress.
//!
//! # Moving parts
//!
//! The [`StreamCoordinator`] lists the shards of a stream once and starts one [`ShardScanner`]
//! task per shard. Each scanner:
//!
//! 1. reads the shard's checkpoint from the [`CheckpointStore`] and acquires a
//!    [`ShardIterator`] just after it, or at the configured [`InitialPosition`] on a first run,
//! 2. polls the [`StreamClient`] and feeds the returned records into its [`Buffer`],
//! 3. hands the buffered batch to the [`RecordHandler`] once the buffer is full, or once a poll
//!    comes back empty, and
//! 4. only after the handler succeeded, checkpoints the last sequence number of the batch.
//!
//! Delivery is therefore at-least-once. Checkpoints never move backwards, so a resumed scanner
//! never skips a record that was not handled.
//!
//! Scanners share nothing but the (stateless) client, store and handler. A failing shard is
//! reported in the [`RunReport`] and never stops the others.
//!
//! # Logging
//!
//! The crate logs through [`tracing`] and never installs a subscriber itself.

pub mod backoff;
pub mod buffer;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod handler;
pub mod record;
pub mod scanner;

pub use self::{
    backoff::BackoffConfig,
    buffer::Buffer,
    checkpoint::{
        CheckpointError, CheckpointKey, CheckpointStore, MemoryCheckpointStore,
        ObjectStoreCheckpointStore,
    },
    client::{
        ClientError, ClientErrorKind, GetRecordsOutput, StartingPosition, StreamClient,
    },
    config::{ConsumerConfig, InitialPosition},
    coordinator::{ConsumerHandle, CoordinatorError, RunReport, ShardFailure, StreamCoordinator},
    handler::{HandlerAction, HandlerError, RecordHandler},
    record::{Record, SequenceNumber, ShardId, ShardIterator},
    scanner::{ExitReason, ScannerError, ShardScanner, ShardSummary},
};
