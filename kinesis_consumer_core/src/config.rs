use std::{num::NonZeroUsize, time::Duration};

use crate::{backoff::BackoffConfig, buffer::DEFAULT_MAX_BATCH_COUNT};

/// How long a scanner waits after a fetch that returned no records.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Where a shard is read from when no checkpoint exists for it yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitialPosition {
    /// The oldest record the service still retains.
    #[default]
    TrimHorizon,

    /// Only records written after the iterator is acquired.
    Latest,
}

/// Identity and tuning of a consumer.
///
/// Built once and shared read-only by the coordinator and every scanner it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    /// Name of the consuming application; part of every checkpoint key.
    pub app_name: String,

    /// Name of the stream being consumed.
    pub stream_name: String,

    /// Pause after a fetch that returned no records.
    pub poll_interval: Duration,

    /// Number of buffered records that triggers a flush to the handler.
    pub max_batch_count: NonZeroUsize,

    /// Upper bound of records requested per fetch, `None` leaves it to the service.
    pub fetch_limit: Option<NonZeroUsize>,

    /// Start position for shards without a checkpoint.
    pub initial_position: InitialPosition,

    /// Retry policy for transient fetch failures.
    pub retry: BackoffConfig,
}

impl ConsumerConfig {
    pub fn new(app_name: impl Into<String>, stream_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            stream_name: stream_name.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_batch_count: DEFAULT_MAX_BATCH_COUNT,
            fetch_limit: None,
            initial_position: InitialPosition::default(),
            retry: BackoffConfig::default(),
        }
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }

    pub fn with_max_batch_count(self, max_batch_count: NonZeroUsize) -> Self {
        Self {
            max_batch_count,
            ..self
        }
    }

    pub fn with_fetch_limit(self, fetch_limit: Option<NonZeroUsize>) -> Self {
        Self {
            fetch_limit,
            ..self
        }
    }

    pub fn with_initial_position(self, initial_position: InitialPosition) -> Self {
        Self {
            initial_position,
            ..self
        }
    }

    pub fn with_retry(self, retry: BackoffConfig) -> Self {
        Self { retry, ..self }
    }
}
