//! The remote stream service, as seen by the consumer.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{Record, SequenceNumber, ShardId, ShardIterator};

#[cfg(feature = "kinesis")]
pub mod kinesis;
pub mod mock;

/// Where a new [`ShardIterator`] should point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartingPosition {
    /// The oldest record still retained by the service.
    TrimHorizon,

    /// Just after the most recent record.
    Latest,

    /// Immediately after the record with the given sequence number.
    AfterSequenceNumber(SequenceNumber),
}

/// One page of records read from a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRecordsOutput {
    /// Records in sequence number order.
    pub records: Vec<Record>,

    /// Cursor for the next read. `None` is the service telling us the shard has been closed and
    /// every record in it has been returned.
    pub next_iterator: Option<ShardIterator>,

    /// How far the returned page lags behind the tip of the shard, if reported.
    pub millis_behind_latest: Option<u64>,
}

/// Classification of remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Request rate or throughput limits exceeded.
    Throttled,

    /// The service could not be reached or failed internally.
    Unavailable,

    /// The iterator used for a read is too old to be used again.
    ExpiredIterator,

    /// The stream or shard does not exist.
    NotFound,

    /// Credentials are missing or lack permission.
    AccessDenied,

    /// The request was malformed, including unknown iterator tokens.
    InvalidArgument,

    /// Anything else.
    Unknown,
}

impl ClientErrorKind {
    /// Whether the same request may succeed if simply tried again later.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Throttled | Self::Unavailable)
    }
}

/// A failed call to the remote service: a code/message pair plus its classification.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ClientError {
    kind: ClientErrorKind,
    code: String,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            source: Some(source.into()),
            ..self
        }
    }

    pub fn kind(&self) -> ClientErrorKind {
        self.kind
    }

    /// Service error code, e.g. `ProvisionedThroughputExceededException`.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Read access to a partitioned stream.
///
/// Calls are stateless, so one client is shared by every scanner of a consumer.
#[async_trait]
pub trait StreamClient: std::fmt::Debug + Send + Sync {
    /// List the shards of `stream_name`.
    async fn describe_stream(&self, stream_name: &str) -> Result<Vec<ShardId>, ClientError>;

    /// Obtain a cursor into `shard_id` at `position`.
    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &ShardId,
        position: &StartingPosition,
    ) -> Result<ShardIterator, ClientError>;

    /// Read the page of records at `iterator`, at most `limit` of them if given.
    async fn get_records(
        &self,
        iterator: &ShardIterator,
        limit: Option<NonZeroUsize>,
    ) -> Result<GetRecordsOutput, ClientError>;
}
