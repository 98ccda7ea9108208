//! [`StreamClient`] for AWS Kinesis Data Streams.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use aws_sdk_kinesis::{
    Client,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::Blob,
    types::{PutRecordsRequestEntry, ShardIteratorType},
};
use bytes::Bytes;
use chrono::DateTime;
use tracing::debug;

use super::{ClientError, ClientErrorKind, GetRecordsOutput, StartingPosition, StreamClient};
use crate::record::{Record, SequenceNumber, ShardId, ShardIterator};

/// Most records one `GetRecords` call may return.
const MAX_GET_RECORDS_LIMIT: usize = 10_000;

/// Most entries one `PutRecords` call may carry.
pub const MAX_PUT_RECORDS_BATCH: usize = 500;

/// A record that `PutRecords` did not accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecordFailure {
    /// Position of the entry in the submitted batch.
    pub index: usize,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct KinesisStreamClient {
    client: Client,
}

impl KinesisStreamClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Publish `entries` as `(partition key, payload)` pairs in a single call, returning the
    /// entries that were rejected.
    ///
    /// At most [`MAX_PUT_RECORDS_BATCH`] entries may be sent at once.
    pub async fn put_records(
        &self,
        stream_name: &str,
        entries: Vec<(String, Bytes)>,
    ) -> Result<Vec<PutRecordFailure>, ClientError> {
        let entries = entries
            .into_iter()
            .map(|(partition_key, data)| {
                PutRecordsRequestEntry::builder()
                    .partition_key(partition_key)
                    .data(Blob::new(data.to_vec()))
                    .build()
                    .map_err(|e| {
                        ClientError::new(
                            ClientErrorKind::InvalidArgument,
                            "InvalidArgumentException",
                            e.to_string(),
                        )
                        .with_source(e)
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let n_entries = entries.len();

        let output = self
            .client
            .put_records()
            .stream_name(stream_name)
            .set_records(Some(entries))
            .send()
            .await
            .map_err(map_sdk_error)?;

        let failures: Vec<_> = output
            .records()
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                entry.error_code().map(|code| PutRecordFailure {
                    index,
                    code: code.to_string(),
                    message: entry.error_message().unwrap_or_default().to_string(),
                })
            })
            .collect();

        debug!(
            stream = stream_name,
            n_entries,
            n_failed = failures.len(),
            "put records"
        );
        Ok(failures)
    }
}

#[async_trait]
impl StreamClient for KinesisStreamClient {
    async fn describe_stream(&self, stream_name: &str) -> Result<Vec<ShardId>, ClientError> {
        let mut shards = vec![];
        let mut next_token: Option<String> = None;

        loop {
            // the stream name and a continuation token are mutually exclusive
            let request = match next_token.take() {
                Some(token) => self.client.list_shards().next_token(token),
                None => self.client.list_shards().stream_name(stream_name),
            };
            let output = request.send().await.map_err(map_sdk_error)?;

            shards.extend(output.shards().iter().map(|s| ShardId::new(s.shard_id())));

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(shards)
    }

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &ShardId,
        position: &StartingPosition,
    ) -> Result<ShardIterator, ClientError> {
        let request = self
            .client
            .get_shard_iterator()
            .stream_name(stream_name)
            .shard_id(shard_id.as_str());

        let request = match position {
            StartingPosition::TrimHorizon => {
                request.shard_iterator_type(ShardIteratorType::TrimHorizon)
            }
            StartingPosition::Latest => request.shard_iterator_type(ShardIteratorType::Latest),
            StartingPosition::AfterSequenceNumber(seq) => request
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(seq.as_str()),
        };

        let output = request.send().await.map_err(map_sdk_error)?;
        output
            .shard_iterator()
            .map(ShardIterator::new)
            .ok_or_else(|| {
                ClientError::new(
                    ClientErrorKind::Unknown,
                    "MissingShardIterator",
                    format!("no iterator returned for shard {shard_id}"),
                )
            })
    }

    async fn get_records(
        &self,
        iterator: &ShardIterator,
        limit: Option<NonZeroUsize>,
    ) -> Result<GetRecordsOutput, ClientError> {
        let limit = limit.map(|l| l.get().min(MAX_GET_RECORDS_LIMIT) as i32);

        let output = self
            .client
            .get_records()
            .shard_iterator(iterator.as_str())
            .set_limit(limit)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let records = output
            .records()
            .iter()
            .map(|r| {
                let sequence_number: SequenceNumber =
                    r.sequence_number().parse().map_err(|e| {
                        ClientError::new(
                            ClientErrorKind::Unknown,
                            "InvalidSequenceNumber",
                            format!("service returned sequence number {:?}", r.sequence_number()),
                        )
                        .with_source(e)
                    })?;
                let arrival = r
                    .approximate_arrival_timestamp()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()));

                Ok(Record::new(
                    Bytes::copy_from_slice(r.data().as_ref()),
                    sequence_number,
                    r.partition_key(),
                    arrival,
                ))
            })
            .collect::<Result<Vec<_>, ClientError>>()?;

        Ok(GetRecordsOutput {
            records,
            next_iterator: output.next_shard_iterator().map(ShardIterator::new),
            millis_behind_latest: output
                .millis_behind_latest()
                .and_then(|m| u64::try_from(m).ok()),
        })
    }
}

fn map_sdk_error<E, R>(err: SdkError<E, R>) -> ClientError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ClientErrorKind::Unavailable
        }
        _ => err.code().map_or(ClientErrorKind::Unknown, kind_for_code),
    };
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());

    ClientError::new(kind, code, message).with_source(err)
}

fn kind_for_code(code: &str) -> ClientErrorKind {
    match code {
        "ProvisionedThroughputExceededException"
        | "LimitExceededException"
        | "ThrottlingException"
        | "KMSThrottlingException" => ClientErrorKind::Throttled,
        "InternalFailure"
        | "InternalFailureException"
        | "ServiceUnavailable"
        | "ServiceUnavailableException"
        | "KMSUnavailableException" => ClientErrorKind::Unavailable,
        "ExpiredIteratorException" => ClientErrorKind::ExpiredIterator,
        "ResourceNotFoundException" => ClientErrorKind::NotFound,
        "AccessDeniedException"
        | "KMSAccessDeniedException"
        | "UnrecognizedClientException"
        | "ExpiredTokenException" => ClientErrorKind::AccessDenied,
        "InvalidArgumentException" | "ValidationException" | "ResourceInUseException" => {
            ClientErrorKind::InvalidArgument
        }
        _ => ClientErrorKind::Unknown,
    }
}
