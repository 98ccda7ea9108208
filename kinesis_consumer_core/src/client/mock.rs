//! In-process [`StreamClient`] backed by shared, test-controlled state.

use std::{
    collections::{BTreeMap, VecDeque},
    num::NonZeroUsize,
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;

use super::{ClientError, ClientErrorKind, GetRecordsOutput, StartingPosition, StreamClient};
use crate::record::{Record, SequenceNumber, ShardId, ShardIterator};

/// Largest page handed out by a single fetch, mirroring the service limit.
const MAX_RECORDS_PER_FETCH: usize = 10_000;

#[derive(Debug, Default)]
struct MockShard {
    records: Vec<Record>,
    next_sequence_number: u64,
    closed: bool,
    stalled: bool,
    iterator_errors: VecDeque<ClientError>,
    fetch_errors: VecDeque<ClientError>,
    /// Errors keyed by the index of the fetch call they fail.
    scheduled_fetch_errors: BTreeMap<usize, ClientError>,
    fetch_calls: usize,
    fetched: Vec<ShardIterator>,
}

impl MockShard {
    fn position_of(&self, position: &StartingPosition) -> usize {
        match position {
            StartingPosition::TrimHorizon => 0,
            StartingPosition::Latest => self.records.len(),
            StartingPosition::AfterSequenceNumber(seq) => self
                .records
                .partition_point(|r| r.sequence_number() <= seq),
        }
    }
}

#[derive(Debug)]
struct MockStream {
    name: String,
    shards: BTreeMap<ShardId, MockShard>,
    describe_errors: VecDeque<ClientError>,
    iterator_requests: Vec<(ShardId, StartingPosition)>,
    /// Makes every issued token unique, so a token only repeats when deliberately replayed.
    issued: u64,
}

impl MockStream {
    fn issue(&mut self, shard_id: &ShardId, position: usize) -> ShardIterator {
        self.issued += 1;
        ShardIterator::new(format!("{shard_id}:{position}:{}", self.issued))
    }

    fn shard_mut(&mut self, shard_id: &ShardId) -> Result<&mut MockShard, ClientError> {
        self.shards.get_mut(shard_id).ok_or_else(|| {
            ClientError::new(
                ClientErrorKind::NotFound,
                "ResourceNotFoundException",
                format!("shard {shard_id} not found"),
            )
        })
    }
}

/// State shared between a test and the [`MockStreamClient`]s it hands out.
///
/// Models a single stream. Every shard assigns the sequence numbers 1, 2, 3, … to the records
/// pushed to it.
#[derive(Debug, Clone)]
pub struct MockStreamState {
    inner: Arc<Mutex<MockStream>>,
}

impl MockStreamState {
    /// Create a stream with `n_shards` empty shards named like the service names them.
    pub fn new(stream_name: impl Into<String>, n_shards: usize) -> Self {
        let shards = (0..n_shards)
            .map(|i| (ShardId::new(format!("shardId-{i:012}")), MockShard::default()))
            .collect();

        Self {
            inner: Arc::new(Mutex::new(MockStream {
                name: stream_name.into(),
                shards,
                describe_errors: Default::default(),
                iterator_requests: Default::default(),
                issued: 0,
            })),
        }
    }

    /// A client reading from this state.
    pub fn client(&self) -> MockStreamClient {
        MockStreamClient {
            state: self.clone(),
            max_records_per_fetch: MAX_RECORDS_PER_FETCH,
        }
    }

    pub fn shard_ids(&self) -> Vec<ShardId> {
        self.inner.lock().shards.keys().cloned().collect()
    }

    /// Append a record to `shard_id` and return its sequence number.
    ///
    /// # Panics
    /// - when the shard does not exist
    /// - when the shard is closed
    pub fn push_record(
        &self,
        shard_id: &ShardId,
        data: impl Into<Bytes>,
        partition_key: &str,
    ) -> SequenceNumber {
        let mut guard = self.inner.lock();
        let shard = guard.shards.get_mut(shard_id).expect("unknown shard");
        assert!(!shard.closed, "shard {shard_id} is closed");

        shard.next_sequence_number += 1;
        let seq = SequenceNumber::from(shard.next_sequence_number);
        shard.records.push(Record::new(
            data,
            seq.clone(),
            partition_key,
            Some(Utc::now()),
        ));
        seq
    }

    /// Append `n` records with generated payloads to `shard_id`.
    ///
    /// # Panics
    /// - when the shard does not exist
    /// - when the shard is closed
    pub fn push_records(&self, shard_id: &ShardId, n: usize) {
        for _ in 0..n {
            let next = self.inner.lock().shards[shard_id].next_sequence_number + 1;
            self.push_record(shard_id, format!("record-{next}"), "partitionKey-0");
        }
    }

    /// Fail the next shard listing with `error`.
    pub fn push_describe_error(&self, error: ClientError) {
        self.inner.lock().describe_errors.push_back(error);
    }

    /// Fail the next iterator acquisition on `shard_id` with `error`.
    ///
    /// # Panics
    /// - when the shard does not exist
    pub fn push_iterator_error(&self, shard_id: &ShardId, error: ClientError) {
        let mut guard = self.inner.lock();
        let shard = guard.shards.get_mut(shard_id).expect("unknown shard");
        shard.iterator_errors.push_back(error);
    }

    /// Fail the next fetch on `shard_id` with `error`. Queued errors are returned in order.
    ///
    /// # Panics
    /// - when the shard does not exist
    pub fn push_fetch_error(&self, shard_id: &ShardId, error: ClientError) {
        let mut guard = self.inner.lock();
        let shard = guard.shards.get_mut(shard_id).expect("unknown shard");
        shard.fetch_errors.push_back(error);
    }

    /// Fail the fetch call with index `call` (counting from zero, failed calls included) on
    /// `shard_id` with `error`.
    ///
    /// # Panics
    /// - when the shard does not exist
    pub fn fail_fetch_at(&self, shard_id: &ShardId, call: usize, error: ClientError) {
        let mut guard = self.inner.lock();
        let shard = guard.shards.get_mut(shard_id).expect("unknown shard");
        shard.scheduled_fetch_errors.insert(call, error);
    }

    /// Close `shard_id`: once its remaining records have been read, fetches return no next
    /// iterator.
    ///
    /// # Panics
    /// - when the shard does not exist
    pub fn close_shard(&self, shard_id: &ShardId) {
        let mut guard = self.inner.lock();
        guard.shards.get_mut(shard_id).expect("unknown shard").closed = true;
    }

    /// Make fetches on `shard_id` hand back the very token they were called with.
    ///
    /// # Panics
    /// - when the shard does not exist
    pub fn stall_shard(&self, shard_id: &ShardId) {
        let mut guard = self.inner.lock();
        guard.shards.get_mut(shard_id).expect("unknown shard").stalled = true;
    }

    /// Every iterator acquisition so far, in call order.
    pub fn iterator_requests(&self) -> Vec<(ShardId, StartingPosition)> {
        self.inner.lock().iterator_requests.clone()
    }

    /// Tokens successfully fetched from `shard_id`, in call order.
    ///
    /// # Panics
    /// - when the shard does not exist
    pub fn fetched_iterators(&self, shard_id: &ShardId) -> Vec<ShardIterator> {
        self.inner.lock().shards[shard_id].fetched.clone()
    }
}

/// [`StreamClient`] over a [`MockStreamState`].
#[derive(Debug, Clone)]
pub struct MockStreamClient {
    state: MockStreamState,
    max_records_per_fetch: usize,
}

impl MockStreamClient {
    /// Never return more than `n` records from one fetch, regardless of the requested limit.
    pub fn with_max_records_per_fetch(self, n: NonZeroUsize) -> Self {
        Self {
            max_records_per_fetch: n.get(),
            ..self
        }
    }
}

fn invalid_iterator(iterator: &ShardIterator) -> ClientError {
    ClientError::new(
        ClientErrorKind::InvalidArgument,
        "InvalidArgumentException",
        format!("invalid shard iterator {}", iterator.as_str()),
    )
}

/// Split a token issued by [`MockStream::issue`] into shard and position.
fn parse_iterator(iterator: &ShardIterator) -> Result<(ShardId, usize), ClientError> {
    let mut parts = iterator.as_str().rsplitn(3, ':');
    let (Some(_nonce), Some(position), Some(shard)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid_iterator(iterator));
    };
    let position = position.parse().map_err(|_| invalid_iterator(iterator))?;
    Ok((ShardId::new(shard), position))
}

#[async_trait]
impl StreamClient for MockStreamClient {
    async fn describe_stream(&self, stream_name: &str) -> Result<Vec<ShardId>, ClientError> {
        let mut guard = self.state.inner.lock();
        if let Some(e) = guard.describe_errors.pop_front() {
            return Err(e);
        }
        if guard.name != stream_name {
            return Err(ClientError::new(
                ClientErrorKind::NotFound,
                "ResourceNotFoundException",
                format!("stream {stream_name} not found"),
            ));
        }
        Ok(guard.shards.keys().cloned().collect())
    }

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &ShardId,
        position: &StartingPosition,
    ) -> Result<ShardIterator, ClientError> {
        let mut guard = self.state.inner.lock();
        if guard.name != stream_name {
            return Err(ClientError::new(
                ClientErrorKind::NotFound,
                "ResourceNotFoundException",
                format!("stream {stream_name} not found"),
            ));
        }
        guard
            .iterator_requests
            .push((shard_id.clone(), position.clone()));

        let shard = guard.shard_mut(shard_id)?;
        if let Some(e) = shard.iterator_errors.pop_front() {
            return Err(e);
        }
        let offset = shard.position_of(position);
        Ok(guard.issue(shard_id, offset))
    }

    async fn get_records(
        &self,
        iterator: &ShardIterator,
        limit: Option<NonZeroUsize>,
    ) -> Result<GetRecordsOutput, ClientError> {
        let (shard_id, position) = parse_iterator(iterator)?;
        let mut guard = self.state.inner.lock();

        let shard = guard.shard_mut(&shard_id)?;
        let call = shard.fetch_calls;
        shard.fetch_calls += 1;
        if let Some(e) = shard.scheduled_fetch_errors.remove(&call) {
            return Err(e);
        }
        if let Some(e) = shard.fetch_errors.pop_front() {
            return Err(e);
        }
        shard.fetched.push(iterator.clone());

        let take = limit
            .map_or(MAX_RECORDS_PER_FETCH, NonZeroUsize::get)
            .min(self.max_records_per_fetch);
        let start = position.min(shard.records.len());
        let end = (start + take).min(shard.records.len());
        let records = shard.records[start..end].to_vec();
        let behind = (shard.records.len() - end) as u64;

        let next_iterator = if shard.stalled {
            Some(iterator.clone())
        } else if shard.closed && end == shard.records.len() {
            None
        } else {
            Some(guard.issue(&shard_id, end))
        };

        Ok(GetRecordsOutput {
            records,
            next_iterator,
            // one second per unread record is as good a lag model as any
            millis_behind_latest: Some(behind * 1000),
        })
    }
}
