//! The per-shard consumption loop.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    backoff::Backoff,
    buffer::Buffer,
    checkpoint::{CheckpointError, CheckpointKey, CheckpointStore},
    client::{ClientError, ClientErrorKind, GetRecordsOutput, StartingPosition, StreamClient},
    config::{ConsumerConfig, InitialPosition},
    handler::{HandlerAction, HandlerError, RecordHandler},
    record::{SequenceNumber, ShardId, ShardIterator},
};

/// Why a scanner stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The service reported that the shard is closed and fully read.
    ShardClosed,

    /// The consumer was asked to shut down.
    Cancelled,

    /// The handler returned [`HandlerAction::Stop`].
    HandlerStopped,
}

/// What a scanner did before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSummary {
    pub shard_id: ShardId,
    pub reason: ExitReason,

    /// Records handed to the handler successfully.
    pub records_delivered: u64,
    pub batches_delivered: u64,

    pub checkpoints_committed: u64,

    /// Checkpoint writes that failed after their batch was handled.
    pub checkpoint_failures: u64,

    /// Last checkpoint committed by this run.
    pub last_checkpoint: Option<SequenceNumber>,
}

/// Conditions that stop a scanner. None of them affect other shards.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("failed to read checkpoint: {0}")]
    ReadCheckpoint(#[source] CheckpointError),

    #[error("failed to acquire shard iterator at {position:?}: {source}")]
    AcquireIterator {
        position: StartingPosition,
        source: ClientError,
    },

    #[error("failed to fetch records: {0}")]
    GetRecords(#[source] ClientError),

    #[error("giving up after {attempts} retries: {source}")]
    RetriesExhausted { attempts: u32, source: ClientError },

    #[error("shard iterator did not advance")]
    IteratorNotAdvanced,

    #[error("record handler failed: {0}")]
    Handler(#[source] HandlerError),
}

#[derive(Debug, Default)]
struct Progress {
    records_delivered: u64,
    batches_delivered: u64,
    checkpoints_committed: u64,
    checkpoint_failures: u64,
    last_checkpoint: Option<SequenceNumber>,
}

/// Reads one shard from its checkpoint onwards, handing batches to a [`RecordHandler`] and
/// checkpointing each batch once it has been handled.
///
/// A scanner owns its buffer, iterator and checkpoint key; nothing is shared with the scanners
/// of other shards except the (stateless) client, store and handler.
#[derive(Debug)]
pub struct ShardScanner {
    shard_id: ShardId,
    client: Arc<dyn StreamClient>,
    store: Arc<dyn CheckpointStore>,
    handler: Arc<dyn RecordHandler>,
    config: Arc<ConsumerConfig>,

    key: CheckpointKey,
    buffer: Buffer,

    /// The last record fed into the buffer, flushed or not.
    last_fed: Option<SequenceNumber>,
    progress: Progress,
}

impl ShardScanner {
    pub fn new(
        shard_id: ShardId,
        client: Arc<dyn StreamClient>,
        store: Arc<dyn CheckpointStore>,
        handler: Arc<dyn RecordHandler>,
        config: Arc<ConsumerConfig>,
    ) -> Self {
        let key = CheckpointKey::new(&config.app_name, &config.stream_name, shard_id.clone());
        let buffer = Buffer::new(config.max_batch_count);

        Self {
            shard_id,
            client,
            store,
            handler,
            config,
            key,
            buffer,
            last_fed: None,
            progress: Default::default(),
        }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Consume the shard until it is closed, the handler asks to stop, `shutdown` is cancelled,
    /// or a fatal error occurs.
    ///
    /// On a clean exit the records still buffered are flushed first. On an error they are not:
    /// they have not been checkpointed and will be read again on the next run.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<ShardSummary, ScannerError> {
        let start = self.starting_position().await?;
        let Some(mut iterator) = self.acquire(&start, &shutdown).await? else {
            return self.exit(ExitReason::Cancelled).await;
        };

        let mut retry: Option<Backoff> = None;

        loop {
            if shutdown.is_cancelled() {
                return self.exit(ExitReason::Cancelled).await;
            }

            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                res = self.client.get_records(&iterator, self.config.fetch_limit) => Some(res),
            };
            let Some(fetched) = fetched else {
                return self.exit(ExitReason::Cancelled).await;
            };

            let GetRecordsOutput {
                records,
                next_iterator,
                millis_behind_latest,
            } = match fetched {
                Ok(output) => {
                    retry = None;
                    output
                }
                Err(e) if e.is_transient() || e.kind() == ClientErrorKind::ExpiredIterator => {
                    let backoff = retry.get_or_insert_with(|| Backoff::new(&self.config.retry));
                    let Some(delay) = backoff.next_backoff() else {
                        error!(
                            error=%e,
                            stream=%self.config.stream_name,
                            shard_id=%self.shard_id,
                            attempts=backoff.attempts(),
                            "giving up on shard after repeated fetch failures"
                        );
                        return Err(ScannerError::RetriesExhausted {
                            attempts: backoff.attempts(),
                            source: e,
                        });
                    };

                    if e.kind() == ClientErrorKind::ExpiredIterator {
                        let position = self.resume_position(&start);
                        warn!(
                            error=%e,
                            stream=%self.config.stream_name,
                            shard_id=%self.shard_id,
                            ?position,
                            "shard iterator expired, re-acquiring"
                        );
                        iterator = match self.acquire(&position, &shutdown).await? {
                            Some(it) => it,
                            None => return self.exit(ExitReason::Cancelled).await,
                        };
                    } else {
                        warn!(
                            error=%e,
                            stream=%self.config.stream_name,
                            shard_id=%self.shard_id,
                            ?delay,
                            "transient error fetching records, backing off"
                        );
                        if !sleep(delay, &shutdown).await {
                            return self.exit(ExitReason::Cancelled).await;
                        }
                    }
                    continue;
                }
                Err(e) => {
                    error!(
                        error=%e,
                        stream=%self.config.stream_name,
                        shard_id=%self.shard_id,
                        "failed to fetch records"
                    );
                    return Err(ScannerError::GetRecords(e));
                }
            };

            let n_records = records.len();
            debug!(
                stream=%self.config.stream_name,
                shard_id=%self.shard_id,
                n_records,
                ?millis_behind_latest,
                "fetched records"
            );

            for record in records {
                self.last_fed = Some(record.sequence_number().clone());
                self.buffer.add(record);
                if self.buffer.should_flush() && self.flush().await? == HandlerAction::Stop {
                    return Ok(self.summary(ExitReason::HandlerStopped));
                }
            }

            let Some(next_iterator) = next_iterator else {
                info!(
                    stream=%self.config.stream_name,
                    shard_id=%self.shard_id,
                    "shard closed"
                );
                return self.exit(ExitReason::ShardClosed).await;
            };

            if next_iterator == iterator {
                error!(
                    stream=%self.config.stream_name,
                    shard_id=%self.shard_id,
                    iterator=?iterator,
                    "service returned the same shard iterator twice"
                );
                return Err(ScannerError::IteratorNotAdvanced);
            }
            iterator = next_iterator;

            if n_records == 0 {
                // nothing more to read right now, so deliver the partial batch before waiting
                if self.flush().await? == HandlerAction::Stop {
                    return Ok(self.summary(ExitReason::HandlerStopped));
                }
                if !sleep(self.config.poll_interval, &shutdown).await {
                    return self.exit(ExitReason::Cancelled).await;
                }
            }
        }
    }

    /// Resume after the checkpoint, or start at the configured initial position.
    async fn starting_position(&self) -> Result<StartingPosition, ScannerError> {
        let checkpoint = self.store.get(&self.key).await.map_err(|e| {
            error!(
                error=%e,
                stream=%self.config.stream_name,
                shard_id=%self.shard_id,
                "failed to read checkpoint"
            );
            ScannerError::ReadCheckpoint(e)
        })?;

        let position = match checkpoint {
            Some(sequence_number) => StartingPosition::AfterSequenceNumber(sequence_number),
            None => match self.config.initial_position {
                InitialPosition::TrimHorizon => StartingPosition::TrimHorizon,
                InitialPosition::Latest => StartingPosition::Latest,
            },
        };
        info!(
            stream=%self.config.stream_name,
            shard_id=%self.shard_id,
            ?position,
            "starting shard scanner"
        );
        Ok(position)
    }

    /// Where to pick up again after losing the iterator.
    fn resume_position(&self, start: &StartingPosition) -> StartingPosition {
        match &self.last_fed {
            Some(sequence_number) => StartingPosition::AfterSequenceNumber(sequence_number.clone()),
            None => start.clone(),
        }
    }

    /// Returns `None` if cancelled first.
    async fn acquire(
        &self,
        position: &StartingPosition,
        shutdown: &CancellationToken,
    ) -> Result<Option<ShardIterator>, ScannerError> {
        let res = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(None),
            res = self
                .client
                .get_shard_iterator(&self.config.stream_name, &self.shard_id, position) => res,
        };

        match res {
            Ok(iterator) => Ok(Some(iterator)),
            Err(e) => {
                error!(
                    error=%e,
                    stream=%self.config.stream_name,
                    shard_id=%self.shard_id,
                    ?position,
                    "failed to acquire shard iterator"
                );
                Err(ScannerError::AcquireIterator {
                    position: position.clone(),
                    source: e,
                })
            }
        }
    }

    /// Hand the buffered records to the handler, then checkpoint them and reset the buffer.
    ///
    /// An empty buffer is left alone.
    async fn flush(&mut self) -> Result<HandlerAction, ScannerError> {
        let Some(last) = self.buffer.last_sequence_number().cloned() else {
            return Ok(HandlerAction::Continue);
        };
        let n_records = self.buffer.len();

        let action = self
            .handler
            .handle_records(&self.shard_id, self.buffer.records())
            .await
            .map_err(|e| {
                error!(
                    error=%e,
                    stream=%self.config.stream_name,
                    shard_id=%self.shard_id,
                    n_records,
                    "record handler failed, batch not checkpointed"
                );
                ScannerError::Handler(e)
            })?;

        self.progress.records_delivered += n_records as u64;
        self.progress.batches_delivered += 1;

        match self.store.set(&self.key, last.clone()).await {
            Ok(()) => {
                debug!(
                    stream=%self.config.stream_name,
                    shard_id=%self.shard_id,
                    sequence_number=%last,
                    n_records,
                    "checkpoint committed"
                );
                self.progress.checkpoints_committed += 1;
                self.progress.last_checkpoint = Some(last);
            }
            Err(e) => {
                // the next successful flush carries the checkpoint past this batch
                warn!(
                    error=%e,
                    stream=%self.config.stream_name,
                    shard_id=%self.shard_id,
                    sequence_number=%last,
                    "failed to commit checkpoint"
                );
                self.progress.checkpoint_failures += 1;
            }
        }

        self.buffer.flush();
        Ok(action)
    }

    /// Flush what is left and stop.
    async fn exit(mut self, reason: ExitReason) -> Result<ShardSummary, ScannerError> {
        self.flush().await?;
        info!(
            stream=%self.config.stream_name,
            shard_id=%self.shard_id,
            ?reason,
            records_delivered=self.progress.records_delivered,
            "shard scanner stopped"
        );
        Ok(self.summary(reason))
    }

    fn summary(self, reason: ExitReason) -> ShardSummary {
        let Progress {
            records_delivered,
            batches_delivered,
            checkpoints_committed,
            checkpoint_failures,
            last_checkpoint,
        } = self.progress;

        ShardSummary {
            shard_id: self.shard_id,
            reason,
            records_delivered,
            batches_delivered,
            checkpoints_committed,
            checkpoint_failures,
            last_checkpoint,
        }
    }
}

/// Returns false if `shutdown` fired first.
async fn sleep(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.cancelled() => false,
    }
}
