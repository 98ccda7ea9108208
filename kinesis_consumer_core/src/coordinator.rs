//! Discovers the shards of a stream and runs one [`ShardScanner`] per shard.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use thiserror::Error;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    checkpoint::CheckpointStore,
    client::{ClientError, StreamClient},
    config::ConsumerConfig,
    handler::RecordHandler,
    record::ShardId,
    scanner::{ScannerError, ShardScanner, ShardSummary},
};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to list shards of stream {stream}: {source}")]
    Discovery { stream: String, source: ClientError },
}

/// Why a shard did not finish cleanly.
#[derive(Debug, Error)]
pub enum ShardFailure {
    #[error(transparent)]
    Scanner(#[from] ScannerError),

    #[error("shard scanner panicked: {0}")]
    Panicked(String),

    #[error("shard scanner was aborted")]
    Aborted,
}

impl From<JoinError> for ShardFailure {
    fn from(e: JoinError) -> Self {
        if !e.is_panic() {
            return Self::Aborted;
        }

        let payload = e.into_panic();
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        Self::Panicked(msg)
    }
}

/// Outcome of every shard of one consumer run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub results: BTreeMap<ShardId, Result<ShardSummary, ShardFailure>>,
}

impl RunReport {
    pub fn summaries(&self) -> impl Iterator<Item = &ShardSummary> {
        self.results.values().filter_map(|r| r.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ShardId, &ShardFailure)> {
        self.results
            .iter()
            .filter_map(|(shard, r)| r.as_ref().err().map(|e| (shard, e)))
    }

    /// True if no shard failed.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Starts the scanners of one stream.
#[derive(Debug)]
pub struct StreamCoordinator {
    client: Arc<dyn StreamClient>,
    store: Arc<dyn CheckpointStore>,
    config: Arc<ConsumerConfig>,
}

impl StreamCoordinator {
    pub fn new(
        client: Arc<dyn StreamClient>,
        store: Arc<dyn CheckpointStore>,
        config: Arc<ConsumerConfig>,
    ) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// List the shards of the stream and spawn a scanner task for each of them.
    ///
    /// Shards are listed once; shards created later are not picked up. Nothing is spawned if the
    /// listing fails. Cancelling `shutdown` stops every scanner of the returned handle.
    pub async fn start(
        &self,
        handler: Arc<dyn RecordHandler>,
        shutdown: CancellationToken,
    ) -> Result<ConsumerHandle, CoordinatorError> {
        let stream = &self.config.stream_name;
        let shards = self.client.describe_stream(stream).await.map_err(|source| {
            error!(error=%source, %stream, "failed to list shards");
            CoordinatorError::Discovery {
                stream: stream.clone(),
                source,
            }
        })?;

        if shards.is_empty() {
            warn!(%stream, "stream has no shards");
        } else {
            info!(%stream, n_shards = shards.len(), "starting shard scanners");
        }

        let shutdown = shutdown.child_token();
        let mut tasks = JoinSet::new();
        let mut task_shards = HashMap::with_capacity(shards.len());

        for shard_id in &shards {
            let scanner = ShardScanner::new(
                shard_id.clone(),
                Arc::clone(&self.client),
                Arc::clone(&self.store),
                Arc::clone(&handler),
                Arc::clone(&self.config),
            );
            let handle = tasks.spawn(scanner.run(shutdown.clone()));
            task_shards.insert(handle.id(), shard_id.clone());
        }

        Ok(ConsumerHandle {
            stream: stream.clone(),
            shards,
            tasks,
            task_shards,
            shutdown,
        })
    }

    /// [`start`](Self::start) and wait for every scanner to stop.
    pub async fn run(
        &self,
        handler: Arc<dyn RecordHandler>,
        shutdown: CancellationToken,
    ) -> Result<RunReport, CoordinatorError> {
        Ok(self.start(handler, shutdown).await?.join().await)
    }
}

/// The running scanners of one stream.
///
/// Dropping the handle aborts any scanner still running.
#[derive(Debug)]
pub struct ConsumerHandle {
    stream: String,
    shards: Vec<ShardId>,
    tasks: JoinSet<Result<ShardSummary, ScannerError>>,
    task_shards: HashMap<Id, ShardId>,
    shutdown: CancellationToken,
}

impl ConsumerHandle {
    /// The shards being consumed.
    pub fn shards(&self) -> &[ShardId] {
        &self.shards
    }

    /// Ask every scanner to flush and stop. Use [`join`](Self::join) to wait for them.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for every scanner to stop.
    ///
    /// A failing shard never stops the others; each result is logged as it arrives.
    pub async fn join(mut self) -> RunReport {
        let mut report = RunReport::default();

        while let Some(res) = self.tasks.join_next_with_id().await {
            let (id, result) = match res {
                Ok((id, result)) => (id, result.map_err(ShardFailure::from)),
                Err(e) => (e.id(), Err(ShardFailure::from(e))),
            };
            let Some(shard_id) = self.task_shards.remove(&id) else {
                continue;
            };

            match &result {
                Ok(summary) => info!(
                    stream=%self.stream,
                    %shard_id,
                    reason=?summary.reason,
                    records_delivered=summary.records_delivered,
                    checkpoint_failures=summary.checkpoint_failures,
                    "shard finished"
                ),
                Err(e) => error!(
                    error=%e,
                    stream=%self.stream,
                    %shard_id,
                    "shard failed"
                ),
            }
            report.results.insert(shard_id, result);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroUsize, time::Duration};

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::{
        checkpoint::MemoryCheckpointStore,
        client::{ClientErrorKind, mock::MockStreamState},
        handler::{HandlerAction, HandlerError, mock::MockRecordHandler},
        record::Record,
        scanner::ExitReason,
    };

    fn coordinator(state: &MockStreamState) -> StreamCoordinator {
        let config = ConsumerConfig::new("app", "stream")
            .with_max_batch_count(NonZeroUsize::new(5).unwrap())
            .with_poll_interval(Duration::from_millis(100));
        StreamCoordinator::new(
            Arc::new(state.client()),
            Arc::new(MemoryCheckpointStore::default()),
            Arc::new(config),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_failure_starts_nothing() {
        let state = MockStreamState::new("stream", 2);
        state.push_describe_error(ClientError::new(
            ClientErrorKind::AccessDenied,
            "AccessDeniedException",
            "no",
        ));
        let handler = Arc::new(MockRecordHandler::default());

        let err = coordinator(&state)
            .start(Arc::clone(&handler) as _, CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(err, CoordinatorError::Discovery { stream, .. } if stream == "stream");
        assert!(state.iterator_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn every_shard_gets_a_scanner() {
        let state = MockStreamState::new("stream", 3);
        for shard in state.shard_ids() {
            state.push_records(&shard, 7);
            state.close_shard(&shard);
        }
        let handler = Arc::new(MockRecordHandler::default());

        let report = coordinator(&state)
            .run(Arc::clone(&handler) as _, CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.results.len(), 3);
        for summary in report.summaries() {
            assert_eq!(summary.reason, ExitReason::ShardClosed);
            assert_eq!(summary.records_delivered, 7);
        }
        assert_eq!(handler.total_records(), 21);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_stream() {
        let state = MockStreamState::new("stream", 0);
        let report = coordinator(&state)
            .run(
                Arc::new(MockRecordHandler::default()),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(report.results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_all_shards() {
        let state = MockStreamState::new("stream", 2);
        let handler = Arc::new(MockRecordHandler::default());

        let handle = coordinator(&state)
            .start(Arc::clone(&handler) as _, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(handle.shards().len(), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.shutdown();

        let report = handle.join().await;
        assert_eq!(report.summaries().count(), 2);
        assert!(
            report
                .summaries()
                .all(|s| s.reason == ExitReason::Cancelled)
        );
    }

    #[derive(Debug)]
    struct PanicOn(ShardId);

    #[async_trait]
    impl RecordHandler for PanicOn {
        async fn handle_records(
            &self,
            shard_id: &ShardId,
            _records: &[Record],
        ) -> Result<HandlerAction, HandlerError> {
            if shard_id == &self.0 {
                panic!("handler exploded");
            }
            Ok(HandlerAction::Continue)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panics_are_isolated() {
        let state = MockStreamState::new("stream", 2);
        let shards = state.shard_ids();
        for shard in &shards {
            state.push_records(shard, 3);
            state.close_shard(shard);
        }

        let report = coordinator(&state)
            .run(
                Arc::new(PanicOn(shards[0].clone())),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_matches!(
            &report.results[&shards[0]],
            Err(ShardFailure::Panicked(msg)) if msg == "handler exploded"
        );
        assert_matches!(
            &report.results[&shards[1]],
            Ok(summary) if summary.records_delivered == 3
        );
        assert!(!report.is_success());
    }
}
