//! End-to-end behaviour of a consumer against the mock stream service.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use assert_matches::assert_matches;
use async_trait::async_trait;
use kinesis_consumer_core::{
    CheckpointError, CheckpointKey, CheckpointStore, ClientError, ConsumerConfig, ExitReason,
    GetRecordsOutput, HandlerAction, HandlerError, MemoryCheckpointStore,
    ObjectStoreCheckpointStore, Record, RecordHandler, ScannerError, SequenceNumber,
    ShardFailure, ShardId, ShardIterator, StartingPosition, StreamClient, StreamCoordinator,
    client::mock::{MockStreamClient, MockStreamState},
    handler::mock::MockRecordHandler,
};
use object_store::local::LocalFileSystem;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const APP: &str = "app";
const STREAM: &str = "stream";

fn config(max_batch_count: usize) -> ConsumerConfig {
    ConsumerConfig::new(APP, STREAM)
        .with_max_batch_count(NonZeroUsize::new(max_batch_count).unwrap())
        .with_poll_interval(Duration::from_secs(1))
}

fn key(shard: &ShardId) -> CheckpointKey {
    CheckpointKey::new(APP, STREAM, shard.clone())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Handled { len: usize, last: SequenceNumber },
    Checkpointed(SequenceNumber),
}

/// Handler and checkpoint store that log into one shared timeline.
#[derive(Debug, Default)]
struct Timeline {
    events: Mutex<Vec<Event>>,
    store: MemoryCheckpointStore,
}

#[async_trait]
impl RecordHandler for Timeline {
    async fn handle_records(
        &self,
        _shard_id: &ShardId,
        records: &[Record],
    ) -> Result<HandlerAction, HandlerError> {
        let last = records.last().unwrap().sequence_number().clone();
        self.events.lock().push(Event::Handled {
            len: records.len(),
            last,
        });
        Ok(HandlerAction::Continue)
    }
}

#[async_trait]
impl CheckpointStore for Timeline {
    async fn get(&self, key: &CheckpointKey) -> Result<Option<SequenceNumber>, CheckpointError> {
        self.store.get(key).await
    }

    async fn set(
        &self,
        key: &CheckpointKey,
        sequence_number: SequenceNumber,
    ) -> Result<(), CheckpointError> {
        self.events
            .lock()
            .push(Event::Checkpointed(sequence_number.clone()));
        self.store.set(key, sequence_number).await
    }
}

/// A fetch as seen from outside the client.
#[derive(Debug, Clone)]
struct Fetch {
    at: Instant,
    iterator: ShardIterator,
    n_records: usize,
    next_iterator: Option<ShardIterator>,
}

#[derive(Debug)]
struct RecordingClient {
    inner: MockStreamClient,
    fetches: Mutex<Vec<Fetch>>,
}

#[async_trait]
impl StreamClient for RecordingClient {
    async fn describe_stream(&self, stream_name: &str) -> Result<Vec<ShardId>, ClientError> {
        self.inner.describe_stream(stream_name).await
    }

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &ShardId,
        position: &StartingPosition,
    ) -> Result<ShardIterator, ClientError> {
        self.inner
            .get_shard_iterator(stream_name, shard_id, position)
            .await
    }

    async fn get_records(
        &self,
        iterator: &ShardIterator,
        limit: Option<NonZeroUsize>,
    ) -> Result<GetRecordsOutput, ClientError> {
        let output = self.inner.get_records(iterator, limit).await?;
        self.fetches.lock().push(Fetch {
            at: Instant::now(),
            iterator: iterator.clone(),
            n_records: output.records.len(),
            next_iterator: output.next_iterator.clone(),
        });
        Ok(output)
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn batches_and_checkpoints_follow_threshold() {
    let state = MockStreamState::new(STREAM, 1);
    let shard = state.shard_ids().remove(0);
    state.push_records(&shard, 2500);

    let timeline = Arc::new(Timeline::default());
    let coordinator = StreamCoordinator::new(
        Arc::new(state.client()),
        Arc::clone(&timeline) as _,
        Arc::new(config(1000)),
    );

    let shutdown = CancellationToken::new();
    let handle = coordinator
        .start(Arc::clone(&timeline) as _, shutdown.clone())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    shutdown.cancel();
    let report = handle.join().await;

    let seq = |n: u64| SequenceNumber::from(n);
    assert_eq!(
        *timeline.events.lock(),
        vec![
            Event::Handled {
                len: 1000,
                last: seq(1000)
            },
            Event::Checkpointed(seq(1000)),
            Event::Handled {
                len: 1000,
                last: seq(2000)
            },
            Event::Checkpointed(seq(2000)),
            Event::Handled {
                len: 500,
                last: seq(2500)
            },
            Event::Checkpointed(seq(2500)),
        ]
    );

    let summary = report.results[&shard].as_ref().unwrap();
    assert_eq!(summary.reason, ExitReason::Cancelled);
    assert_eq!(summary.batches_delivered, 3);
    assert_eq!(summary.last_checkpoint, Some(seq(2500)));
}

#[tokio::test(start_paused = true)]
async fn empty_fetch_sleeps_then_reuses_returned_iterator() {
    let state = MockStreamState::new(STREAM, 1);
    let client = Arc::new(RecordingClient {
        inner: state.client(),
        fetches: Default::default(),
    });
    let config = config(10);
    let poll_interval = config.poll_interval;

    let coordinator = StreamCoordinator::new(
        Arc::clone(&client) as _,
        Arc::new(MemoryCheckpointStore::default()),
        Arc::new(config),
    );
    let shutdown = CancellationToken::new();
    let handle = coordinator
        .start(Arc::new(MockRecordHandler::default()), shutdown.clone())
        .await
        .unwrap();

    tokio::time::sleep(poll_interval * 2 + poll_interval / 2).await;
    shutdown.cancel();
    handle.join().await;

    let fetches = client.fetches.lock().clone();
    assert_eq!(fetches.len(), 3);
    for pair in fetches.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        assert_eq!(prev.n_records, 0);
        assert_eq!(Some(&next.iterator), prev.next_iterator.as_ref());
        assert_eq!(next.at - prev.at, poll_interval);
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_iterator_fails_only_its_shard() {
    let state = MockStreamState::new(STREAM, 2);
    let shards = state.shard_ids();
    let (stalled, healthy) = (&shards[0], &shards[1]);
    state.push_records(stalled, 5);
    state.stall_shard(stalled);
    state.push_records(healthy, 5);

    let handler = Arc::new(MockRecordHandler::default());
    let store = Arc::new(MemoryCheckpointStore::default());
    let coordinator = StreamCoordinator::new(
        Arc::new(state.client()),
        Arc::clone(&store) as _,
        Arc::new(config(10)),
    );

    let shutdown = CancellationToken::new();
    let handle = coordinator
        .start(Arc::clone(&handler) as _, shutdown.clone())
        .await
        .unwrap();

    // the healthy shard keeps consuming after its sibling failed
    tokio::time::sleep(Duration::from_secs(2)).await;
    state.push_records(healthy, 3);
    tokio::time::sleep(Duration::from_secs(2)).await;
    shutdown.cancel();
    let report = handle.join().await;

    assert_matches!(
        &report.results[stalled],
        Err(ShardFailure::Scanner(ScannerError::IteratorNotAdvanced))
    );
    assert_matches!(
        &report.results[healthy],
        Ok(summary) if summary.reason == ExitReason::Cancelled && summary.records_delivered == 8
    );
    assert_eq!(store.get(&key(stalled)).await.unwrap(), None);
    assert_eq!(
        store.get(&key(healthy)).await.unwrap(),
        Some(SequenceNumber::from(8))
    );
    assert_eq!(report.failures().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn resume_delivers_only_records_after_checkpoint() {
    let state = MockStreamState::new(STREAM, 1);
    let shard = state.shard_ids().remove(0);
    state.push_records(&shard, 100);
    state.close_shard(&shard);

    let store = Arc::new(MemoryCheckpointStore::default());
    store
        .set(&key(&shard), SequenceNumber::from(40))
        .await
        .unwrap();
    let handler = Arc::new(MockRecordHandler::default());

    let report = StreamCoordinator::new(
        Arc::new(state.client()),
        Arc::clone(&store) as _,
        Arc::new(config(25)),
    )
    .run(Arc::clone(&handler) as _, CancellationToken::new())
    .await
    .unwrap();

    let delivered = handler.sequence_numbers(&shard).concat();
    let expected: Vec<_> = (41..=100).map(SequenceNumber::from).collect();
    assert_eq!(delivered, expected);
    assert_eq!(
        state.iterator_requests(),
        vec![(
            shard.clone(),
            StartingPosition::AfterSequenceNumber(SequenceNumber::from(40))
        )]
    );
    assert_eq!(
        report.results[&shard].as_ref().unwrap().reason,
        ExitReason::ShardClosed
    );
}

#[tokio::test(start_paused = true)]
async fn first_run_starts_at_oldest_record() {
    let state = MockStreamState::new(STREAM, 1);
    let shard = state.shard_ids().remove(0);
    state.push_records(&shard, 3);
    state.close_shard(&shard);
    let handler = Arc::new(MockRecordHandler::default());

    StreamCoordinator::new(
        Arc::new(state.client()),
        Arc::new(MemoryCheckpointStore::default()),
        Arc::new(config(10)),
    )
    .run(Arc::clone(&handler) as _, CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(
        state.iterator_requests(),
        vec![(shard.clone(), StartingPosition::TrimHorizon)]
    );
    assert_eq!(
        handler.sequence_numbers(&shard),
        vec![vec![
            SequenceNumber::from(1),
            SequenceNumber::from(2),
            SequenceNumber::from(3)
        ]]
    );
}

#[tokio::test(start_paused = true)]
async fn rerun_without_new_records_delivers_nothing() {
    let state = MockStreamState::new(STREAM, 1);
    let shard = state.shard_ids().remove(0);
    state.push_records(&shard, 42);
    let store = Arc::new(MemoryCheckpointStore::default());

    for run in 0..2 {
        let handler = Arc::new(MockRecordHandler::default());
        let coordinator = StreamCoordinator::new(
            Arc::new(state.client()),
            Arc::clone(&store) as _,
            Arc::new(config(10)),
        );
        let shutdown = CancellationToken::new();
        let handle = coordinator
            .start(Arc::clone(&handler) as _, shutdown.clone())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();
        handle.join().await;

        let expected = if run == 0 { 42 } else { 0 };
        assert_eq!(handler.total_records(), expected, "run {run}");
        assert_eq!(
            store.get(&key(&shard)).await.unwrap(),
            Some(SequenceNumber::from(42))
        );
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_the_poll_sleep() {
    let state = MockStreamState::new(STREAM, 3);
    let coordinator = StreamCoordinator::new(
        Arc::new(state.client()),
        Arc::new(MemoryCheckpointStore::default()),
        Arc::new(config(10).with_poll_interval(Duration::from_secs(3600))),
    );

    let shutdown = CancellationToken::new();
    let handle = coordinator
        .start(Arc::new(MockRecordHandler::default()), shutdown.clone())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let cancelled_at = Instant::now();
    shutdown.cancel();
    let report = handle.join().await;

    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert_eq!(report.summaries().count(), 3);
    assert!(
        report
            .summaries()
            .all(|s| s.reason == ExitReason::Cancelled)
    );
}

#[tokio::test(start_paused = true)]
async fn progress_survives_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let state = MockStreamState::new(STREAM, 1);
    let shard = state.shard_ids().remove(0);
    state.push_records(&shard, 30);

    let open_store = || {
        let fs = LocalFileSystem::new_with_prefix(dir.path()).unwrap();
        Arc::new(ObjectStoreCheckpointStore::new(Arc::new(fs)))
    };

    let first = Arc::new(MockRecordHandler::default());
    let handle = StreamCoordinator::new(
        Arc::new(state.client()),
        open_store(),
        Arc::new(config(10)),
    )
    .start(Arc::clone(&first) as _, CancellationToken::new())
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.shutdown();
    handle.join().await;
    assert_eq!(first.total_records(), 30);

    state.push_records(&shard, 5);
    state.close_shard(&shard);

    let second = Arc::new(MockRecordHandler::default());
    StreamCoordinator::new(
        Arc::new(state.client()),
        open_store(),
        Arc::new(config(10)),
    )
    .run(Arc::clone(&second) as _, CancellationToken::new())
    .await
    .unwrap();

    let delivered = second.sequence_numbers(&shard).concat();
    let expected: Vec<_> = (31..=35).map(SequenceNumber::from).collect();
    assert_eq!(delivered, expected);
}
