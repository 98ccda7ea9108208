//! Consume a stream and print every record to stdout.

use std::{fmt::Write as _, sync::Arc};

use async_trait::async_trait;
use clap::Parser;
use kinesis_consumer_clap_blocks::{
    checkpoint::{CheckpointStoreConfig, ParseError},
    consumer::ConsumerArgs,
    logging::LoggingConfig,
};
use kinesis_consumer_core::{
    CoordinatorError, HandlerAction, HandlerError, Record, RecordHandler, ShardId,
    StreamCoordinator,
};
use tokio::{
    io::{AsyncWriteExt, Stdout},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::common::AwsConfig;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("invalid checkpoint store config: {0}")]
    CheckpointStore(#[from] ParseError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("unable to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),

    #[error("{failed} of {total} shards failed")]
    ShardsFailed { failed: usize, total: usize },
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Parser)]
pub(crate) struct Config {
    #[clap(flatten)]
    aws: AwsConfig,

    #[clap(flatten)]
    consumer: ConsumerArgs,

    #[clap(flatten)]
    checkpoint: CheckpointStoreConfig,

    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let store = config.checkpoint.make_checkpoint_store()?;
    let client = Arc::new(config.aws.stream_client().await);
    let consumer_config = Arc::new(config.consumer.to_config());

    let coordinator = StreamCoordinator::new(client, store, consumer_config);
    let shutdown = CancellationToken::new();
    let handle = coordinator
        .start(Arc::new(StdoutHandler::default()), shutdown.clone())
        .await?;

    let join = handle.join();
    tokio::pin!(join);

    let report = tokio::select! {
        report = &mut join => report,
        res = wait_for_signal() => {
            res?;
            info!("shutting down, flushing buffered records");
            shutdown.cancel();
            join.await
        }
    };

    let total = report.results.len();
    let failed = report.failures().count();
    let delivered: u64 = report.summaries().map(|s| s.records_delivered).sum();
    info!(total, failed, delivered, "consumer stopped");

    if failed > 0 {
        return Err(Error::ShardsFailed { failed, total });
    }
    Ok(())
}

/// Wait for a `SIGTERM` or `SIGINT` to stop the consumer on UNIX systems
#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = term.recv() => info!("Received SIGTERM"),
        _ = int.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

/// Wait for a `ctrl+c` to stop the consumer on Windows systems
#[cfg(windows)]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received SIGINT");
    Ok(())
}

/// Writes one tab-separated line per record: shard, sequence number, partition key, payload.
#[derive(Debug)]
struct StdoutHandler {
    out: Mutex<Stdout>,
}

impl Default for StdoutHandler {
    fn default() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

#[async_trait]
impl RecordHandler for StdoutHandler {
    async fn handle_records(
        &self,
        shard_id: &ShardId,
        records: &[Record],
    ) -> std::result::Result<HandlerAction, HandlerError> {
        let lines = format_records(shard_id, records);

        let mut out = self.out.lock().await;
        out.write_all(lines.as_bytes()).await?;
        out.flush().await?;

        Ok(HandlerAction::Continue)
    }
}

fn format_records(shard_id: &ShardId, records: &[Record]) -> String {
    let mut lines = String::new();
    for record in records {
        let data = String::from_utf8_lossy(record.data());
        if let Err(e) = writeln!(
            lines,
            "{shard_id}\t{}\t{}\t{}",
            record.sequence_number(),
            record.partition_key(),
            data.trim_end_matches(['\r', '\n'])
        ) {
            warn!(error=%e, %shard_id, "unable to format record");
        }
    }
    lines
}
