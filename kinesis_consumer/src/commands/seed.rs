//! Publish the lines of a file as records.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use clap::Parser;
use kinesis_consumer_clap_blocks::logging::LoggingConfig;
use kinesis_consumer_core::{ClientError, client::kinesis::MAX_PUT_RECORDS_BATCH};
use tokio::{
    fs::File,
    io::{self, AsyncBufReadExt, BufReader},
};
use tracing::{info, warn};

use super::common::AwsConfig;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("error reading file {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("{failed} of {total} records were rejected")]
    Rejected { failed: usize, total: usize },
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Parser)]
pub(crate) struct Config {
    #[clap(flatten)]
    aws: AwsConfig,

    /// Name of the stream to publish to
    #[clap(long = "stream-name", env = "KINESIS_STREAM_NAME", action)]
    stream_name: String,

    /// File path to load the records from, one record per line
    #[clap(short = 'f', long = "file", action)]
    file_path: PathBuf,

    /// Records published per request
    #[clap(
        long = "batch-size",
        default_value = "500",
        value_parser = clap::value_parser!(u16).range(1..=MAX_PUT_RECORDS_BATCH as i64),
    )]
    batch_size: u16,

    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let lines = read_lines(&config.file_path).await?;
    let client = config.aws.stream_client().await;

    let total = lines.len();
    let batch_size = usize::from(config.batch_size);
    let mut failed = 0;

    let entries = keyed_entries(lines);
    for (n, batch) in entries.chunks(batch_size).enumerate() {
        let offset = n * batch_size;
        for failure in client.put_records(&config.stream_name, batch.to_vec()).await? {
            warn!(
                stream = %config.stream_name,
                line = offset + failure.index + 1,
                code = %failure.code,
                message = %failure.message,
                "record rejected"
            );
            failed += 1;
        }
    }

    info!(stream = %config.stream_name, total, failed, "finished seeding stream");
    if failed > 0 {
        return Err(Error::Rejected { failed, total });
    }

    println!("published {total} records to {}", config.stream_name);
    Ok(())
}

async fn read_lines(path: &Path) -> Result<Vec<String>> {
    let to_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).await.map_err(to_err)?;
    let mut lines = BufReader::new(file).lines();
    let mut out = vec![];
    while let Some(line) = lines.next_line().await.map_err(to_err)? {
        out.push(line);
    }
    Ok(out)
}

/// Pair each line with the partition key `partitionKey-<n>`, counting from 1.
fn keyed_entries(lines: Vec<String>) -> Vec<(String, Bytes)> {
    lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| (format!("partitionKey-{}", i + 1), Bytes::from(line)))
        .collect()
}
