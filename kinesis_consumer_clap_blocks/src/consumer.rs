//! CLI config for consumer identity and tuning.

use std::{
    num::{NonZeroU32, NonZeroUsize},
    time::Duration,
};

use kinesis_consumer_core::{BackoffConfig, ConsumerConfig, InitialPosition};

/// Where to start reading a shard that has no checkpoint yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum InitialPositionArg {
    /// The oldest record still retained.
    #[default]
    TrimHorizon,

    /// Only records written from now on.
    Latest,
}

impl From<InitialPositionArg> for InitialPosition {
    fn from(arg: InitialPositionArg) -> Self {
        match arg {
            InitialPositionArg::TrimHorizon => Self::TrimHorizon,
            InitialPositionArg::Latest => Self::Latest,
        }
    }
}

/// CLI config for retrying transient fetch failures.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct RetryConfig {
    /// Wait before the first retry.
    #[clap(
        long = "retry-initial-backoff",
        env = "KINESIS_RETRY_INITIAL_BACKOFF",
        default_value = "100ms",
        value_parser = humantime::parse_duration
    )]
    pub initial_backoff: Duration,

    /// Upper bound for the wait between retries.
    #[clap(
        long = "retry-max-backoff",
        env = "KINESIS_RETRY_MAX_BACKOFF",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub max_backoff: Duration,

    /// Growth factor of the wait between retries.
    #[clap(
        long = "retry-base",
        env = "KINESIS_RETRY_BASE",
        default_value = "3.0",
        action
    )]
    pub base: f64,

    /// Retries before a shard is given up. 0 retries forever.
    #[clap(
        long = "retry-max-attempts",
        env = "KINESIS_RETRY_MAX_ATTEMPTS",
        default_value = "10",
        action
    )]
    pub max_attempts: u32,
}

impl From<RetryConfig> for BackoffConfig {
    fn from(config: RetryConfig) -> Self {
        Self {
            init_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            base: config.base,
            max_attempts: NonZeroU32::new(config.max_attempts),
        }
    }
}

/// CLI config for the consumer.
#[derive(Debug, Clone, clap::Parser)]
pub struct ConsumerArgs {
    /// Name of the consuming application.
    ///
    /// Checkpoints are kept per application, so two applications with different names each read
    /// the whole stream.
    #[clap(long = "app-name", env = "KINESIS_APP_NAME", action)]
    pub app_name: String,

    /// Name of the stream to consume.
    #[clap(long = "stream-name", env = "KINESIS_STREAM_NAME", action)]
    pub stream_name: String,

    /// Pause after a poll that returned no records, e.g. "1s" or "250ms".
    #[clap(
        long = "poll-interval",
        env = "KINESIS_POLL_INTERVAL",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub poll_interval: Duration,

    /// Number of buffered records that are handed over and checkpointed together.
    #[clap(
        long = "max-batch-count",
        env = "KINESIS_MAX_BATCH_COUNT",
        default_value = "1000",
        action
    )]
    pub max_batch_count: NonZeroUsize,

    /// Most records requested per poll. Unset leaves it to the service.
    #[clap(long = "fetch-limit", env = "KINESIS_FETCH_LIMIT", action)]
    pub fetch_limit: Option<NonZeroUsize>,

    /// Where to start reading shards that have no checkpoint.
    #[clap(
        long = "initial-position",
        env = "KINESIS_INITIAL_POSITION",
        value_enum,
        default_value_t = InitialPositionArg::default(),
        action
    )]
    pub initial_position: InitialPositionArg,

    #[clap(flatten)]
    pub retry: RetryConfig,
}

impl ConsumerArgs {
    pub fn to_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(&self.app_name, &self.stream_name)
            .with_poll_interval(self.poll_interval)
            .with_max_batch_count(self.max_batch_count)
            .with_fetch_limit(self.fetch_limit)
            .with_initial_position(self.initial_position.into())
            .with_retry(self.retry.into())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn defaults() {
        let args =
            ConsumerArgs::try_parse_from(["cli", "--app-name", "app", "--stream-name", "stream"])
                .unwrap();
        let config = args.to_config();

        assert_eq!(config.app_name, "app");
        assert_eq!(config.stream_name, "stream");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.max_batch_count.get(), 1000);
        assert_eq!(config.fetch_limit, None);
        assert_eq!(config.initial_position, InitialPosition::TrimHorizon);
        assert_eq!(config.retry, BackoffConfig::default());
    }

    #[test]
    fn overrides() {
        let args = ConsumerArgs::try_parse_from([
            "cli",
            "--app-name",
            "app",
            "--stream-name",
            "stream",
            "--poll-interval",
            "250ms",
            "--max-batch-count",
            "50",
            "--fetch-limit",
            "500",
            "--initial-position",
            "latest",
            "--retry-max-attempts",
            "0",
        ])
        .unwrap();
        let config = args.to_config();

        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.max_batch_count.get(), 50);
        assert_eq!(config.fetch_limit, NonZeroUsize::new(500));
        assert_eq!(config.initial_position, InitialPosition::Latest);
        assert_eq!(config.retry.max_attempts, None);
    }

    #[test]
    fn rejects_bad_values() {
        let base = ["cli", "--app-name", "app", "--stream-name", "stream"];

        let args = base.iter().chain(&["--max-batch-count", "0"]).copied();
        assert!(ConsumerArgs::try_parse_from(args).is_err());

        let args = base.iter().chain(&["--poll-interval", "soon"]).copied();
        assert!(ConsumerArgs::try_parse_from(args).is_err());

        let args = base.iter().chain(&["--initial-position", "middle"]).copied();
        assert!(ConsumerArgs::try_parse_from(args).is_err());
    }
}
