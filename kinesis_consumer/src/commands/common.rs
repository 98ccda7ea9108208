use aws_config::{BehaviorVersion, Region, retry::RetryConfig};
use clap::Parser;
use kinesis_consumer_core::client::kinesis::KinesisStreamClient;
use tracing::info;

/// Attempts the SDK makes per request before handing the error to the consumer.
const SDK_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Parser)]
pub(crate) struct AwsConfig {
    /// The AWS region of the stream
    ///
    /// Falls back to the usual AWS environment and profile settings.
    #[clap(long = "region", env = "AWS_REGION", action)]
    pub(crate) region: Option<String>,

    /// Send requests to this endpoint instead of the regional AWS one, e.g. a local emulator
    #[clap(long = "endpoint-url", env = "KINESIS_ENDPOINT_URL", action)]
    pub(crate) endpoint_url: Option<String>,
}

impl AwsConfig {
    /// Load credentials and region, and build a stream client from them.
    pub(crate) async fn stream_client(&self) -> KinesisStreamClient {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::standard().with_max_attempts(SDK_MAX_ATTEMPTS));
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint_url) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let sdk_config = loader.load().await;
        info!(
            region = ?sdk_config.region(),
            endpoint_url = ?self.endpoint_url,
            "loaded AWS config"
        );

        KinesisStreamClient::new(aws_sdk_kinesis::Client::new(&sdk_config))
    }
}
