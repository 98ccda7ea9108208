//! Common CLI flags for logging.

use thiserror::Error;
use tracing_subscriber::{
    EnvFilter,
    filter::ParseError,
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// Filter used when neither `--log-filter` nor `-v` is given.
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter {directive:?}: {source}")]
    InvalidFilter {
        directive: String,
        source: ParseError,
    },

    #[error("unable to install the global log subscriber: {0}")]
    Install(#[from] TryInitError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// human-readable, single line
    #[default]
    Full,

    /// human-readable, multi line
    Pretty,

    /// machine-parseable, one JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogDestination {
    #[default]
    Stdout,
    Stderr,
}

/// CLI config for the logging related subset of options.
#[derive(Debug, Clone, clap::Parser)]
pub struct LoggingConfig {
    /// Logs: filter directive
    ///
    /// Configures log severity level filter, by target.
    ///
    /// Simplest options: error, warn, info, debug, trace
    ///
    /// Levels for different modules can be specified. For example
    /// `debug,aws_smithy_runtime=info` specifies debug logging for all modules
    /// except for the AWS SDK runtime which will only display info level logging.
    ///
    /// Overridden by `-v`.
    #[clap(long = "log-filter", env = "LOG_FILTER", action)]
    pub log_filter: Option<String>,

    /// Logs: filter short-hand
    ///
    /// Convenient way to set log severity level filter.
    /// Overrides `--log-filter`.
    ///
    /// -v   'info'
    ///
    /// -vv  'debug,aws_smithy_runtime=info,hyper=info,h2=info'
    ///
    /// -vvv 'trace'
    #[clap(
        short = 'v',
        long = "verbose",
        action = clap::ArgAction::Count,
        verbatim_doc_comment
    )]
    pub log_verbose_count: u8,

    /// Logs: destination
    #[clap(
        value_enum,
        long = "log-destination",
        env = "LOG_DESTINATION",
        ignore_case = true,
        default_value_t = LogDestination::default(),
        action
    )]
    pub log_destination: LogDestination,

    /// Logs: message format
    #[clap(
        value_enum,
        long = "log-format",
        env = "LOG_FORMAT",
        ignore_case = true,
        default_value_t = LogFormat::default(),
        action
    )]
    pub log_format: LogFormat,
}

impl LoggingConfig {
    /// The effective filter directive. `-v` goes before `--log-filter`.
    pub fn filter_directive(&self) -> &str {
        match self.log_verbose_count {
            0 => self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER),
            1 => "info",
            2 => "debug,aws_smithy_runtime=info,hyper=info,h2=info",
            _ => "trace",
        }
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        let directive = self.filter_directive();
        EnvFilter::try_new(directive).map_err(|source| LoggingError::InvalidFilter {
            directive: directive.to_string(),
            source,
        })
    }

    /// Install a global subscriber that writes logs as configured.
    ///
    /// Fails if the filter does not parse or a global subscriber is already installed.
    pub fn install_global_subscriber(&self) -> Result<(), LoggingError> {
        let filter = self.env_filter()?;

        let writer = match self.log_destination {
            LogDestination::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogDestination::Stderr => BoxMakeWriter::new(std::io::stderr),
        };

        let (full, pretty, json) = match self.log_format {
            LogFormat::Full => (Some(fmt::layer().with_writer(writer)), None, None),
            LogFormat::Pretty => (None, Some(fmt::layer().pretty().with_writer(writer)), None),
            LogFormat::Json => (None, None, Some(fmt::layer().json().with_writer(writer))),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(full)
            .with(pretty)
            .with(json)
            .try_init()?;

        Ok(())
    }
}
