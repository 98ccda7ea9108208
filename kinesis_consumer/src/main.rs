//! Entrypoint of the kinesis_consumer binary

use dotenvy::dotenv;
use kinesis_consumer_clap_blocks::{logging::LoggingConfig, runtime::TokioRuntimeConfig};

mod commands {
    pub(crate) mod common;
    pub(crate) mod run;
    pub(crate) mod seed;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "kinesis_consumer",
    version,
    about = "Consume a Kinesis data stream shard by shard",
    long_about = r#"Consume a Kinesis data stream shard by shard

Every shard is read by its own task. Records are printed once they have been handled in batches,
and progress is checkpointed per shard so a restarted consumer resumes where it left off.

Examples:
    # Consume a stream, keeping checkpoints in a local directory
    kinesis_consumer run --app-name my_app --stream-name userStream --checkpoint-store file --checkpoint-dir ~/.kinesis_consumer

    # Publish the lines of a file to a stream
    kinesis_consumer seed --stream-name userStream --file users.txt

    # Consume with debug logging
    kinesis_consumer run -vv --app-name my_app --stream-name userStream
"#
)]
struct Config {
    #[clap(flatten)]
    runtime_config: TokioRuntimeConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Consume a stream and print its records to stdout
    ///
    /// Checkpoints are kept in memory unless `--checkpoint-store file` is given, so progress is
    /// lost on exit by default.
    Run(commands::run::Config),

    /// Publish the lines of a file as records to a stream
    Seed(commands::seed::Config),
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    let tokio_runtime = config.runtime_config.builder()?.build()?;

    tokio_runtime.block_on(async move {
        match config.command {
            None => println!("command required, -h/--help for help"),
            Some(Command::Run(config)) => {
                init_logs(&config.logging_config);
                if let Err(e) = commands::run::command(config).await {
                    eprintln!("Run command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::Seed(config)) => {
                init_logs(&config.logging_config);
                if let Err(e) = commands::seed::command(config).await {
                    eprintln!("Seed command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // Ignore this - a missing env file is not an error, defaults will
            // be applied when initialising the Config struct.
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}

fn init_logs(config: &LoggingConfig) {
    if let Err(e) = config.install_global_subscriber() {
        eprintln!("Initializing logs failed: {e}");
        std::process::exit(ReturnCode::Failure as _);
    }
}
