//! Vigil CLI - host process for the media detection service.
//!
//! The `vigil` binary runs single detections, serves newline-delimited JSON
//! requests on stdin, and prints the effective configuration. Logs go to
//! stderr so stdout stays machine-readable.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vigil_serving::ServingConfig;

use commands::{ConfigOverrides, DetectArgs, config, detect, serve};

/// Vigil - detection serving for images and videos
#[derive(Parser, Debug)]
#[command(
    name = "vigil",
    author,
    version,
    about = "Vigil - media detection serving",
    long_about = "Vigil loads detection models on demand, runs them over images and videos,\nand writes annotated results to a results directory."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file (defaults to ./vigil.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one detection request and print its result as JSON
    Detect(DetectArgs),

    /// Serve newline-delimited JSON requests from stdin
    ///
    /// Each line is either `ping` or an object with `options` and an
    /// `imagePath` or `videoFilePath`. One JSON response is written per line.
    /// Exits at end of input or once the service has been idle past the TTL.
    Serve,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let mut serving = ServingConfig::discover(args.config.as_deref())?;
    serving.apply_env()?;
    args.overrides.apply(&mut serving);
    serving.validate()?;

    match args.command {
        Command::Detect(detect_args) => detect::execute(serving, detect_args).await?,
        Command::Serve => serve::execute(serving).await?,
        Command::Config => config::execute(&serving)?,
    }

    Ok(())
}

fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .without_time()
            .with_target(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(());
    }

    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
