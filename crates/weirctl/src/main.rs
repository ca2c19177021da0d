//! weirctl: load driver for Weir buffered channels.
//!
//! Runs a coordinator and a worker over an in-memory port pair and reports
//! throughput, latency and error counts for both sides.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Load driver for Weir buffered channels.
#[derive(Parser)]
#[command(name = "weirctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format (text, json)
    #[arg(short, long, env = "WEIR_OUTPUT", default_value = "text")]
    output: OutputFormat,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "WEIR_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// OTLP endpoint for metrics export (e.g., http://localhost:4317)
    #[arg(long, env = "WEIR_OTEL_ENDPOINT")]
    otel_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Push messages from a coordinator to a worker and report the outcome
    Run {
        /// Number of messages to send
        #[arg(short, long, env = "WEIR_COUNT", default_value = "1000")]
        count: u64,
        /// Maximum unacknowledged messages
        #[arg(long, env = "WEIR_CAPACITY", default_value = "4")]
        capacity: usize,
        /// Payload size in bytes
        #[arg(long, env = "WEIR_PAYLOAD_SIZE", default_value = "1024")]
        payload_size: usize,
        /// Per-send timeout in milliseconds (0 = none)
        #[arg(long, env = "WEIR_TIMEOUT_MS", default_value = "5000")]
        timeout_ms: u64,
        /// Worker rejects every Nth message (0 = never)
        #[arg(long, env = "WEIR_FAIL_EVERY", default_value = "0")]
        fail_every: u64,
        /// Worker delays every Nth message (0 = never)
        #[arg(long, env = "WEIR_DELAY_EVERY", default_value = "0")]
        delay_every: u64,
        /// Delay applied by --delay-every, in milliseconds
        #[arg(long, env = "WEIR_DELAY_MS", default_value = "10")]
        delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.output {
        OutputFormat::Text => weir::observability::tracing::init_tracing(&cli.log_level),
        OutputFormat::Json => weir::observability::tracing::init_json_tracing(&cli.log_level),
    }
    weir::observability::metrics::init_metrics_with_endpoint(cli.otel_endpoint.as_deref());

    match cli.command {
        Commands::Run {
            count,
            capacity,
            payload_size,
            timeout_ms,
            fail_every,
            delay_every,
            delay_ms,
        } => {
            let config = commands::run::RunConfig {
                count,
                capacity,
                payload_size,
                timeout_ms,
                fail_every,
                delay_every,
                delay_ms,
            };
            commands::run::run(config, cli.output).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_json_output_flag() {
        let cli = Cli::try_parse_from(["weirctl", "--output", "json", "run", "--count", "10"]).unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["weirctl", "run"]).unwrap();
        assert_eq!(cli.output, OutputFormat::Text);
        match cli.command {
            Commands::Run {
                count,
                capacity,
                timeout_ms,
                fail_every,
                ..
            } => {
                assert_eq!(count, 1000);
                assert_eq!(capacity, 4);
                assert_eq!(timeout_ms, 5000);
                assert_eq!(fail_every, 0);
            }
        }
    }
}
