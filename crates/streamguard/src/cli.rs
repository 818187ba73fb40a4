//! Clap derive structures for the `streamguard` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "streamguard",
    version,
    about = "Connection-resilience engine for live chat streams",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', global = true, env = "STREAMGUARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Drive the engine against a simulated flaky stream
    Simulate(SimulateArgs),

    /// Classify a disconnect reason
    Classify(ClassifyArgs),

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Stream identifier passed to the adapter
    #[arg(long, short = 'i', default_value = "demo-stream")]
    pub identifier: String,

    /// How long to run before shutting down (e.g. "45s", "2m")
    #[arg(long, short = 'd', default_value = "30s", value_parser = humantime::parse_duration)]
    pub duration: Duration,

    /// Probability that a connect attempt fails
    #[arg(long, default_value_t = 0.3, value_parser = parse_probability)]
    pub failure_rate: f64,

    /// Per-tick probability that a live stream drops
    #[arg(long, default_value_t = 0.05, value_parser = parse_probability)]
    pub disconnect_rate: f64,

    /// Interval between simulated chat messages
    #[arg(long, default_value = "250ms", value_parser = humantime::parse_duration)]
    pub message_interval: Duration,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    /// Disconnect reason text as reported by the stream
    pub reason: String,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Print the config file path
    Path,
    /// Validate the effective configuration
    Check,
    /// Write a config file populated with defaults
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn parse_probability(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not between 0 and 1"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn probability_bounds() {
        assert!(parse_probability("0").is_ok());
        assert!(parse_probability("1.0").is_ok());
        assert!(parse_probability("1.5").is_err());
        assert!(parse_probability("-0.1").is_err());
        assert!(parse_probability("often").is_err());
    }

    #[test]
    fn simulate_defaults() {
        let cli = Cli::try_parse_from(["streamguard", "simulate"]).unwrap();
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.duration, Duration::from_secs(30));
        assert_eq!(args.message_interval, Duration::from_millis(250));
        assert!(!args.json);
    }
}
