mod cli;
mod commands;
mod config;
mod error;
mod sim;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use streamguard_config::LoggingSection;

use crate::cli::{Cli, GlobalOpts, LogFormat};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A broken config file is reported by the command itself; logging
    // falls back to defaults until then.
    let logging = config::load(&config::resolve_path(&cli.global))
        .map(|cfg| cfg.logging)
        .unwrap_or_default();
    init_tracing(&cli.global, &logging);

    if let Err(err) = commands::dispatch(&cli.command, &cli.global).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(global: &GlobalOpts, logging: &LoggingSection) {
    let directive = match global.verbose {
        0 => logging
            .filter
            .clone()
            .unwrap_or_else(|| "streamguard=info,streamguard_core=info".into()),
        1 => "streamguard=debug,streamguard_core=debug".into(),
        2 => "debug".into(),
        _ => "trace".into(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let json = match global.log_format {
        Some(format) => format == LogFormat::Json,
        None => logging.json,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}
