//! lightwire CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use lightwire_cli::cli::{Cli, Command, ConfigAction, RunArgs};
use lightwire_cli::commands;
use lightwire_cli::config::ClientConfig;
use lightwire_cli::error::{CliError, CliResult};
use lightwire_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = if cli.debug {
        TracingConfig::debug()
    } else {
        TracingConfig::default()
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("error: {}", CliError::Tracing(e.to_string()));
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let source = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let config = match cli.config {
        Some(ref path) => ClientConfig::load_from(path),
        None => ClientConfig::load(),
    }
    .map_err(CliError::Config)?;

    let format = cli.output_format(config.output.json);

    match cli.command {
        Some(Command::Run(ref args)) => commands::run::run(args, &config, format).await,
        Some(Command::Ports) => commands::ports::list(cli.json),
        Some(Command::Config { ref action }) => match action {
            ConfigAction::Dump => commands::config::dump(&config, &source),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&source),
        },
        None => {
            // Bare `lightwire` behaves like `lightwire run` with no flags.
            let args = RunArgs {
                device: std::env::var("LIGHTWIRE_DEVICE").ok(),
                ..RunArgs::default()
            };
            commands::run::run(&args, &config, format).await
        }
    }
}
