//! castplay - play videos locally or on a cast receiver
//!
//! # Usage
//!
//! ```bash
//! castplay play movie.mkv next.mkv --loop all
//! castplay play movie.mkv --device "Living Room TV"
//! castplay config show --json
//! castplay devices
//! ```

mod cli;
mod commands;
mod logging;

use clap::Parser;

use crate::cli::{Cli, Command, ExitCode, Output};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.verbose, cli.quiet) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    run_cli(cli).await.into()
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);
    let device = cli.device.as_deref();
    let config = cli.config.clone();

    match cli.command {
        Command::Play(cmd) => commands::play_cmd(cmd, device, config, &output).await,
        Command::Config(cmd) => commands::config_cmd(cmd, config, &output).await,
        Command::Subtitles(cmd) => commands::subtitles_cmd(cmd, config, &output).await,
        Command::Devices(cmd) => commands::devices_cmd(cmd, &output).await,
    }
}
