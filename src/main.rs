mod backup;
mod cli;
mod config;
mod database;
mod error;
mod migrator;
mod reports;
mod schema;
mod verify;

use std::process::ExitCode;

use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::{debug, error};

use crate::cli::Cli;
use crate::config::Config;
use crate::error::MigrateError;

/// Log level comes from the config file unless RUST_LOG is set.
fn setup_logging(config: &Config) -> Result<LoggerHandle, MigrateError> {
    Logger::try_with_env_or_str(&config.logging.level)
        .and_then(|logger| logger.format(flexi_logger::detailed_format).start())
        .map_err(|e| MigrateError::Error(format!("Failed to start logger: {}", e)))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::load_config(cli.config_path());

    // Logging is best-effort; the report on stdout does not depend on it
    let _logger = match setup_logging(&config) {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("{}", err);
            None
        }
    };
    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());
    debug!("Effective configuration: {:?}", config);

    match cli.run(&config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{:?}", err);
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
