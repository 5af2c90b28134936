use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use log::info;

use crate::config::Config;
use crate::error::MigrateError;
use crate::migrator::{self, ApplyOptions};
use crate::reports::{ConsoleReporter, SilentObserver};
use crate::schema::{MigrationScript, Sentinel};
use crate::verify;

#[derive(Parser)]
#[command(
    name = "mapdraw-migrate",
    version,
    about = "Adds map drawing columns to ExamSystem SQLite databases"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the local data directory)
    #[arg(long = "config", short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply the migration to each database (default if no command specified)
    Apply(ApplyArgs),

    /// Check which migration columns exist in each database without changing it
    Verify(VerifyArgs),

    /// Print the built-in migration SQL
    #[command(name = "show-sql")]
    ShowSql,

    /// Print the effective configuration as TOML
    #[command(name = "show-config")]
    ShowConfig,
}

#[derive(Args, Default)]
pub struct ScriptArgs {
    /// Read the migration SQL from a file instead of using the built-in script.
    /// An outer BEGIN/COMMIT pair in the file is removed
    #[arg(long = "script", short = 's')]
    pub script: Option<PathBuf>,

    /// Table holding the sentinel column (default: Questions)
    #[arg(long = "sentinel-table")]
    pub sentinel_table: Option<String>,

    /// Column whose presence means the migration already ran (default: MapDrawingConfigJson)
    #[arg(long = "sentinel-column")]
    pub sentinel_column: Option<String>,
}

#[derive(Args, Default)]
pub struct ApplyArgs {
    /// Database files, processed in order (default: targets from configuration)
    pub targets: Vec<PathBuf>,

    #[command(flatten)]
    pub script: ScriptArgs,

    /// Snapshot each database to <path>.backup_<timestamp> before migrating it
    #[arg(long = "backup", short = 'b', default_value_t = false)]
    pub backup: bool,

    /// Print the run summary as JSON instead of progress text
    #[arg(long = "json", default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Default)]
pub struct VerifyArgs {
    /// Database files to check (default: targets from configuration)
    pub targets: Vec<PathBuf>,

    #[command(flatten)]
    pub script: ScriptArgs,

    /// Print the reports as JSON
    #[arg(long = "json", default_value_t = false)]
    pub json: bool,
}

impl ScriptArgs {
    /// The built-in script, or a file script with the given or default sentinel.
    pub fn build_script(&self) -> Result<MigrationScript, MigrateError> {
        let mut script = match &self.script {
            Some(path) => {
                let builtin = MigrationScript::map_drawing();
                MigrationScript::from_file(path, builtin.sentinel)?
            }
            None => MigrationScript::map_drawing(),
        };

        if self.sentinel_table.is_some() || self.sentinel_column.is_some() {
            script.sentinel = Sentinel {
                table: self
                    .sentinel_table
                    .clone()
                    .unwrap_or(script.sentinel.table),
                column: self
                    .sentinel_column
                    .clone()
                    .unwrap_or(script.sentinel.column),
            };
        }

        Ok(script)
    }
}

/// Command-line targets win over configured ones.
pub fn resolve_targets(cli_targets: &[PathBuf], config: &Config) -> Vec<PathBuf> {
    if cli_targets.is_empty() {
        config.migration.targets.clone()
    } else {
        cli_targets.to_vec()
    }
}

impl Cli {
    /// Runs the parsed command. `Ok(false)` means the command completed but
    /// at least one target failed.
    pub fn run(self, config: &Config) -> Result<bool, MigrateError> {
        match self.command.unwrap_or(Command::Apply(ApplyArgs::default())) {
            Command::Apply(args) => Self::apply(args, config),
            Command::Verify(args) => Self::verify(args, config),
            Command::ShowSql => {
                print!("{}", MigrationScript::map_drawing().display_sql());
                Ok(true)
            }
            Command::ShowConfig => {
                let toml = config
                    .to_toml()
                    .map_err(|e| MigrateError::Error(format!("Failed to serialize config: {}", e)))?;
                print!("{}", toml);
                Ok(true)
            }
        }
    }

    fn apply(args: ApplyArgs, config: &Config) -> Result<bool, MigrateError> {
        let script = args.script.build_script()?;
        let targets = resolve_targets(&args.targets, config);
        let options = ApplyOptions {
            backup: args.backup || config.migration.backup,
        };

        info!(
            "Migration '{}' sentinel {}.{}, backup={}",
            script.name, script.sentinel.table, script.sentinel.column, options.backup
        );

        let summary = if args.json {
            let summary = migrator::apply(&targets, &script, options, &mut SilentObserver);
            println!("{}", serde_json::to_string_pretty(&summary)?);
            summary
        } else {
            migrator::apply(&targets, &script, options, &mut ConsoleReporter)
        };

        Ok(!summary.has_failures())
    }

    fn verify(args: VerifyArgs, config: &Config) -> Result<bool, MigrateError> {
        let script = args.script.build_script()?;
        let targets = resolve_targets(&args.targets, config);

        let reports: Vec<_> = targets
            .iter()
            .map(|path| verify::verify_target(path, &script))
            .collect();

        if args.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        } else {
            println!("=== Verifying Migration ({}) ===", script.name);
            reports.iter().for_each(verify::print_report);
            println!();
            println!("=== Verification Complete ===");
        }

        Ok(reports.iter().all(verify::VerifyReport::is_complete))
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}
