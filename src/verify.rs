use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, error};
use serde::Serialize;

use crate::database;
use crate::error::MigrateError;
use crate::schema::MigrationScript;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnStatus {
    pub table: String,
    pub column: String,
    pub present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyOutcome {
    Missing,
    Checked { columns: Vec<ColumnStatus> },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: VerifyOutcome,
}

impl VerifyReport {
    /// Every expected column is present.
    pub fn is_complete(&self) -> bool {
        match &self.outcome {
            VerifyOutcome::Checked { columns } => columns.iter().all(|c| c.present),
            _ => false,
        }
    }
}

/// Columns `verify` looks for. Scripts loaded from a file don't declare
/// their columns, so only the sentinel is checked for those.
fn expected_columns(script: &MigrationScript) -> Vec<(String, String)> {
    if script.columns.is_empty() {
        return vec![(
            script.sentinel.table.clone(),
            script.sentinel.column.clone(),
        )];
    }

    script
        .columns
        .iter()
        .map(|c| (c.table.to_owned(), c.column.to_owned()))
        .collect()
}

/// Read-only check of the columns `script` adds.
pub fn verify_target(path: &Path, script: &MigrationScript) -> VerifyReport {
    let outcome = if !path.is_file() {
        VerifyOutcome::Missing
    } else {
        match check_columns(path, script) {
            Ok(columns) => VerifyOutcome::Checked { columns },
            Err(e) => {
                error!("{}: verification failed: {}", path.display(), e);
                VerifyOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    };

    VerifyReport {
        path: path.to_path_buf(),
        outcome,
    }
}

fn check_columns(path: &Path, script: &MigrationScript) -> Result<Vec<ColumnStatus>, MigrateError> {
    let conn = database::open_read_only(path)?;
    let mut existing: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut statuses = Vec::new();

    for (table, column) in expected_columns(script) {
        if !existing.contains_key(&table) {
            let columns = database::table_columns(&conn, &table)?;
            debug!("{}: {} has {} column(s)", path.display(), table, columns.len());
            existing.insert(table.clone(), columns);
        }

        let present = existing
            .get(&table)
            .map(|columns| database::has_column(columns, &column))
            .unwrap_or(false);

        statuses.push(ColumnStatus {
            table,
            column,
            present,
        });
    }

    Ok(statuses)
}

pub fn print_report(report: &VerifyReport) {
    println!();
    println!("--- Verifying database: {} ---", report.path.display());
    match &report.outcome {
        VerifyOutcome::Missing => println!("Database file not found"),
        VerifyOutcome::Failed { error } => println!("Verification failed: {}", error),
        VerifyOutcome::Checked { columns } => {
            for status in columns {
                let mark = if status.present { "ok" } else { "MISSING" };
                println!("  {}.{}: {}", status.table, status.column, mark);
            }
            if report.is_complete() {
                println!("All expected columns present");
            }
        }
    }
}
