mod map_drawing;

use std::fs;
use std::path::Path;

use crate::error::MigrateError;

pub use map_drawing::{MAP_DRAWING_COLUMNS, MAP_DRAWING_SENTINEL};

/// Table and column whose presence marks a migration as already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    pub table: String,
    pub column: String,
}

impl Sentinel {
    pub fn new(table: &str, column: &str) -> Self {
        Sentinel {
            table: table.to_owned(),
            column: column.to_owned(),
        }
    }
}

/// A single `ALTER TABLE ... ADD COLUMN` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnAddition {
    pub table: &'static str,
    pub column: &'static str,
    pub definition: &'static str,
}

impl ColumnAddition {
    pub fn to_sql(&self) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            self.table, self.column, self.definition
        )
    }
}

/// A migration as handed to the applier.
///
/// `sql` holds the ordered statements without any transaction control. The
/// applier owns the BEGIN/COMMIT boundary. `from_file` strips one outer
/// BEGIN/COMMIT pair; any other transaction control in the body fails when
/// applied.
///
/// `columns` lists what the migration adds. It drives `verify` and is empty
/// for scripts loaded from a file.
#[derive(Debug, Clone)]
pub struct MigrationScript {
    pub name: String,
    pub sentinel: Sentinel,
    pub sql: String,
    pub columns: Vec<ColumnAddition>,
}

impl MigrationScript {
    /// Builds a script from an ordered list of column additions.
    pub fn from_columns(name: &str, sentinel: Sentinel, columns: &[ColumnAddition]) -> Self {
        let sql = columns
            .iter()
            .map(ColumnAddition::to_sql)
            .collect::<Vec<_>>()
            .join("\n");

        MigrationScript {
            name: name.to_owned(),
            sentinel,
            sql,
            columns: columns.to_vec(),
        }
    }

    /// The built-in map drawing migration: six columns on `Questions`,
    /// three on `AnswerRecords`.
    pub fn map_drawing() -> Self {
        let (table, column) = MAP_DRAWING_SENTINEL;
        Self::from_columns("map_drawing", Sentinel::new(table, column), MAP_DRAWING_COLUMNS)
    }

    /// Loads a SQL body from disk. The caller supplies the sentinel since a
    /// free-form script does not declare one.
    pub fn from_file(path: &Path, sentinel: Sentinel) -> Result<Self, MigrateError> {
        let sql = fs::read_to_string(path).map_err(|e| {
            MigrateError::Error(format!(
                "Failed to read migration script {}: {}",
                path.display(),
                e
            ))
        })?;

        let sql = strip_transaction_wrapper(&sql).map_err(|msg| {
            MigrateError::Error(format!("Migration script {} {}", path.display(), msg))
        })?;

        if statement_words(&sql).is_empty() {
            return Err(MigrateError::Error(format!(
                "Migration script {} is empty",
                path.display()
            )));
        }

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script".to_owned());

        Ok(MigrationScript {
            name,
            sentinel,
            sql,
            columns: Vec::new(),
        })
    }

    /// The script as it would run, including the transaction boundary the
    /// applier adds.
    pub fn display_sql(&self) -> String {
        format!("BEGIN TRANSACTION;\n\n{}\n\nCOMMIT;\n", self.sql.trim())
    }
}

/// Uppercased words of a SQL fragment, ignoring `--` comments.
fn statement_words(fragment: &str) -> Vec<String> {
    fragment
        .lines()
        .map(|line| line.split("--").next().unwrap_or(""))
        .flat_map(str::split_whitespace)
        .map(str::to_ascii_uppercase)
        .collect()
}

fn is_begin(words: &[String]) -> bool {
    match words.split_first() {
        Some((first, rest)) if first == "BEGIN" => {
            rest.len() <= 2
                && rest
                    .iter()
                    .all(|w| matches!(w.as_str(), "DEFERRED" | "IMMEDIATE" | "EXCLUSIVE" | "TRANSACTION"))
        }
        _ => false,
    }
}

fn is_commit(words: &[String]) -> bool {
    match words.split_first() {
        Some((first, rest)) if first == "COMMIT" || first == "END" => {
            rest.len() <= 1 && rest.iter().all(|w| w == "TRANSACTION")
        }
        _ => false,
    }
}

/// Drops `--` comment lines at the end of `sql`.
fn trim_trailing_comments(mut sql: &str) -> &str {
    loop {
        let trimmed = sql.trim_end();
        let last_line_start = trimmed.rfind('\n').map(|i| i + 1).unwrap_or(0);
        if trimmed[last_line_start..].trim_start().starts_with("--") {
            sql = &trimmed[..last_line_start];
        } else {
            return trimmed;
        }
    }
}

/// Removes one outer `BEGIN ... COMMIT` pair so a script written for the
/// sqlite3 shell can run inside the applier's transaction. Scripts without
/// a leading BEGIN are returned unchanged.
fn strip_transaction_wrapper(sql: &str) -> Result<String, String> {
    let Some(first_end) = sql.find(';') else {
        return Ok(sql.to_owned());
    };
    if !is_begin(&statement_words(&sql[..first_end])) {
        return Ok(sql.to_owned());
    }

    let rest = trim_trailing_comments(&sql[first_end + 1..]);
    let rest = rest.strip_suffix(';').unwrap_or(rest);
    let (body, tail) = match rest.rfind(';') {
        Some(i) => (&rest[..=i], &rest[i + 1..]),
        None => ("", rest),
    };

    if !is_commit(&statement_words(tail)) {
        return Err("opens a transaction without a closing COMMIT".to_owned());
    }

    Ok(body.trim().to_owned())
}
