use std::path::Path;

use rusqlite::{Connection, ErrorCode, OpenFlags};

use crate::error::MigrateError;

const DUPLICATE_COLUMN_PREFIX: &str = "duplicate column name";

/// Opens an existing database for writing. Never creates the file.
pub fn open_existing(db_path: &Path) -> Result<Connection, MigrateError> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

/// Opens an existing database without write access.
pub fn open_read_only(db_path: &Path) -> Result<Connection, MigrateError> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(conn)
}

/// Column names of `table` in declaration order. Empty if the table does
/// not exist.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, MigrateError> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}

/// SQLite compares identifiers case-insensitively, so do we.
pub fn has_column(columns: &[String], column: &str) -> bool {
    columns.iter().any(|c| c.eq_ignore_ascii_case(column))
}

/// True when `err` is SQLite rejecting an `ADD COLUMN` for a column that
/// already exists.
///
/// SQLite reports this as a generic `SQLITE_ERROR` with no dedicated
/// extended code. The code is checked first and the message prefix second;
/// the prefix match is the only way to tell this case apart.
pub fn is_duplicate_column_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(sqlite_err, Some(msg)) => {
            sqlite_err.code == ErrorCode::Unknown && msg.starts_with(DUPLICATE_COLUMN_PREFIX)
        }
        _ => false,
    }
}
