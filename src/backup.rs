use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::info;
use rusqlite::Connection;

use crate::error::MigrateError;

const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `<path>.backup_<YYYYMMDD_HHMMSS>` next to the original file.
pub fn backup_path(db_path: &Path, at: DateTime<Local>) -> PathBuf {
    let mut name = OsString::from(db_path.as_os_str());
    name.push(format!(".backup_{}", at.format(BACKUP_TIMESTAMP_FORMAT)));
    PathBuf::from(name)
}

/// Writes a consistent snapshot of the database `conn` has open, including
/// anything still sitting in its WAL. Refuses to overwrite an existing
/// backup.
///
/// Must run outside a transaction.
pub fn create_backup(conn: &Connection, db_path: &Path) -> Result<PathBuf, MigrateError> {
    let target = backup_path(db_path, Local::now());
    backup_to(conn, &target)?;
    Ok(target)
}

fn backup_to(conn: &Connection, target: &Path) -> Result<(), MigrateError> {
    if target.exists() {
        return Err(MigrateError::Error(format!(
            "Backup file already exists: {}",
            target.display()
        )));
    }

    let target_str = target.to_str().ok_or_else(|| {
        MigrateError::Error(format!(
            "Backup path is not valid UTF-8: {}",
            target.display()
        ))
    })?;

    conn.execute("VACUUM INTO ?1", [target_str])?;
    info!("Backed up database to {}", target.display());

    Ok(())
}
