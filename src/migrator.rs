use std::path::{Path, PathBuf};

use log::{debug, error, info, warn, Level};
use logging_timer::timer;
use rusqlite::TransactionBehavior;

use crate::backup;
use crate::database;
use crate::error::MigrateError;
use crate::reports::{MigrationObserver, RunSummary, TargetOutcome, TargetReport};
use crate::schema::MigrationScript;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Copy each database aside before its transaction starts.
    pub backup: bool,
}

/// Applies `script` to every target in order.
///
/// Each target is handled independently: a missing file, an
/// already-migrated schema, or a failure on one target never stops the
/// remaining targets from being processed.
pub fn apply(
    targets: &[PathBuf],
    script: &MigrationScript,
    options: ApplyOptions,
    observer: &mut dyn MigrationObserver,
) -> RunSummary {
    info!(
        "Applying migration '{}' to {} database(s)",
        script.name,
        targets.len()
    );
    observer.on_run_start(&script.name, targets);

    let mut reports = Vec::with_capacity(targets.len());
    for path in targets {
        observer.on_target_start(path);
        let report = apply_target(path, script, options);
        observer.on_target_done(&report);
        reports.push(report);
    }

    let summary = RunSummary::new(&script.name, reports);
    info!(
        "Migration '{}' complete: applied={} skipped={} failed={}",
        summary.script, summary.applied, summary.skipped, summary.failed
    );
    observer.on_run_done(&summary);

    summary
}

/// Runs the existence check, idempotency check and transactional apply for
/// a single database file.
pub fn apply_target(path: &Path, script: &MigrationScript, options: ApplyOptions) -> TargetReport {
    let _tmr = timer!(Level::Trace; "apply_target", "{}", path.display());

    if !path.is_file() {
        info!("Database not found, skipping: {}", path.display());
        return TargetReport::new(path, TargetOutcome::SkippedMissing);
    }

    let mut backup_path = None;
    let outcome = match migrate_existing(path, script, options, &mut backup_path) {
        Ok(outcome) => outcome,
        Err(MigrateError::DatabaseError(e)) if database::is_duplicate_column_error(&e) => {
            warn!(
                "{}: column already exists, treating migration as applied: {}",
                path.display(),
                e
            );
            TargetOutcome::AppliedDuplicateColumn {
                detail: e.to_string(),
            }
        }
        Err(MigrateError::DatabaseError(e)) => {
            error!("{}: migration failed: {}", path.display(), e);
            TargetOutcome::Failed {
                error: e.to_string(),
            }
        }
        Err(e) => {
            error!("{}: unexpected error: {}", path.display(), e);
            TargetOutcome::Failed {
                error: format!("Unexpected error: {}", e),
            }
        }
    };

    TargetReport {
        path: path.to_path_buf(),
        outcome,
        backup: backup_path,
    }
}

/// The connection lives only for the duration of this call, so it is
/// closed on every return path.
fn migrate_existing(
    path: &Path,
    script: &MigrationScript,
    options: ApplyOptions,
    backup_path: &mut Option<PathBuf>,
) -> Result<TargetOutcome, MigrateError> {
    let mut conn = database::open_existing(path)?;

    let columns = database::table_columns(&conn, &script.sentinel.table)?;
    if database::has_column(&columns, &script.sentinel.column) {
        info!(
            "{}: {}.{} present, migration already applied",
            path.display(),
            script.sentinel.table,
            script.sentinel.column
        );
        return Ok(TargetOutcome::SkippedAlreadyApplied);
    }

    if options.backup {
        *backup_path = Some(backup::create_backup(&conn, path)?);
    }

    debug!("{}: applying migration '{}'", path.display(), script.name);

    // Immediate: take the write lock up front rather than on the first ALTER
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(&script.sql)?;
    tx.commit()?;

    info!("{}: migration '{}' applied", path.display(), script.name);
    Ok(TargetOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::SilentObserver;
    use crate::schema::{ColumnAddition, Sentinel};
    use pretty_assertions::assert_eq;
    use rusqlite::Connection;
    use std::fs;

    fn create_db(path: &Path, sql: &str) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(sql).unwrap();
    }

    fn base_schema(path: &Path) {
        create_db(
            path,
            "CREATE TABLE Questions (Id INTEGER PRIMARY KEY);
             CREATE TABLE AnswerRecords (Id INTEGER PRIMARY KEY);
             INSERT INTO Questions (Id) VALUES (1), (2);
             INSERT INTO AnswerRecords (Id) VALUES (10);",
        );
    }

    fn columns_of(path: &Path, table: &str) -> Vec<String> {
        let conn = Connection::open(path).unwrap();
        database::table_columns(&conn, table).unwrap()
    }

    fn run(targets: &[PathBuf], options: ApplyOptions) -> RunSummary {
        apply(targets, &MigrationScript::map_drawing(), options, &mut SilentObserver)
    }

    #[test]
    fn test_applies_all_columns_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.db");
        base_schema(&a);

        let summary = run(&[a.clone()], ApplyOptions::default());
        assert_eq!(summary.outcomes(), vec![&TargetOutcome::Applied]);

        let questions = columns_of(&a, "Questions");
        assert_eq!(
            questions,
            vec![
                "Id",
                "MapDrawingConfigJson",
                "GuidanceOverlaysJson",
                "ReferenceOverlaysJson",
                "ReviewRubricJson",
                "TimeLimitSeconds",
                "ShowBuildingLayersJson",
            ]
        );
        let answers = columns_of(&a, "AnswerRecords");
        assert_eq!(
            answers,
            vec!["Id", "DrawDurationSeconds", "ClientInfoJson", "RubricScoresJson"]
        );

        let conn = Connection::open(&a).unwrap();
        let limits: Vec<i64> = conn
            .prepare("SELECT TimeLimitSeconds FROM Questions ORDER BY Id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(limits, vec![0, 0]);

        let (duration, client): (i64, Option<String>) = conn
            .query_row(
                "SELECT DrawDurationSeconds, ClientInfoJson FROM AnswerRecords WHERE Id = 10",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(duration, 0);
        assert_eq!(client, None);
    }

    #[test]
    fn test_missing_target_is_skipped_and_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("b.db");

        let summary = run(&[b.clone()], ApplyOptions { backup: true });
        assert_eq!(summary.outcomes(), vec![&TargetOutcome::SkippedMissing]);
        assert_eq!(summary.targets[0].backup, None);
        assert!(!b.exists());
    }

    #[test]
    fn test_directory_target_is_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let report = apply_target(
            dir.path(),
            &MigrationScript::map_drawing(),
            ApplyOptions::default(),
        );
        assert_eq!(report.outcome, TargetOutcome::SkippedMissing);
    }

    #[test]
    fn test_sentinel_present_skips_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let c = dir.path().join("c.db");
        create_db(
            &c,
            "CREATE TABLE Questions (Id INTEGER PRIMARY KEY, MapDrawingConfigJson TEXT);
             CREATE TABLE AnswerRecords (Id INTEGER PRIMARY KEY);",
        );
        let before = fs::read(&c).unwrap();

        // A second writer holding the reserved lock would block any write attempt
        let locker = Connection::open(&c).unwrap();
        locker.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let summary = run(&[c.clone()], ApplyOptions { backup: true });
        assert_eq!(summary.outcomes(), vec![&TargetOutcome::SkippedAlreadyApplied]);
        assert_eq!(summary.targets[0].backup, None);

        locker.execute_batch("ROLLBACK;").unwrap();
        drop(locker);

        assert_eq!(fs::read(&c).unwrap(), before);
        assert_eq!(columns_of(&c, "AnswerRecords"), vec!["Id"]);
    }

    #[test]
    fn test_second_run_reports_already_applied() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.db");
        let nested = dir.path().join("ExamSystem.WPF");
        fs::create_dir(&nested).unwrap();
        let wpf = nested.join("exam_system.db");
        let missing = dir.path().join("missing.db");
        base_schema(&a);
        base_schema(&wpf);
        let targets = vec![a, missing, wpf];

        let first = run(&targets, ApplyOptions::default());
        assert_eq!(
            first.outcomes(),
            vec![
                &TargetOutcome::Applied,
                &TargetOutcome::SkippedMissing,
                &TargetOutcome::Applied
            ]
        );

        let second = run(&targets, ApplyOptions::default());
        assert_eq!(
            second.outcomes(),
            vec![
                &TargetOutcome::SkippedAlreadyApplied,
                &TargetOutcome::SkippedMissing,
                &TargetOutcome::SkippedAlreadyApplied
            ]
        );
        assert!(!second.has_failures());
    }

    #[test]
    fn test_missing_base_tables_fail_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.db");
        create_db(&empty, "CREATE TABLE Unrelated (Id INTEGER PRIMARY KEY);");
        let half = dir.path().join("half.db");
        create_db(&half, "CREATE TABLE Questions (Id INTEGER PRIMARY KEY);");

        let summary = run(&[empty.clone(), half.clone()], ApplyOptions::default());
        assert_eq!(summary.failed, 2);

        match &summary.targets[0].outcome {
            TargetOutcome::Failed { error } => assert!(error.contains("no such table")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        match &summary.targets[1].outcome {
            TargetOutcome::Failed { error } => assert!(error.contains("AnswerRecords")),
            other => panic!("unexpected outcome: {:?}", other),
        }

        // The Questions ALTERs ran before the failure and must have rolled back
        assert_eq!(columns_of(&half, "Questions"), vec!["Id"]);
        assert!(columns_of(&empty, "Questions").is_empty());
    }

    #[test]
    fn test_failure_does_not_stop_later_targets() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.db");
        fs::write(&bad, b"this is not a sqlite database, just some bytes padded out").unwrap();
        let good = dir.path().join("good.db");
        base_schema(&good);

        let summary = run(&[bad, good.clone()], ApplyOptions::default());
        assert!(summary.targets[0].outcome.is_failed());
        assert_eq!(summary.targets[1].outcome, TargetOutcome::Applied);
        assert!(database::has_column(
            &columns_of(&good, "Questions"),
            "MapDrawingConfigJson"
        ));
    }

    #[test]
    fn test_duplicate_column_is_soft_success() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("partial.db");
        create_db(
            &partial,
            "CREATE TABLE Questions (Id INTEGER PRIMARY KEY);
             CREATE TABLE AnswerRecords (Id INTEGER PRIMARY KEY, ClientInfoJson TEXT);",
        );

        let summary = run(&[partial.clone()], ApplyOptions::default());
        match &summary.targets[0].outcome {
            TargetOutcome::AppliedDuplicateColumn { detail } => {
                assert!(detail.contains("duplicate column name"));
                assert!(detail.contains("ClientInfoJson"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!summary.has_failures());
        assert_eq!(summary.applied, 1);

        // The transaction still rolled back; no partial re-application
        assert_eq!(columns_of(&partial, "Questions"), vec!["Id"]);
    }

    #[test]
    fn test_backup_taken_before_apply() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.db");
        base_schema(&a);

        let report = apply_target(
            &a,
            &MigrationScript::map_drawing(),
            ApplyOptions { backup: true },
        );
        assert_eq!(report.outcome, TargetOutcome::Applied);

        let backup = report.backup.expect("backup path recorded");
        assert!(backup.exists());
        assert_eq!(columns_of(&backup, "Questions"), vec!["Id"]);
        assert!(database::has_column(
            &columns_of(&a, "Questions"),
            "MapDrawingConfigJson"
        ));
    }

    #[test]
    fn test_backup_sees_rows_held_in_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("live.db");

        // Another process keeps the database open in WAL mode
        let app = Connection::open(&db).unwrap();
        let mode: String = app
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        app.execute_batch(
            "CREATE TABLE Questions (Id INTEGER PRIMARY KEY);
             CREATE TABLE AnswerRecords (Id INTEGER PRIMARY KEY);
             INSERT INTO Questions (Id) VALUES (1), (2), (3);",
        )
        .unwrap();

        let report = apply_target(
            &db,
            &MigrationScript::map_drawing(),
            ApplyOptions { backup: true },
        );
        assert_eq!(report.outcome, TargetOutcome::Applied);

        let backup = report.backup.expect("backup path recorded");
        assert_eq!(columns_of(&backup, "Questions"), vec!["Id"]);
        let rows: i64 = Connection::open(&backup)
            .unwrap()
            .query_row("SELECT count(*) FROM Questions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 3);

        drop(app);
    }

    #[test]
    fn test_backup_failure_is_contained_to_its_target() {
        let dir = tempfile::tempdir().unwrap();
        let blocked_dir = dir.path().join("blocked");
        let ok_dir = dir.path().join("ok");
        fs::create_dir(&blocked_dir).unwrap();
        fs::create_dir(&ok_dir).unwrap();
        let blocked = blocked_dir.join("exam_system.db");
        let ok = ok_dir.join("exam_system.db");
        base_schema(&blocked);
        base_schema(&ok);

        // Occupy every backup name the next few seconds could produce
        let now = chrono::Local::now();
        for secs in 0..10 {
            let taken = backup::backup_path(&blocked, now + chrono::Duration::seconds(secs));
            fs::write(taken, b"occupied").unwrap();
        }

        let summary = run(&[blocked.clone(), ok.clone()], ApplyOptions { backup: true });

        match &summary.targets[0].outcome {
            TargetOutcome::Failed { error } => {
                assert!(error.starts_with("Unexpected error"), "{}", error);
                assert!(error.contains("Backup file already exists"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(summary.targets[0].backup, None);
        assert_eq!(columns_of(&blocked, "Questions"), vec!["Id"]);
        assert_eq!(columns_of(&blocked, "AnswerRecords"), vec!["Id"]);

        assert_eq!(summary.targets[1].outcome, TargetOutcome::Applied);
        assert!(summary.targets[1].backup.is_some());
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_custom_script_and_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("custom.db");
        create_db(&db, "CREATE TABLE Items (Id INTEGER PRIMARY KEY);");

        let script = MigrationScript::from_columns(
            "notes",
            Sentinel::new("Items", "Notes"),
            &[ColumnAddition {
                table: "Items",
                column: "Notes",
                definition: "TEXT",
            }],
        );

        let first = apply_target(&db, &script, ApplyOptions::default());
        assert_eq!(first.outcome, TargetOutcome::Applied);
        let second = apply_target(&db, &script, ApplyOptions::default());
        assert_eq!(second.outcome, TargetOutcome::SkippedAlreadyApplied);
    }

    #[test]
    fn test_script_with_own_transaction_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tx.db");
        base_schema(&db);

        let mut script = MigrationScript::map_drawing();
        script.sql = format!("BEGIN TRANSACTION;\n{}\nCOMMIT;", script.sql);

        let report = apply_target(&db, &script, ApplyOptions::default());
        assert!(report.outcome.is_failed());
        assert_eq!(columns_of(&db, "Questions"), vec!["Id"]);
    }
}
