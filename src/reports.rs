use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Result of running the migration against one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    SkippedMissing,
    SkippedAlreadyApplied,
    Applied,
    /// The driver reported a duplicate column. Treated as applied.
    AppliedDuplicateColumn { detail: String },
    Failed { error: String },
}

impl TargetOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            TargetOutcome::Applied | TargetOutcome::AppliedDuplicateColumn { .. }
        )
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            TargetOutcome::SkippedMissing | TargetOutcome::SkippedAlreadyApplied
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TargetOutcome::Failed { .. })
    }

    pub fn full_name(&self) -> &'static str {
        match self {
            TargetOutcome::SkippedMissing => "Skipped (missing)",
            TargetOutcome::SkippedAlreadyApplied => "Skipped (already applied)",
            TargetOutcome::Applied => "Applied",
            TargetOutcome::AppliedDuplicateColumn { .. } => "Applied (duplicate column)",
            TargetOutcome::Failed { .. } => "Failed",
        }
    }
}

impl fmt::Display for TargetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

impl TargetReport {
    pub fn new(path: &Path, outcome: TargetOutcome) -> Self {
        TargetReport {
            path: path.to_path_buf(),
            outcome,
            backup: None,
        }
    }
}

/// Ordered per-target reports for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub script: String,
    pub targets: Vec<TargetReport>,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn new(script: &str, targets: Vec<TargetReport>) -> Self {
        let applied = targets.iter().filter(|t| t.outcome.is_applied()).count();
        let skipped = targets.iter().filter(|t| t.outcome.is_skipped()).count();
        let failed = targets.iter().filter(|t| t.outcome.is_failed()).count();

        RunSummary {
            script: script.to_owned(),
            targets,
            applied,
            skipped,
            failed,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    #[cfg(test)]
    pub fn outcomes(&self) -> Vec<&TargetOutcome> {
        self.targets.iter().map(|t| &t.outcome).collect()
    }
}

/// Receives progress while the applier walks the target list.
pub trait MigrationObserver {
    fn on_run_start(&mut self, _script: &str, _targets: &[PathBuf]) {}
    fn on_target_start(&mut self, _path: &Path) {}
    fn on_target_done(&mut self, _report: &TargetReport) {}
    fn on_run_done(&mut self, _summary: &RunSummary) {}
}

/// Discards all progress. Used for JSON output and in tests.
pub struct SilentObserver;

impl MigrationObserver for SilentObserver {}

/// Human-readable progress on stdout.
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn outcome_line(report: &TargetReport) -> String {
        match &report.outcome {
            TargetOutcome::SkippedMissing => format!(
                "Database file not found, skipping: {}",
                report.path.display()
            ),
            TargetOutcome::SkippedAlreadyApplied => {
                "Migration already applied, skipping this database".to_owned()
            }
            TargetOutcome::Applied => "Database migration executed successfully".to_owned(),
            TargetOutcome::AppliedDuplicateColumn { detail } => format!(
                "Column already exists, migration may have been applied ({})",
                detail
            ),
            TargetOutcome::Failed { error } => format!("Migration failed: {}", error),
        }
    }

    pub fn summary_line(summary: &RunSummary) -> String {
        format!(
            "Applied: {}, Skipped: {}, Failed: {} (of {} databases)",
            summary.applied,
            summary.skipped,
            summary.failed,
            summary.targets.len()
        )
    }
}

impl MigrationObserver for ConsoleReporter {
    fn on_run_start(&mut self, script: &str, targets: &[PathBuf]) {
        println!("=== Applying Database Migration ({}) ===", script);
        if targets.is_empty() {
            println!("No target databases configured");
        }
    }

    fn on_target_start(&mut self, path: &Path) {
        println!();
        println!("--- Processing database: {} ---", path.display());
    }

    fn on_target_done(&mut self, report: &TargetReport) {
        if let Some(backup) = &report.backup {
            println!("Backup created: {}", backup.display());
        }
        println!("{}", Self::outcome_line(report));
    }

    fn on_run_done(&mut self, summary: &RunSummary) {
        println!();
        println!("{}", Self::summary_line(summary));
        println!("=== Migration Complete ===");
    }
}
