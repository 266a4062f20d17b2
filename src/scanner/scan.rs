//! Directory scanner: filter → validate → quarantine → repair → tally.
//!
//! Files stream in from the walker pool but are processed one at a time on the
//! calling thread, so quarantine-then-repair for a file is strictly ordered and
//! the tally needs no synchronisation.

#![allow(missing_docs)]

use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::config::{Config, ScannerConfig};
use crate::core::errors::Result;
use crate::core::paths::{has_watched_extension, resolve_absolute_path};
use crate::encoding::validator::{FileCheck, ValidationMode, validate_file};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::scanner::quarantine::QuarantineStore;
use crate::scanner::repair::{RepairEngine, RepairOutcome};
use crate::scanner::walker::{DirectoryWalker, WalkEntry, WalkerConfig};

/// Counters for one scan or one whole cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanTally {
    /// Every extension-matched file, including skipped ones.
    pub files_checked: u64,
    pub issues_found: u64,
    pub issues_fixed: u64,
    pub repair_failures: u64,
    pub quarantine_failures: u64,
    pub skipped_oversize: u64,
    pub skipped_unreadable: u64,
}

impl AddAssign for ScanTally {
    fn add_assign(&mut self, rhs: Self) {
        self.files_checked += rhs.files_checked;
        self.issues_found += rhs.issues_found;
        self.issues_fixed += rhs.issues_fixed;
        self.repair_failures += rhs.repair_failures;
        self.quarantine_failures += rhs.quarantine_failures;
        self.skipped_oversize += rhs.skipped_oversize;
        self.skipped_unreadable += rhs.skipped_unreadable;
    }
}

pub struct Scanner {
    settings: ScannerConfig,
    quarantine: QuarantineStore,
    repair: RepairEngine,
    logger: ActivityLoggerHandle,
    stop: Arc<AtomicBool>,
    dry_run: bool,
}

impl Scanner {
    pub fn new(
        config: &Config,
        quarantine: QuarantineStore,
        repair: RepairEngine,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            settings: config.scanner.clone(),
            quarantine,
            repair,
            logger,
            stop: Arc::new(AtomicBool::new(false)),
            dry_run: false,
        }
    }

    /// Observe `flag` between files; once set, the scan returns what it has.
    #[must_use]
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = flag;
        self
    }

    /// Report corruption without quarantining or repairing anything.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Scan one watch root recursively.
    ///
    /// Per-file problems are tallied and logged, never returned. An error here
    /// means the root itself could not be opened for walking.
    pub fn scan(&self, root: &Path) -> Result<ScanTally> {
        let entries = self.walker(root).stream()?;
        let tally = self.process_entries(&entries);
        // Dropping the receiver winds down any workers still listing.
        drop(entries);
        Ok(tally)
    }

    fn walker(&self, root: &Path) -> DirectoryWalker {
        DirectoryWalker::new(WalkerConfig::from_scanner(
            &self.settings,
            vec![resolve_absolute_path(root)],
            self.quarantine.dir(),
        ))
    }

    /// Entries may be stale by the time they are processed; a file that is
    /// gone by then counts as unreadable.
    fn process_entries(&self, entries: impl IntoIterator<Item = WalkEntry>) -> ScanTally {
        let mut tally = ScanTally::default();
        for entry in entries {
            if self.should_stop() {
                break;
            }
            if !has_watched_extension(&entry.path, &self.settings.extensions) {
                continue;
            }
            self.process_file(&entry.path, &mut tally);
        }
        tally
    }

    fn process_file(&self, path: &Path, tally: &mut ScanTally) {
        tally.files_checked += 1;

        let record = match validate_file(
            path,
            self.settings.max_file_size_bytes,
            ValidationMode::DecodeOnly,
        ) {
            FileCheck::Checked(record) => record,
            FileCheck::Oversize(_) => {
                tally.skipped_oversize += 1;
                return;
            }
            FileCheck::Unreadable(err) => {
                tally.skipped_unreadable += 1;
                self.logger.send(ActivityEvent::FileSkipped {
                    path: path.to_path_buf(),
                    reason: format!("cannot read: {err}"),
                });
                return;
            }
        };

        let Some(error) = record.to_error() else {
            return;
        };
        tally.issues_found += 1;

        if self.dry_run {
            self.logger.send(ActivityEvent::CorruptionReported {
                path: record.path,
                reason: record.verdict.reason().unwrap_or_default().to_string(),
            });
            return;
        }

        self.logger.send(ActivityEvent::CorruptionDetected {
            path: record.path.clone(),
            code: error.code().to_string(),
            reason: record.verdict.reason().unwrap_or_default().to_string(),
        });

        // A file is only ever rewritten once its copy is safely stored.
        match self.quarantine.quarantine(path) {
            Ok(entry) => self.logger.send(ActivityEvent::Quarantined(entry)),
            Err(err) => {
                tally.quarantine_failures += 1;
                self.logger.send(ActivityEvent::QuarantineFailed {
                    path: path.to_path_buf(),
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                return;
            }
        }

        let outcome = self.repair.repair(path);
        match &outcome {
            RepairOutcome::Repaired { .. } => tally.issues_fixed += 1,
            RepairOutcome::Failed { .. } => tally.repair_failures += 1,
        }
        self.logger.send(ActivityEvent::RepairFinished {
            path: path.to_path_buf(),
            outcome,
        });
    }
}

/// Watch roots that currently exist, and those that do not.
pub fn partition_targets(targets: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    targets.iter().cloned().partition(|t| t.is_dir())
}
