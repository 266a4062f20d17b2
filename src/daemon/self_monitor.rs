//! Guardian self-reporting: the `state.json` snapshot read by `encg status`.
//!
//! Written atomically after every cycle (`.tmp` then rename), so a reader
//! never observes a half-written document.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::core::errors::{GuardError, Result};
use crate::daemon::clock::SharedClock;
use crate::scanner::scan::ScanTally;

/// Slack added on top of one scan interval before a snapshot counts as stale.
pub const STATE_STALE_GRACE_SECS: u64 = 90;

/// Loop phase as recorded in the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardianPhase {
    #[default]
    Starting,
    Scanning,
    Sleeping,
    Stopped,
}

/// Outcome of one guardian cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleSummary {
    pub cycle: u64,
    pub tally: ScanTally,
    pub targets_scanned: Vec<PathBuf>,
    pub targets_missing: Vec<PathBuf>,
    pub duration_ms: u64,
    /// Set when the cycle aborted; the tally then covers what finished.
    pub error: Option<String>,
}

/// Top-level state written to `state.json`.
///
/// Every field defaults so an older or newer guardian's snapshot still parses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianState {
    pub version: String,
    pub pid: u32,
    pub started_at: Option<DateTime<Local>>,
    pub last_updated: Option<DateTime<Local>>,
    pub phase: GuardianPhase,
    pub scan_interval_secs: u64,
    pub cycles: u64,
    pub last_cycle: Option<CycleSummary>,
    pub totals: ScanTally,
    pub cycle_errors: u64,
    /// Log events dropped due to channel back-pressure.
    pub dropped_log_events: u64,
}

impl GuardianState {
    /// Whether the writer appears to have stopped updating.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Local>) -> bool {
        if self.phase == GuardianPhase::Stopped {
            return false;
        }
        let Some(updated) = self.last_updated else {
            return true;
        };
        let budget = self.scan_interval_secs.saturating_add(STATE_STALE_GRACE_SECS);
        now.signed_duration_since(updated)
            .to_std()
            .is_ok_and(|age| age > Duration::from_secs(budget))
    }
}

pub struct SelfMonitor {
    state_file_path: PathBuf,
    clock: SharedClock,
    state: GuardianState,
}

impl SelfMonitor {
    pub fn new(state_file_path: PathBuf, clock: SharedClock, scan_interval_secs: u64) -> Self {
        let state = GuardianState {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            started_at: Some(clock.now()),
            scan_interval_secs,
            ..GuardianState::default()
        };
        Self {
            state_file_path,
            clock,
            state,
        }
    }

    pub fn state(&self) -> &GuardianState {
        &self.state
    }

    /// Fold a finished cycle into the cumulative counters.
    pub fn record_cycle(&mut self, summary: CycleSummary) {
        self.state.cycles = self.state.cycles.max(summary.cycle);
        self.state.totals += summary.tally;
        if summary.error.is_some() {
            self.state.cycle_errors += 1;
        }
        self.state.last_cycle = Some(summary);
    }

    /// Record the phase and persist. Failures are reported, never fatal.
    pub fn write(&mut self, phase: GuardianPhase, dropped_log_events: u64) {
        self.state.phase = phase;
        self.state.dropped_log_events = dropped_log_events;
        self.state.last_updated = Some(self.clock.now());
        if let Err(e) = write_state_atomic(&self.state_file_path, &self.state) {
            eprintln!(
                "[ENCG-SELFMON] failed to write state file {}: {e}",
                self.state_file_path.display()
            );
        }
    }

    /// Read the state file (for `encg status`).
    pub fn read_state(path: &Path) -> Result<GuardianState> {
        let raw = fs::read_to_string(path).map_err(|source| GuardError::io(path, source))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Write state.json atomically: write to .tmp, then rename.
fn write_state_atomic(path: &Path, state: &GuardianState) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(state).map_err(std::io::Error::other)?;

    let result = (|| {
        {
            use std::io::Write;
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
