//! Activity logger: typed events rendered to the line log by a dedicated thread.
//!
//! Architecture: a logger thread owns the [`LineWriter`]. Every other thread
//! sends [`ActivityEvent`]s through a bounded crossbeam channel, each stamped
//! with the time it was sent. Progress events use `try_send()` so the scan path
//! never blocks on them; dropped ones are counted and reported on the next line
//! written. Audit events (corruption, quarantine, repair, skips) wait for room
//! for up to [`AUDIT_SEND_TIMEOUT`] and are only dropped past that.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError, bounded};

use crate::core::errors::{GuardError, Result};
use crate::logger::line::{LineWriter, LineWriterConfig};
use crate::scanner::quarantine::QuarantineEntry;
use crate::scanner::repair::RepairOutcome;
use crate::scanner::scan::ScanTally;

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

/// How long an audit event may wait for channel room before it is dropped.
pub const AUDIT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

const BANNER_RULE: &str =
    "============================================================";

/// Everything the guardian reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    GuardianStarted {
        version: String,
        config_hash: String,
        watch_dirs: Vec<PathBuf>,
        interval_secs: u64,
        quarantine_dir: PathBuf,
    },
    GuardianStopped {
        reason: String,
        cycles: u64,
    },
    CycleStarted {
        cycle: u64,
    },
    ScanningTarget {
        path: PathBuf,
    },
    TargetMissing {
        path: PathBuf,
    },
    CorruptionDetected {
        path: PathBuf,
        code: String,
        reason: String,
    },
    /// Dry-run detection: nothing was touched.
    CorruptionReported {
        path: PathBuf,
        reason: String,
    },
    Quarantined(QuarantineEntry),
    QuarantineFailed {
        path: PathBuf,
        code: String,
        message: String,
    },
    RepairFinished {
        path: PathBuf,
        outcome: RepairOutcome,
    },
    FileSkipped {
        path: PathBuf,
        reason: String,
    },
    CycleCompleted {
        cycle: u64,
        tally: ScanTally,
    },
    NextScan {
        interval_secs: u64,
    },
    CycleFailed {
        cycle: u64,
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

impl ActivityEvent {
    /// Per-file outcomes that make up the audit trail.
    #[must_use]
    pub const fn is_audit(&self) -> bool {
        matches!(
            self,
            Self::CorruptionDetected { .. }
                | Self::CorruptionReported { .. }
                | Self::Quarantined(_)
                | Self::QuarantineFailed { .. }
                | Self::RepairFinished { .. }
                | Self::FileSkipped { .. }
        )
    }

    /// Log lines for this event, in order. Empty strings are blank log lines.
    pub fn render(&self) -> Vec<String> {
        match self {
            Self::GuardianStarted {
                version,
                config_hash,
                watch_dirs,
                interval_secs,
                quarantine_dir,
            } => {
                let dirs: Vec<String> = watch_dirs
                    .iter()
                    .map(|d| d.display().to_string())
                    .collect();
                vec![
                    BANNER_RULE.to_string(),
                    format!("  ENCODING GUARDIAN STARTED (v{version}, config {config_hash})"),
                    BANNER_RULE.to_string(),
                    format!("Watching directories: {}", dirs.join(", ")),
                    format!("Scan interval: {interval_secs}s"),
                    format!("Quarantine: {}", quarantine_dir.display()),
                    String::new(),
                ]
            }
            Self::GuardianStopped { reason, cycles } => {
                vec![format!("Guardian stopped ({reason}) after {cycles} scans")]
            }
            Self::CycleStarted { cycle } => vec![format!("--- Scan #{cycle} ---")],
            Self::ScanningTarget { path } => vec![format!("Scanning: {}", path.display())],
            Self::TargetMissing { path } => {
                vec![format!("Skipping missing directory: {}", path.display())]
            }
            Self::CorruptionDetected { path, code, reason } => vec![
                format!("CORRUPTION DETECTED: {}", path.display()),
                format!("   Reason: [{code}] {reason}"),
            ],
            Self::CorruptionReported { path, reason } => vec![
                format!("CORRUPTION (dry run): {}", path.display()),
                format!("   Reason: {reason}"),
            ],
            Self::Quarantined(entry) => vec![format!(
                "   QUARANTINED: {} -> {} ({} bytes, sha256 {})",
                entry.source.display(),
                entry.destination.display(),
                entry.bytes,
                entry.sha256
            )],
            Self::QuarantineFailed {
                path,
                code,
                message,
            } => vec![format!(
                "   QUARANTINE FAILED for {} [{code}]: {message}; repair skipped",
                path.display()
            )],
            Self::RepairFinished { path, outcome } => match outcome {
                RepairOutcome::Repaired {
                    encoding,
                    changed: true,
                } => vec![format!("   FIXED: {} (decoded as {encoding})", path.display())],
                RepairOutcome::Repaired {
                    encoding,
                    changed: false,
                } => vec![format!(
                    "   UNCHANGED: {} already valid as {encoding}",
                    path.display()
                )],
                RepairOutcome::Failed { reason } => {
                    vec![format!("   FAILED to fix {}: {reason}", path.display())]
                }
            },
            Self::FileSkipped { path, reason } => {
                vec![format!("   Skipped {}: {reason}", path.display())]
            }
            Self::CycleCompleted { tally, .. } => {
                let mut lines = if tally.issues_found > 0 {
                    vec![format!(
                        "Found and fixed {} corrupted files out of {} checked",
                        tally.issues_fixed, tally.files_checked
                    )]
                } else {
                    vec![format!(
                        "All {} files are valid UTF-8",
                        tally.files_checked
                    )]
                };
                let failures = tally.repair_failures + tally.quarantine_failures;
                if failures > 0 {
                    lines.push(format!("   {failures} corrupted files could not be fixed"));
                }
                lines
            }
            Self::NextScan { interval_secs } => {
                vec![format!("Next scan in {interval_secs}s..."), String::new()]
            }
            Self::CycleFailed {
                cycle,
                code,
                message,
            } => vec![format!("Error in scan #{cycle} [{code}]: {message}")],
            Self::Shutdown => Vec::new(),
        }
    }
}

/// An event and the moment it was sent.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub at: DateTime<Local>,
    pub event: ActivityEvent,
}

impl LogRecord {
    fn now(event: ActivityEvent) -> Self {
        Self {
            at: Local::now(),
            event,
        }
    }
}

/// Thread-safe, cheaply-cloneable handle for sending log events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<LogRecord>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Handle whose events go nowhere.
    pub fn detached() -> Self {
        let (handle, rx) = Self::capture(1);
        drop(rx);
        handle
    }

    /// Handle plus the receiving end, for callers that consume events directly.
    pub fn capture(capacity: usize) -> (Self, Receiver<LogRecord>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Send an event.
    ///
    /// Progress events never block and are dropped on a full channel. Audit
    /// events wait up to [`AUDIT_SEND_TIMEOUT`] for room.
    pub fn send(&self, event: ActivityEvent) {
        let audit = event.is_audit();
        let record = LogRecord::now(event);
        // Disconnected is fine during shutdown.
        let full = if audit {
            matches!(
                self.tx.send_timeout(record, AUDIT_SEND_TIMEOUT),
                Err(SendTimeoutError::Timeout(_))
            )
        } else {
            matches!(self.tx.try_send(record), Err(TrySendError::Full(_)))
        };
        if full {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only if the queue is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(LogRecord::now(ActivityEvent::Shutdown));
    }
}

pub struct ActivityLoggerConfig {
    pub line: LineWriterConfig,
    pub channel_capacity: usize,
}

impl ActivityLoggerConfig {
    pub fn new(path: PathBuf, mirror_stdout: bool) -> Self {
        Self {
            line: LineWriterConfig {
                path,
                mirror_stdout,
            },
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread and return a handle.
///
/// The thread runs until `handle.shutdown()` or until every handle is dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (handle, rx) = ActivityLoggerHandle::capture(config.channel_capacity);
    let dropped = Arc::clone(&handle.dropped_events);

    let join = thread::Builder::new()
        .name("encg-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.line, &dropped))
        .map_err(|e| GuardError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<LogRecord>, line: LineWriterConfig, dropped: &AtomicU64) {
    let mut writer = LineWriter::open(line);

    while let Ok(LogRecord { at, event }) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            writer.write_message(
                Local::now(),
                &format!("[ENCG-LOG] {d} log events dropped due to back-pressure"),
            );
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        writer.try_recover();
        for message in event.render() {
            writer.write_message(at, &message);
        }
    }

    writer.flush();
    if writer.state() != "normal" {
        eprintln!("[ENCG-LOG] logger stopped in {} mode", writer.state());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::codecs::{DecodedWith, Encoding};

    fn test_config(dir: &std::path::Path) -> ActivityLoggerConfig {
        ActivityLoggerConfig {
            line: LineWriterConfig {
                path: dir.join("guardian.log"),
                mirror_stdout: false,
            },
            channel_capacity: 64,
        }
    }

    fn tally(checked: u64, found: u64, fixed: u64) -> ScanTally {
        ScanTally {
            files_checked: checked,
            issues_found: found,
            issues_fixed: fixed,
            ..ScanTally::default()
        }
    }

    #[test]
    fn cycle_summary_wording() {
        let clean = ActivityEvent::CycleCompleted {
            cycle: 1,
            tally: tally(12, 0, 0),
        };
        assert_eq!(clean.render(), vec!["All 12 files are valid UTF-8"]);

        let dirty = ActivityEvent::CycleCompleted {
            cycle: 2,
            tally: tally(12, 2, 2),
        };
        assert_eq!(
            dirty.render(),
            vec!["Found and fixed 2 corrupted files out of 12 checked"]
        );
    }

    #[test]
    fn partial_fix_mentions_failures() {
        let mut t = tally(5, 2, 1);
        t.quarantine_failures = 1;
        let lines = ActivityEvent::CycleCompleted { cycle: 3, tally: t }.render();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("1 corrupted files could not be fixed"));
    }

    #[test]
    fn repair_lines_name_the_encoding() {
        let lines = ActivityEvent::RepairFinished {
            path: PathBuf::from("/r/a.txt"),
            outcome: RepairOutcome::Repaired {
                encoding: DecodedWith::Strict(Encoding::Windows1252),
                changed: true,
            },
        }
        .render();
        assert_eq!(lines, vec!["   FIXED: /r/a.txt (decoded as windows-1252)"]);
    }

    #[test]
    fn spawn_write_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        handle.send(ActivityEvent::CycleStarted { cycle: 7 });
        handle.send(ActivityEvent::NextScan { interval_secs: 30 });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("guardian.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] --- Scan #7 ---"));
        assert!(lines[1].ends_with("] Next scan in 30s..."));
    }

    #[test]
    fn handles_are_cloneable_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path())).unwrap();
        let h2 = handle.clone();
        std::thread::spawn(move || {
            h2.send(ActivityEvent::ScanningTarget {
                path: PathBuf::from("/srv/repos"),
            });
        })
        .join()
        .unwrap();
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("guardian.log")).unwrap();
        assert!(contents.contains("Scanning: /srv/repos"));
    }

    #[test]
    fn full_channel_drops_progress_events() {
        let (handle, rx) = ActivityLoggerHandle::capture(1);
        handle.send(ActivityEvent::CycleStarted { cycle: 1 });
        handle.send(ActivityEvent::CycleStarted { cycle: 2 });
        assert_eq!(handle.dropped_events(), 1);
        assert_eq!(rx.try_recv().unwrap().event, ActivityEvent::CycleStarted { cycle: 1 });
    }

    fn skipped(i: usize) -> ActivityEvent {
        ActivityEvent::FileSkipped {
            path: PathBuf::from(format!("/r/{i}.txt")),
            reason: "cannot read".to_string(),
        }
    }

    #[test]
    fn audit_events_wait_for_a_slow_consumer() {
        let (handle, rx) = ActivityLoggerHandle::capture(2);
        let consumer = std::thread::spawn(move || {
            let mut seen = Vec::new();
            while let Ok(record) = rx.recv() {
                std::thread::sleep(Duration::from_millis(2));
                seen.push(record.event);
            }
            seen
        });

        for i in 0..20 {
            handle.send(skipped(i));
        }
        let dropped = handle.dropped_events();
        drop(handle);

        let seen = consumer.join().unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(seen, (0..20).map(skipped).collect::<Vec<_>>());
    }

    #[test]
    fn records_are_stamped_when_sent() {
        let (handle, rx) = ActivityLoggerHandle::capture(4);
        let before = Local::now();
        handle.send(ActivityEvent::CycleStarted { cycle: 1 });
        let after = Local::now();
        std::thread::sleep(Duration::from_millis(20));

        let record = rx.try_recv().unwrap();
        assert!(before <= record.at && record.at <= after);
        assert!(ActivityEvent::FileSkipped {
            path: PathBuf::new(),
            reason: String::new(),
        }
        .is_audit());
        assert!(!record.event.is_audit());
    }

    #[test]
    fn detached_handle_swallows_events() {
        let handle = ActivityLoggerHandle::detached();
        handle.send(ActivityEvent::CycleStarted { cycle: 1 });
        handle.shutdown();
        assert_eq!(handle.dropped_events(), 0);
    }
}
