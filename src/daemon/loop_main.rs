//! Guardian loop: scan every watch root, report, sleep, repeat until stopped.
//!
//! States: `Starting → Scanning → Sleeping → Scanning …`, and `→ Stopped` once
//! a stop is observed. A stop is checked before each cycle, between files
//! (the scanner shares the stop flag), and throughout the sleep. A SIGUSR1
//! scan request cuts the sleep short.
//!
//! A cycle never takes the loop down: errors and panics inside it are logged
//! as `ScanCycle` failures and the next cycle runs on schedule.

#![allow(missing_docs)]

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::errors::{GuardError, Result};
use crate::daemon::clock::{SharedClock, SystemClock};
use crate::daemon::self_monitor::{CycleSummary, GuardianPhase, SelfMonitor};
use crate::daemon::signals::SignalHandler;
use crate::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use crate::scanner::quarantine::QuarantineStore;
use crate::scanner::repair::RepairEngine;
use crate::scanner::scan::{ScanTally, Scanner, partition_targets};

/// Arguments for `encg guard`.
#[derive(Debug, Clone, Default)]
pub struct GuardianArgs {
    /// Stop after this many cycles. `None` runs until signalled.
    pub max_cycles: Option<u64>,
}

/// Scans one watch root. [`Scanner`] in production.
pub trait RootScanner: Send {
    fn scan(&self, root: &Path) -> Result<ScanTally>;
}

impl RootScanner for Scanner {
    fn scan(&self, root: &Path) -> Result<ScanTally> {
        Self::scan(self, root)
    }
}

/// The guardian: owns the scanner, the logger thread and the state snapshot.
pub struct Guardian {
    config: Config,
    scanner: Box<dyn RootScanner>,
    clock: SharedClock,
    signals: SignalHandler,
    logger: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    self_monitor: SelfMonitor,
    phase: GuardianPhase,
    cycle: u64,
    max_cycles: Option<u64>,
}

impl Guardian {
    /// Production wiring: system clock, OS signal hooks, logger thread.
    pub fn init(config: Config, args: &GuardianArgs) -> Result<Self> {
        config.ensure_directories()?;
        let (logger, logger_join) = spawn_logger(ActivityLoggerConfig::new(
            config.paths.log_file.clone(),
            config.guardian.mirror_stdout,
        ))?;
        let mut guardian = Self::with_parts(
            config,
            SystemClock::shared(),
            SignalHandler::new(),
            logger,
            args,
        )?;
        guardian.logger_join = Some(logger_join);
        Ok(guardian)
    }

    /// Assemble from explicit collaborators.
    pub fn with_parts(
        config: Config,
        clock: SharedClock,
        signals: SignalHandler,
        logger: ActivityLoggerHandle,
        args: &GuardianArgs,
    ) -> Result<Self> {
        let quarantine =
            QuarantineStore::new(config.paths.quarantine_dir.clone(), Arc::clone(&clock));
        let repair = RepairEngine::new(config.encoding_table()?);
        let scanner = Scanner::new(&config, quarantine, repair, logger.clone())
            .with_stop_flag(signals.shutdown_flag());
        let self_monitor = SelfMonitor::new(
            config.paths.state_file.clone(),
            Arc::clone(&clock),
            config.guardian.scan_interval_secs,
        );

        Ok(Self {
            config,
            scanner: Box::new(scanner),
            clock,
            signals,
            logger,
            logger_join: None,
            self_monitor,
            phase: GuardianPhase::Starting,
            cycle: 0,
            max_cycles: args.max_cycles,
        })
    }

    /// Replace the per-root scanner.
    #[must_use]
    pub fn with_scanner(mut self, scanner: impl RootScanner + 'static) -> Self {
        self.scanner = Box::new(scanner);
        self
    }

    pub fn phase(&self) -> GuardianPhase {
        self.phase
    }

    pub fn signals(&self) -> &SignalHandler {
        &self.signals
    }

    /// Run until a stop is requested or `max_cycles` is reached.
    ///
    /// Returns the number of cycles run.
    pub fn run(&mut self) -> Result<u64> {
        let interval = Duration::from_secs(self.config.guardian.scan_interval_secs);
        self.logger.send(ActivityEvent::GuardianStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: self.config.stable_hash().unwrap_or_default(),
            watch_dirs: self.config.scanner.watch_dirs.clone(),
            interval_secs: interval.as_secs(),
            quarantine_dir: self.config.paths.quarantine_dir.clone(),
        });
        self.self_monitor
            .write(GuardianPhase::Starting, self.logger.dropped_events());

        let reason = loop {
            if self.signals.should_shutdown() {
                break "stop requested";
            }

            let summary = self.run_cycle();
            self.self_monitor.record_cycle(summary);

            if self.max_cycles.is_some_and(|max| self.cycle >= max) {
                break "cycle limit reached";
            }
            if self.signals.should_shutdown() {
                break "stop requested";
            }

            self.set_phase(GuardianPhase::Sleeping);
            self.logger.send(ActivityEvent::NextScan {
                interval_secs: interval.as_secs(),
            });
            let signals = self.signals.clone();
            let woke = self.clock.sleep(interval, &|| {
                signals.should_shutdown() || signals.scan_requested()
            });
            if woke && self.signals.should_scan() {
                eprintln!("[ENCG-GUARD] immediate scan requested (SIGUSR1)");
            }
        };

        self.shutdown(reason);
        Ok(self.cycle)
    }

    /// One full pass over the watch roots. Never fails; failures are recorded
    /// in the summary and logged.
    pub fn run_cycle(&mut self) -> CycleSummary {
        self.cycle += 1;
        let cycle = self.cycle;
        self.set_phase(GuardianPhase::Scanning);
        self.logger.send(ActivityEvent::CycleStarted { cycle });

        let started = Instant::now();
        let (existing, missing) = partition_targets(&self.config.scanner.watch_dirs);
        for path in &missing {
            self.logger
                .send(ActivityEvent::TargetMissing { path: path.clone() });
        }

        let mut tally = ScanTally::default();
        let mut scanned = Vec::with_capacity(existing.len());
        let outcome = contain_cycle(cycle, || {
            self.scan_targets(&existing, &mut tally, &mut scanned)
        });

        let error = match outcome {
            Ok(()) => {
                self.logger
                    .send(ActivityEvent::CycleCompleted { cycle, tally });
                None
            }
            Err(err) => {
                self.logger.send(ActivityEvent::CycleFailed {
                    cycle,
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                Some(err.to_string())
            }
        };

        CycleSummary {
            cycle,
            tally,
            targets_scanned: scanned,
            targets_missing: missing,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            error,
        }
    }

    fn scan_targets(
        &self,
        targets: &[PathBuf],
        tally: &mut ScanTally,
        scanned: &mut Vec<PathBuf>,
    ) -> Result<()> {
        for target in targets {
            if self.signals.should_shutdown() {
                break;
            }
            self.logger.send(ActivityEvent::ScanningTarget {
                path: target.clone(),
            });
            *tally += self.scanner.scan(target)?;
            scanned.push(target.clone());
        }
        Ok(())
    }

    fn set_phase(&mut self, phase: GuardianPhase) {
        self.phase = phase;
        self.self_monitor
            .write(phase, self.logger.dropped_events());
    }

    fn shutdown(&mut self, reason: &str) {
        self.logger.send(ActivityEvent::GuardianStopped {
            reason: reason.to_string(),
            cycles: self.cycle,
        });
        self.set_phase(GuardianPhase::Stopped);

        self.logger.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
        eprintln!("[ENCG-GUARD] stopped after {} cycles ({reason})", self.cycle);
    }
}

/// Run a cycle body, turning errors and panics into a `ScanCycle` error.
fn contain_cycle<F>(cycle: u64, body: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(GuardError::ScanCycle {
            cycle,
            details: err.to_string(),
        }),
        Err(payload) => {
            let details = payload
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(GuardError::ScanCycle {
                cycle,
                details: format!("panic: {details}"),
            })
        }
    }
}
