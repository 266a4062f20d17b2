//! Activity log writer: append-only `[YYYY-MM-DD HH:MM:SS] message` lines.
//!
//! Each line is assembled in memory and written with a single `write_all` on an
//! `O_APPEND` handle, so a concurrent `tail -f` never sees a torn line.
//!
//! Degradation chain:
//! 1. Log file
//! 2. stderr with `[ENCG-LOG]` prefix
//! 3. Silent discard (the guardian must never stop because logging failed)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::core::errors::{GuardError, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Degradation state of the line writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Stderr,
    Discard,
}

#[derive(Debug, Clone)]
pub struct LineWriterConfig {
    pub path: PathBuf,
    /// Echo each line to stdout as well.
    pub mirror_stdout: bool,
}

pub struct LineWriter {
    config: LineWriterConfig,
    file: Option<File>,
    state: WriterState,
}

impl LineWriter {
    /// Open the log file for append. Falls through the chain on failure.
    pub fn open(config: LineWriterConfig) -> Self {
        let mut w = Self {
            config,
            file: None,
            state: WriterState::Discard,
        };
        match open_append(&w.config.path) {
            Ok(file) => {
                w.file = Some(file);
                w.state = WriterState::Normal;
            }
            Err(e) => {
                let _ = writeln!(io::stderr(), "[ENCG-LOG] {e}; logging to stderr");
                w.state = WriterState::Stderr;
            }
        }
        w
    }

    /// Write one message stamped with `at`.
    pub fn write_message(&mut self, at: DateTime<Local>, message: &str) {
        let line = format_line(at, message);
        if self.config.mirror_stdout {
            let mut out = io::stdout().lock();
            let _ = out.write_all(line.as_bytes());
            let _ = out.flush();
        }
        self.write_line(&line);
    }

    pub fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
            let _ = file.sync_data();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    /// Try to get back to the log file after a degradation.
    pub fn try_recover(&mut self) {
        if self.state == WriterState::Normal {
            return;
        }
        if let Ok(file) = open_append(&self.config.path) {
            self.file = Some(file);
            self.state = WriterState::Normal;
            let _ = writeln!(
                io::stderr(),
                "[ENCG-LOG] recovered to log file: {}",
                self.config.path.display()
            );
        }
    }

    fn write_line(&mut self, line: &str) {
        match self.state {
            WriterState::Normal => {
                let ok = self
                    .file
                    .as_mut()
                    .is_some_and(|f| f.write_all(line.as_bytes()).is_ok());
                if !ok {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                if write!(io::stderr(), "[ENCG-LOG] {line}").is_err() {
                    self.degrade();
                }
            }
            WriterState::Discard => {}
        }
    }

    fn degrade(&mut self) {
        self.file = None;
        self.state = match self.state {
            WriterState::Normal => {
                let _ = writeln!(
                    io::stderr(),
                    "[ENCG-LOG] write to {} failed, using stderr",
                    self.config.path.display()
                );
                WriterState::Stderr
            }
            WriterState::Stderr | WriterState::Discard => WriterState::Discard,
        };
    }
}

/// `[YYYY-MM-DD HH:MM:SS] message\n`
pub fn format_line(at: DateTime<Local>, message: &str) -> String {
    format!("[{}] {message}\n", at.format(TIMESTAMP_FORMAT))
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| GuardError::io(parent, source))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| GuardError::io(path, source))
}
