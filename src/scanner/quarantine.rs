//! Quarantine store: a timestamped copy of every file before it is repaired.
//!
//! Layout: `{quarantine_dir}/{YYYYmmdd_HHMMSS}_{original_file_name}`. A second
//! copy of the same name within one second gets a counter, `{ts}-1_{name}`.
//! Entries are write-once; the guardian never reads them back.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Local, NaiveDateTime};
use filetime::FileTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{GuardError, Result};
use crate::daemon::clock::SharedClock;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Give up on a name after this many same-second collisions.
const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Record of one quarantined copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub bytes: u64,
    pub sha256: String,
    pub created_at: DateTime<Local>,
}

/// An entry found on disk by [`QuarantineStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedEntry {
    pub file_name: String,
    pub original_name: String,
    pub quarantined_at: NaiveDateTime,
    pub bytes: u64,
}

pub struct QuarantineStore {
    dir: PathBuf,
    clock: SharedClock,
}

impl QuarantineStore {
    pub fn new(dir: PathBuf, clock: SharedClock) -> Self {
        Self { dir, clock }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `path`'s current bytes into the store.
    ///
    /// The source is never modified. Any failure means the caller must not
    /// repair the file.
    pub fn quarantine(&self, path: &Path) -> Result<QuarantineEntry> {
        let fail = |source: io::Error| GuardError::Quarantine {
            path: path.to_path_buf(),
            source,
        };

        let file_name = path
            .file_name()
            .ok_or_else(|| {
                fail(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "path has no file name",
                ))
            })?
            .to_string_lossy()
            .into_owned();

        let source_meta = fs::metadata(path).map_err(fail)?;
        let bytes = fs::read(path).map_err(fail)?;

        // Lazily, and tolerant of a concurrent first use.
        fs::create_dir_all(&self.dir).map_err(fail)?;

        let created_at = self.clock.now();
        let stamp = created_at.format(TIMESTAMP_FORMAT).to_string();
        let (destination, mut file) = self.create_unique(&stamp, &file_name).map_err(fail)?;

        let written = file
            .write_all(&bytes)
            .and_then(|()| file.sync_all())
            .and_then(|()| fs::set_permissions(&destination, source_meta.permissions()));
        if let Err(err) = written {
            drop(file);
            let _ = fs::remove_file(&destination);
            return Err(fail(err));
        }
        drop(file);

        let atime = FileTime::from_last_access_time(&source_meta);
        let mtime = FileTime::from_last_modification_time(&source_meta);
        if let Err(err) = filetime::set_file_times(&destination, atime, mtime) {
            eprintln!(
                "[ENCG-QUARANTINE] could not copy timestamps to {}: {err}",
                destination.display()
            );
        }

        Ok(QuarantineEntry {
            source: path.to_path_buf(),
            destination,
            bytes: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
            created_at,
        })
    }

    fn create_unique(&self, stamp: &str, file_name: &str) -> io::Result<(PathBuf, fs::File)> {
        for counter in 0..MAX_COLLISION_SUFFIX {
            let name = if counter == 0 {
                format!("{stamp}_{file_name}")
            } else {
                format!("{stamp}-{counter}_{file_name}")
            };
            let candidate = self.dir.join(name);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(file) => return Ok((candidate, file)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free quarantine name for {file_name} at {stamp}"),
        ))
    }

    /// Enumerate entries, oldest first. A missing directory is an empty store.
    pub fn list(&self) -> Result<Vec<ListedEntry>> {
        let pattern = entry_name_pattern()?;
        let read = match fs::read_dir(&self.dir) {
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(GuardError::io(&self.dir, err)),
        };

        let mut entries = Vec::new();
        for dir_entry in read.flatten() {
            let file_name = dir_entry.file_name().to_string_lossy().into_owned();
            let Some(listed) = parse_entry_name(pattern, &file_name) else {
                continue;
            };
            let bytes = dir_entry.metadata().map(|m| m.len()).unwrap_or(0);
            entries.push(ListedEntry { bytes, ..listed });
        }
        entries.sort_by(|a, b| {
            a.quarantined_at
                .cmp(&b.quarantined_at)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        Ok(entries)
    }
}

fn entry_name_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d{8}_\d{6})(?:-\d+)?_(.+)$"))
        .as_ref()
        .map_err(|err| GuardError::Runtime {
            details: format!("quarantine name pattern: {err}"),
        })
}

fn parse_entry_name(pattern: &Regex, file_name: &str) -> Option<ListedEntry> {
    let caps = pattern.captures(file_name)?;
    let quarantined_at = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT).ok()?;
    Some(ListedEntry {
        file_name: file_name.to_string(),
        original_name: caps[2].to_string(),
        quarantined_at,
        bytes: 0,
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
