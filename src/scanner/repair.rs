//! Repair engine: re-decode a corrupted file through the fallback table and
//! write it back as UTF-8 with a single whole-file replace.
//!
//! Replace sequence:
//!
//! 1. Re-read the current bytes from disk
//! 2. Decode with the first table entry that accepts them (lossy UTF-8 last)
//! 3. Skip the write entirely if the UTF-8 output equals the input
//! 4. Write a staging file in the SAME directory, `sync_all`, carry permissions
//! 5. `rename` the staging file over the target, then fsync the directory
//!
//! Symlinks are resolved first: the rename lands on the link's target, so the
//! link itself survives and the repaired bytes are what it points at.
//!
//! A reader of the target therefore sees either the old bytes or the new ones.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{GuardError, Result};
use crate::encoding::codecs::{DecodedWith, EncodingTable};

/// Staging files start with this so a stray one is recognisable.
const STAGING_PREFIX: &str = ".encg-repair-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RepairOutcome {
    Repaired {
        encoding: DecodedWith,
        /// False when the file already held exactly this UTF-8 text.
        changed: bool,
    },
    Failed {
        reason: String,
    },
}

impl RepairOutcome {
    #[must_use]
    pub const fn is_repaired(&self) -> bool {
        matches!(self, Self::Repaired { .. })
    }
}

pub struct RepairEngine {
    table: EncodingTable,
}

impl RepairEngine {
    pub fn new(table: EncodingTable) -> Self {
        Self { table }
    }

    /// Repair `path` in place. Never retries; I/O failures become `Failed`.
    pub fn repair(&self, path: &Path) -> RepairOutcome {
        match self.try_repair(path) {
            Ok((encoding, changed)) => RepairOutcome::Repaired { encoding, changed },
            Err(err) => RepairOutcome::Failed {
                reason: err.to_string(),
            },
        }
    }

    /// Same as [`repair`](Self::repair) with the typed error kept.
    pub fn try_repair(&self, path: &Path) -> Result<(DecodedWith, bool)> {
        let fail = |source: io::Error| GuardError::Repair {
            path: path.to_path_buf(),
            source,
        };

        let target = fs::canonicalize(path).map_err(fail)?;
        let original = fs::read(&target).map_err(fail)?;
        let (text, encoding) = self.table.decode(&original);
        if text.as_bytes() == original.as_slice() {
            return Ok((encoding, false));
        }

        replace_contents(&target, text.as_bytes()).map_err(fail)?;
        Ok((encoding, true))
    }
}

fn replace_contents(target: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let permissions = fs::metadata(target)?.permissions();

    let staging = parent.join(format!("{STAGING_PREFIX}{:08x}", rand::random::<u32>()));
    let staged = write_staging(&staging, contents, permissions);
    if let Err(err) = staged.and_then(|()| fs::rename(&staging, target)) {
        let _ = fs::remove_file(&staging);
        return Err(err);
    }

    #[cfg(unix)]
    {
        // Make the rename itself durable.
        if let Ok(dir) = OpenOptions::new().read(true).open(&parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

fn write_staging(staging: &Path, contents: &[u8], permissions: fs::Permissions) -> io::Result<()> {
    let mut file: File = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(staging)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::set_permissions(staging, permissions)
}
