//! UTF-8 verdicts for byte buffers and files.

#![allow(missing_docs)]

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::Utf8Error;

use memchr::memmem;
use serde::{Deserialize, Serialize};

use crate::core::errors::GuardError;

/// Encoded U+FFFD.
const REPLACEMENT_CHAR: &[u8] = "\u{FFFD}".as_bytes();

/// How strictly a buffer is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationMode {
    /// Invalid iff UTF-8 decoding fails. Used by the guardian.
    #[default]
    DecodeOnly,
    /// Additionally flags an encoded U+FFFD and raw 0x80..=0x9F bytes before
    /// decoding. Opt-in for the commit gate; it rejects legitimate UTF-8 that
    /// uses those bytes as continuation bytes.
    StrictPattern,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DecodeOnly => f.write_str("decode-only"),
            Self::StrictPattern => f.write_str("strict-pattern"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    Invalid(String),
}

impl Verdict {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Invalid(reason) => Some(reason),
        }
    }
}

/// Judge `bytes` under `mode`. Pure; safe to call from any thread.
#[must_use]
pub fn validate_with(bytes: &[u8], mode: ValidationMode) -> Verdict {
    if mode == ValidationMode::StrictPattern {
        if let Some(offset) = memmem::find(bytes, REPLACEMENT_CHAR) {
            return Verdict::Invalid(format!(
                "corruption pattern: replacement character present at byte {offset}"
            ));
        }
        if let Some(offset) = bytes.iter().position(|b| (0x80..=0x9F).contains(b)) {
            return Verdict::Invalid(format!(
                "corruption pattern: C1 control-range byte 0x{:02x} at byte {offset}",
                bytes[offset]
            ));
        }
    }
    match std::str::from_utf8(bytes) {
        Ok(_) => Verdict::Valid,
        Err(error) => Verdict::Invalid(describe_utf8_error(bytes, error)),
    }
}

/// Decode-only verdict.
#[must_use]
pub fn validate(bytes: &[u8]) -> Verdict {
    validate_with(bytes, ValidationMode::DecodeOnly)
}

fn describe_utf8_error(bytes: &[u8], error: Utf8Error) -> String {
    let offset = error.valid_up_to();
    let byte = bytes.get(offset).copied().unwrap_or_default();
    let nature = match error.error_len() {
        None => "unexpected end of data",
        // Leading byte that can never start a sequence.
        Some(_) if matches!(byte, 0x80..=0xC1 | 0xF5..=0xFF) => "invalid start byte",
        Some(_) => "invalid continuation byte",
    };
    format!("{nature} 0x{byte:02x} at byte {offset}")
}

/// A file that was read and judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub verdict: Verdict,
}

impl FileRecord {
    /// Express an invalid verdict as a typed error, for logging with its code.
    #[must_use]
    pub fn to_error(&self) -> Option<GuardError> {
        self.verdict.reason().map(|reason| GuardError::Validation {
            path: self.path.clone(),
            reason: reason.to_string(),
        })
    }
}

/// Result of trying to judge a file on disk.
#[derive(Debug)]
pub enum FileCheck {
    Checked(FileRecord),
    /// Larger than the configured limit; not read.
    Oversize(u64),
    /// Vanished, unreadable, or not a regular file.
    Unreadable(io::Error),
}

/// Read `path` (up to `max_size` bytes) and judge it.
pub fn validate_file(path: &Path, max_size: u64, mode: ValidationMode) -> FileCheck {
    let len = match fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => {
            return FileCheck::Unreadable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            ));
        }
        Err(error) => return FileCheck::Unreadable(error),
    };
    if len > max_size {
        return FileCheck::Oversize(len);
    }
    // The file may grow between the size check and the read.
    let read = File::open(path).and_then(|file| read_bounded(file, max_size));
    match read {
        Ok(Ok(bytes)) => {
            let verdict = validate_with(&bytes, mode);
            FileCheck::Checked(FileRecord {
                path: path.to_path_buf(),
                bytes,
                verdict,
            })
        }
        Ok(Err(seen)) => FileCheck::Oversize(seen),
        Err(error) => FileCheck::Unreadable(error),
    }
}

/// Read at most `max_size` bytes. `Err(n)` means the source held more,
/// with `n` the bytes seen before giving up.
fn read_bounded<R: Read>(source: R, max_size: u64) -> io::Result<Result<Vec<u8>, u64>> {
    let mut bytes = Vec::new();
    source
        .take(max_size.saturating_add(1))
        .read_to_end(&mut bytes)?;
    let seen = bytes.len() as u64;
    if seen > max_size {
        return Ok(Err(seen));
    }
    Ok(Ok(bytes))
}
