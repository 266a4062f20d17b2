//! Fallback decode table used by the repair engine.
//!
//! Each entry is a strict decoder: it either maps the whole buffer to text or
//! refuses. The table is tried in order and the first success wins; a lossy
//! UTF-8 decode terminates the chain and never fails.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::{GuardError, Result};

/// A single strict decoder in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    Utf8,
    Windows1252,
    Iso88591,
    Utf16,
}

/// Windows-1252 code points for 0x80..=0x9F. `None` marks the five bytes the
/// code page leaves unassigned.
const WINDOWS_1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'),
    None,
    Some('\u{201A}'),
    Some('\u{0192}'),
    Some('\u{201E}'),
    Some('\u{2026}'),
    Some('\u{2020}'),
    Some('\u{2021}'),
    Some('\u{02C6}'),
    Some('\u{2030}'),
    Some('\u{0160}'),
    Some('\u{2039}'),
    Some('\u{0152}'),
    None,
    Some('\u{017D}'),
    None,
    None,
    Some('\u{2018}'),
    Some('\u{2019}'),
    Some('\u{201C}'),
    Some('\u{201D}'),
    Some('\u{2022}'),
    Some('\u{2013}'),
    Some('\u{2014}'),
    Some('\u{02DC}'),
    Some('\u{2122}'),
    Some('\u{0161}'),
    Some('\u{203A}'),
    Some('\u{0153}'),
    None,
    Some('\u{017E}'),
    Some('\u{0178}'),
];

impl Encoding {
    /// Canonical label, as written in `repair.encodings`.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Windows1252 => "windows-1252",
            Self::Iso88591 => "iso-8859-1",
            Self::Utf16 => "utf-16",
        }
    }

    /// Parse a label, accepting the common aliases.
    #[must_use]
    pub fn from_label(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "windows-1252" | "cp1252" => Some(Self::Windows1252),
            "iso-8859-1" | "latin-1" | "latin1" => Some(Self::Iso88591),
            "utf-16" | "utf16" => Some(Self::Utf16),
            _ => None,
        }
    }

    /// Strict decode: `None` when any byte has no mapping.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
            Self::Windows1252 => decode_windows_1252(bytes),
            Self::Iso88591 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
            Self::Utf16 => decode_utf16(bytes),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn decode_windows_1252(bytes: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        let ch = match byte {
            0x80..=0x9F => WINDOWS_1252_HIGH[usize::from(byte - 0x80)]?,
            _ => char::from(byte),
        };
        out.push(ch);
    }
    Some(out)
}

fn decode_utf16(bytes: &[u8]) -> Option<String> {
    let (body, big_endian) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (rest, false),
        [0xFE, 0xFF, rest @ ..] => (rest, true),
        _ => (bytes, false),
    };
    if body.len() % 2 != 0 {
        return None;
    }
    let units = body.chunks_exact(2).map(|pair| {
        let pair = [pair[0], pair[1]];
        if big_endian {
            u16::from_be_bytes(pair)
        } else {
            u16::from_le_bytes(pair)
        }
    });
    char::decode_utf16(units)
        .collect::<std::result::Result<String, _>>()
        .ok()
}

/// Which step of the chain produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "encoding")]
pub enum DecodedWith {
    Strict(Encoding),
    /// Every table entry refused; invalid sequences became U+FFFD.
    LossyUtf8,
}

impl fmt::Display for DecodedWith {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict(encoding) => write!(f, "{encoding}"),
            Self::LossyUtf8 => f.write_str("utf-8 (lossy)"),
        }
    }
}

/// Ordered fallback table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingTable {
    entries: Vec<Encoding>,
}

impl Default for EncodingTable {
    /// `iso-8859-1` maps every byte, so with this order the later entries and
    /// the lossy step are unreachable unless the table is reconfigured. Put
    /// `windows-1252` first in `repair.encodings` to turn smart quotes from
    /// legacy editors into their Unicode forms instead of C1 controls.
    fn default() -> Self {
        Self {
            entries: vec![
                Encoding::Utf8,
                Encoding::Iso88591,
                Encoding::Windows1252,
                Encoding::Utf16,
            ],
        }
    }
}

impl EncodingTable {
    #[must_use]
    pub fn new(entries: Vec<Encoding>) -> Self {
        Self { entries }
    }

    /// Build from configured labels. An empty list means "lossy only".
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Result<Self> {
        let mut entries = Vec::with_capacity(labels.len());
        for label in labels {
            let label = label.as_ref();
            let encoding =
                Encoding::from_label(label).ok_or_else(|| GuardError::InvalidConfig {
                    details: format!("repair.encodings: unknown encoding {label:?}"),
                })?;
            if !entries.contains(&encoding) {
                entries.push(encoding);
            }
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub fn entries(&self) -> &[Encoding] {
        &self.entries
    }

    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.label().to_string()).collect()
    }

    /// Decode with the first entry that accepts the bytes.
    #[must_use]
    pub fn decode(&self, bytes: &[u8]) -> (String, DecodedWith) {
        for encoding in &self.entries {
            if let Some(text) = encoding.decode(bytes) {
                return (text, DecodedWith::Strict(*encoding));
            }
        }
        (
            String::from_utf8_lossy(bytes).into_owned(),
            DecodedWith::LossyUtf8,
        )
    }
}
