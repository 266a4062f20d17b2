//! Commit gate: judge staged files and decide whether a commit may proceed.
//!
//! Fails closed only on confirmed corruption. Files that cannot be read, or
//! exceed the size limit, are reported as skipped and never block.

pub mod git;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::config::Config;
use crate::core::paths::has_watched_extension;
use crate::encoding::validator::{FileCheck, ValidationMode, validate_file};

/// Width of the `=` rules framing the blocked-commit report.
const RULE_WIDTH: usize = 60;

/// What the gate needs from the configuration.
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub extensions: Vec<String>,
    pub max_file_size_bytes: u64,
    pub mode: ValidationMode,
}

impl GateSettings {
    /// Settings from `config`; `force_strict` turns on strict-pattern mode
    /// even when the config leaves it off.
    #[must_use]
    pub fn from_config(config: &Config, force_strict: bool) -> Self {
        let mode = if force_strict || config.gate.strict_patterns {
            ValidationMode::StrictPattern
        } else {
            ValidationMode::DecodeOnly
        };
        Self {
            extensions: config.scanner.extensions.clone(),
            max_file_size_bytes: config.scanner.max_file_size_bytes,
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "blocked", rename_all = "snake_case")]
pub enum GateVerdict {
    Allow,
    Block(Vec<BlockedFile>),
}

impl GateVerdict {
    #[must_use]
    pub const fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Process exit code for a pre-commit hook.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Allow => 0,
            Self::Block(_) => 1,
        }
    }
}

/// Full gate result, as emitted by `encg check-staged --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateReport {
    pub verdict: GateVerdict,
    pub mode: ValidationMode,
    /// `false` when no repository was found; the verdict is then `Allow`.
    pub in_repository: bool,
    pub files_checked: usize,
    pub skipped: Vec<SkippedFile>,
}

impl GateReport {
    /// Outside version control there is nothing to gate.
    #[must_use]
    pub fn outside_repository(mode: ValidationMode) -> Self {
        Self {
            verdict: GateVerdict::Allow,
            mode,
            in_repository: false,
            files_checked: 0,
            skipped: Vec::new(),
        }
    }
}

/// Validate `files` and decide.
#[must_use]
pub fn check_staged(files: &[PathBuf], settings: &GateSettings) -> GateReport {
    let mut blocked = Vec::new();
    let mut skipped = Vec::new();
    let mut files_checked = 0;

    for path in files {
        if !has_watched_extension(path, &settings.extensions) {
            continue;
        }
        match validate_file(path, settings.max_file_size_bytes, settings.mode) {
            FileCheck::Checked(record) => {
                files_checked += 1;
                if let Some(reason) = record.verdict.reason() {
                    blocked.push(BlockedFile {
                        path: record.path.clone(),
                        reason: reason.to_string(),
                    });
                }
            }
            FileCheck::Oversize(len) => skipped.push(SkippedFile {
                path: path.clone(),
                reason: format!("{len} bytes exceeds the {} byte limit", settings.max_file_size_bytes),
            }),
            FileCheck::Unreadable(err) => skipped.push(SkippedFile {
                path: path.clone(),
                reason: format!("cannot check: {err}"),
            }),
        }
    }

    let verdict = if blocked.is_empty() {
        GateVerdict::Allow
    } else {
        GateVerdict::Block(blocked)
    };
    GateReport {
        verdict,
        mode: settings.mode,
        in_repository: true,
        files_checked,
        skipped,
    }
}

/// Human-readable lines for a blocked commit. Empty when the commit is allowed.
///
/// Paths are shown relative to `base` when they live under it.
#[must_use]
pub fn render_block_report(verdict: &GateVerdict, base: Option<&Path>) -> Vec<String> {
    let GateVerdict::Block(blocked) = verdict else {
        return Vec::new();
    };
    let rule = "=".repeat(RULE_WIDTH);
    let mut lines = vec![
        String::new(),
        rule.clone(),
        " ENCODING GUARDIAN: COMMIT BLOCKED".to_string(),
        rule.clone(),
        "The following files have Unicode corruption:".to_string(),
        String::new(),
    ];
    for file in blocked {
        let shown = base
            .and_then(|b| file.path.strip_prefix(b).ok())
            .unwrap_or(&file.path);
        lines.push(format!("   {}", shown.display()));
        lines.push(format!("     Reason: {}", file.reason));
        lines.push(String::new());
    }
    lines.push("Fix these files before committing!".to_string());
    lines.push("Run: encg scan".to_string());
    lines.push(rule);
    lines
}
