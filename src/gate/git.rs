//! Staged-file listing via the `git` executable.
//!
//! Any failure here (git missing, not a repository, non-zero exit) surfaces as
//! [`GuardError::VersionControl`]; the gate reads that as "nothing to check".

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::errors::{GuardError, Result};

/// Lists files staged for commit (added, copied or modified).
#[derive(Debug, Clone)]
pub struct GitStagedFiles {
    program: OsString,
    cwd: PathBuf,
}

impl GitStagedFiles {
    /// Query the repository containing `cwd` using `git` from `PATH`.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: OsString::from("git"),
            cwd: cwd.into(),
        }
    }

    /// Use a different executable in place of `git`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    /// Top-level directory of the working tree.
    pub fn toplevel(&self) -> Result<PathBuf> {
        let out = self.run(&["rev-parse", "--show-toplevel"])?;
        let line = String::from_utf8_lossy(&out);
        let top = line.trim();
        if top.is_empty() {
            return Err(GuardError::VersionControl {
                details: "git rev-parse printed no toplevel".to_string(),
            });
        }
        Ok(PathBuf::from(top))
    }

    /// Staged paths, absolute (joined onto the toplevel).
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let top = self.toplevel()?;
        let out = self.run(&["diff", "--cached", "--name-only", "-z", "--diff-filter=ACM"])?;
        Ok(split_nul_paths(&out)
            .into_iter()
            .map(|rel| top.join(rel))
            .collect())
    }

    fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.cwd)
            .output()
            .map_err(|e| GuardError::VersionControl {
                details: format!("cannot run {}: {e}", Path::new(&self.program).display()),
            })?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(GuardError::VersionControl {
                details: format!(
                    "git {} failed (exit {}): {}",
                    args.join(" "),
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

fn split_nul_paths(raw: &[u8]) -> Vec<PathBuf> {
    raw.split(|b| *b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(bytes_to_path)
        .collect()
}

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt as _;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
