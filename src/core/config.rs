//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{GuardError, Result};
use crate::core::paths::expand_home;
use crate::encoding::codecs::EncodingTable;

/// Highest `ENCG_WATCH_DIR_<n>` index consulted.
pub const MAX_WATCH_DIR_OVERRIDES: usize = 9;

/// Longest accepted pause between scans (one week).
pub const MAX_SCAN_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Full guardian configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub guardian: GuardianConfig,
    pub repair: RepairConfig,
    pub gate: GateConfig,
    pub paths: PathsConfig,
}

/// What gets walked and which files are eligible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    pub watch_dirs: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub excluded_dir_names: Vec<String>,
    pub max_file_size_bytes: u64,
    pub max_depth: usize,
    pub parallelism: usize,
    pub follow_symlinks: bool,
}

/// Scheduling of the guardian loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuardianConfig {
    pub scan_interval_secs: u64,
    /// Mirror activity log lines to stdout.
    pub mirror_stdout: bool,
}

/// Repair engine fallback chain, by encoding label, in priority order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepairConfig {
    pub encodings: Vec<String>,
}

/// Commit gate policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Flag raw replacement-character and C1-range bytes ahead of decoding.
    pub strict_patterns: bool,
}

/// Filesystem paths used by the guardian.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub install_home: PathBuf,
    pub user_home: PathBuf,
    pub log_file: PathBuf,
    pub quarantine_dir: PathBuf,
    pub state_file: PathBuf,
}

/// Default watched extensions.
pub const DEFAULT_EXTENSIONS: [&str; 8] = [
    ".py", ".ps1", ".bat", ".json", ".md", ".txt", ".js", ".ts",
];

/// Default directory names never descended into.
pub const DEFAULT_EXCLUDED_DIR_NAMES: [&str; 5] = [
    "node_modules",
    ".git",
    "__pycache__",
    "venv",
    "unicode_quarantine",
];

impl Default for ScannerConfig {
    fn default() -> Self {
        let home = user_home_from_env();
        Self {
            watch_dirs: vec![home.join("Projects"), home.join("repos")],
            extensions: DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect(),
            excluded_dir_names: DEFAULT_EXCLUDED_DIR_NAMES
                .iter()
                .map(ToString::to_string)
                .collect(),
            max_file_size_bytes: 10 * 1024 * 1024,
            max_depth: 64,
            parallelism: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_div(2).max(1)),
            follow_symlinks: false,
        }
    }
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            mirror_stdout: true,
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            encodings: EncodingTable::default().labels(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = user_home_from_env();
        let install_home = env_var("ENCG_HOME")
            .map_or_else(|| home.join(".local").join("share").join("encg"), PathBuf::from);
        Self {
            config_file: home.join(".config").join("encg").join("config.toml"),
            log_file: home.join("unicode_guardian.log"),
            quarantine_dir: home.join("unicode_quarantine"),
            state_file: install_home.join("state.json"),
            install_home,
            user_home: home,
        }
    }
}

/// Resolve the user's home: `ENCG_USER_HOME`, then `HOME`, then `USERPROFILE`.
fn user_home_from_env() -> PathBuf {
    ["ENCG_USER_HOME", "HOME", "USERPROFILE"]
        .iter()
        .find_map(|name| env_var(name))
        .map_or_else(
            || {
                eprintln!("[ENCG-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        )
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| GuardError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(GuardError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Build the repair fallback table from the configured labels.
    pub fn encoding_table(&self) -> Result<EncodingTable> {
        EncodingTable::from_labels(&self.repair.encodings)
    }

    /// Create the quarantine directory and the parents of the log and state files.
    pub fn ensure_directories(&self) -> Result<()> {
        let dirs = [
            Some(self.paths.quarantine_dir.as_path()),
            self.paths.log_file.parent(),
            self.paths.state_file.parent(),
        ];
        for dir in dirs.into_iter().flatten() {
            if dir.as_os_str().is_empty() {
                continue;
            }
            fs::create_dir_all(dir).map_err(|source| GuardError::io(dir, source))?;
        }
        Ok(())
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // Positional watch-root overrides: ENCG_WATCH_DIR_1 replaces watch_dirs[0], etc.
        for index in 1..=MAX_WATCH_DIR_OVERRIDES {
            let name = format!("ENCG_WATCH_DIR_{index}");
            if let Some(raw) = lookup(&name) {
                let slot = index - 1;
                if slot < self.scanner.watch_dirs.len() {
                    self.scanner.watch_dirs[slot] = PathBuf::from(raw);
                } else {
                    self.scanner.watch_dirs.push(PathBuf::from(raw));
                }
            }
        }

        if let Some(raw) = lookup("ENCG_SCAN_INTERVAL") {
            self.guardian.scan_interval_secs = parse_env_u64("ENCG_SCAN_INTERVAL", &raw)?;
        }
        if let Some(raw) = lookup("ENCG_MAX_FILE_SIZE") {
            self.scanner.max_file_size_bytes = parse_env_u64("ENCG_MAX_FILE_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("ENCG_HOME") {
            self.paths.install_home = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ENCG_LOG_FILE") {
            self.paths.log_file = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ENCG_QUARANTINE_DIR") {
            self.paths.quarantine_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ENCG_STATE_FILE") {
            self.paths.state_file = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ENCG_STRICT_PATTERNS") {
            self.gate.strict_patterns = parse_env_bool("ENCG_STRICT_PATTERNS", &raw)?;
        }

        Ok(())
    }

    /// Normalize values for consistent comparison.
    fn normalize(&mut self) {
        let home = self.paths.user_home.clone();
        for path in [
            &mut self.paths.log_file,
            &mut self.paths.quarantine_dir,
            &mut self.paths.state_file,
        ] {
            *path = expand_home(path, &home);
        }

        for path in &mut self.scanner.watch_dirs {
            let expanded = expand_home(path, &home);
            let s = expanded.to_string_lossy();
            *path = match s.strip_suffix('/') {
                Some(stripped) if s.len() > 1 => PathBuf::from(stripped),
                _ => expanded.clone(),
            };
        }

        // Extensions are suffix-matched; accept "py" as shorthand for ".py".
        for ext in &mut self.scanner.extensions {
            if !ext.starts_with('.') {
                ext.insert(0, '.');
            }
        }

        // The quarantine directory must never be scanned, whatever it is called.
        if let Some(name) = self.paths.quarantine_dir.file_name() {
            let name = name.to_string_lossy().into_owned();
            if !self.scanner.excluded_dir_names.contains(&name) {
                self.scanner.excluded_dir_names.push(name);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.guardian.scan_interval_secs == 0 {
            return Err(GuardError::InvalidConfig {
                details: "guardian.scan_interval_secs must be >= 1".to_string(),
            });
        }
        if self.guardian.scan_interval_secs > MAX_SCAN_INTERVAL_SECS {
            return Err(GuardError::InvalidConfig {
                details: format!(
                    "guardian.scan_interval_secs must be <= {MAX_SCAN_INTERVAL_SECS}"
                ),
            });
        }
        if self.scanner.max_file_size_bytes == 0 {
            return Err(GuardError::InvalidConfig {
                details: "scanner.max_file_size_bytes must be > 0".to_string(),
            });
        }
        if self.scanner.parallelism == 0 {
            return Err(GuardError::InvalidConfig {
                details: "scanner.parallelism must be >= 1".to_string(),
            });
        }
        if self.scanner.max_depth == 0 {
            return Err(GuardError::InvalidConfig {
                details: "scanner.max_depth must be >= 1".to_string(),
            });
        }
        if self.scanner.watch_dirs.is_empty() {
            return Err(GuardError::InvalidConfig {
                details: "scanner.watch_dirs must name at least one directory".to_string(),
            });
        }
        if self.scanner.extensions.iter().any(|ext| ext.len() < 2) {
            return Err(GuardError::InvalidConfig {
                details: "scanner.extensions entries must be non-empty suffixes".to_string(),
            });
        }
        if self.paths.quarantine_dir.as_os_str().is_empty() {
            return Err(GuardError::InvalidConfig {
                details: "paths.quarantine_dir must be set".to_string(),
            });
        }

        // Unknown labels surface here rather than on the first repair.
        self.encoding_table()?;

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|error| GuardError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(GuardError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: expected a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, GuardError, MAX_SCAN_INTERVAL_SECS};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn ensure_directories_creates_quarantine_and_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.paths.quarantine_dir = tmp.path().join("q");
        cfg.paths.log_file = tmp.path().join("logs").join("guardian.log");
        cfg.paths.state_file = tmp.path().join("state").join("state.json");

        cfg.ensure_directories().unwrap();
        cfg.ensure_directories().unwrap();

        assert!(tmp.path().join("q").is_dir());
        assert!(tmp.path().join("logs").is_dir());
        assert!(tmp.path().join("state").is_dir());
    }

    #[test]
    fn default_config_is_valid() {
        let mut cfg = Config::default();
        cfg.normalize();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_extensions_match_watch_list() {
        let cfg = Config::default();
        assert_eq!(
            cfg.scanner.extensions,
            vec![".py", ".ps1", ".bat", ".json", ".md", ".txt", ".js", ".ts"]
        );
        assert_eq!(cfg.guardian.scan_interval_secs, 30);
        assert_eq!(cfg.scanner.max_file_size_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn zero_interval_rejected() {
        let mut cfg = Config::default();
        cfg.guardian.scan_interval_secs = 0;
        let err = cfg.validate().expect_err("expected interval error");
        match err {
            GuardError::InvalidConfig { details } => {
                assert!(details.contains("scan_interval_secs"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn huge_interval_rejected() {
        let mut cfg = Config::default();
        cfg.normalize();
        cfg.guardian.scan_interval_secs = u64::MAX;
        let err = cfg.validate().expect_err("expected interval error");
        assert!(err.to_string().contains("scan_interval_secs"));

        cfg.guardian.scan_interval_secs = MAX_SCAN_INTERVAL_SECS;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn windows_1252_first_order_is_accepted() {
        let mut cfg = Config::default();
        cfg.normalize();
        cfg.repair.encodings = ["utf-8", "windows-1252", "iso-8859-1", "utf-16"]
            .iter()
            .map(ToString::to_string)
            .collect();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.encoding_table().unwrap().labels(), cfg.repair.encodings);
    }

    #[test]
    fn zero_max_file_size_rejected() {
        let mut cfg = Config::default();
        cfg.scanner.max_file_size_bytes = 0;
        let err = cfg.validate().expect_err("expected size error");
        assert!(err.to_string().contains("max_file_size_bytes"));
    }

    #[test]
    fn unknown_encoding_label_rejected() {
        let mut cfg = Config::default();
        cfg.repair.encodings = vec!["utf-8".to_string(), "klingon-8".to_string()];
        let err = cfg.validate().expect_err("expected encoding error");
        assert!(err.to_string().contains("klingon-8"));
    }

    #[test]
    fn env_watch_dirs_override_by_position() {
        let mut cfg = Config::default();
        cfg.scanner.watch_dirs = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        let overrides = vars(&[
            ("ENCG_WATCH_DIR_2", "/srv/code"),
            ("ENCG_WATCH_DIR_3", "/srv/extra"),
        ]);

        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");

        assert_eq!(
            cfg.scanner.watch_dirs,
            vec![
                PathBuf::from("/a"),
                PathBuf::from("/srv/code"),
                PathBuf::from("/srv/extra"),
            ]
        );
    }

    #[test]
    fn env_scalars_override_defaults() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("ENCG_SCAN_INTERVAL", "5"),
            ("ENCG_MAX_FILE_SIZE", "2048"),
            ("ENCG_QUARANTINE_DIR", "/var/lib/encg/q"),
            ("ENCG_LOG_FILE", "/var/log/encg.log"),
            ("ENCG_STRICT_PATTERNS", "yes"),
        ]);

        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");

        assert_eq!(cfg.guardian.scan_interval_secs, 5);
        assert_eq!(cfg.scanner.max_file_size_bytes, 2048);
        assert_eq!(cfg.paths.quarantine_dir, PathBuf::from("/var/lib/encg/q"));
        assert_eq!(cfg.paths.log_file, PathBuf::from("/var/log/encg.log"));
        assert!(cfg.gate.strict_patterns);
    }

    #[test]
    fn env_invalid_interval_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("ENCG_SCAN_INTERVAL", "soon")]);

        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid integer should fail");
        match err {
            GuardError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("ENCG_SCAN_INTERVAL"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn normalize_excludes_custom_quarantine_dir_name() {
        let mut cfg = Config::default();
        cfg.paths.quarantine_dir = PathBuf::from("/data/holding-pen");
        cfg.normalize();
        assert!(
            cfg.scanner
                .excluded_dir_names
                .contains(&"holding-pen".to_string())
        );
    }

    #[test]
    fn normalize_prefixes_bare_extensions_and_trims_slashes() {
        let mut cfg = Config::default();
        cfg.scanner.extensions = vec!["rs".to_string(), ".toml".to_string()];
        cfg.scanner.watch_dirs = vec![PathBuf::from("/"), PathBuf::from("/data/")];
        cfg.normalize();
        assert_eq!(cfg.scanner.extensions, vec![".rs", ".toml"]);
        assert!(cfg.scanner.watch_dirs.contains(&PathBuf::from("/")));
        assert!(cfg.scanner.watch_dirs.contains(&PathBuf::from("/data")));
    }

    #[test]
    fn toml_file_layers_under_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[guardian]\nscan_interval_secs = 90\n\n[scanner]\nwatch_dirs = [\"/srv/a\"]\n",
        )
        .unwrap();

        let mut cfg: Config = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        cfg.normalize();
        assert_eq!(cfg.guardian.scan_interval_secs, 90);
        assert_eq!(cfg.scanner.watch_dirs, vec![PathBuf::from("/srv/a")]);
        assert_eq!(cfg.scanner.extensions.len(), 8);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/encg/config.toml")));
        assert!(matches!(result, Err(GuardError::MissingConfig { .. })));
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.guardian.scan_interval_secs += 1;
        let after = modified.stable_hash().expect("hash should compute");
        assert_ne!(before, after);
        assert_eq!(before, cfg.stable_hash().expect("hash should compute"));
    }
}
