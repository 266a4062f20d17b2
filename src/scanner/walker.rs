//! Parallel directory walker that streams candidate files to the scanner.
//!
//! Directories are expanded by a small crossbeam worker pool; file entries are
//! streamed back over a channel so the consumer can validate and repair them in
//! order on its own thread. Excluded directory names are pruned before descent,
//! so nothing beneath `node_modules`, `.git` or the quarantine directory is ever
//! listed.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use parking_lot::Mutex;

use crate::core::config::ScannerConfig;
use crate::core::errors::{GuardError, Result};
use crate::core::paths::{is_within, resolve_absolute_path};

/// Walker configuration derived from `ScannerConfig`.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub root_paths: Vec<PathBuf>,
    pub max_depth: usize,
    pub follow_symlinks: bool,
    pub parallelism: usize,
    /// Directory names never descended into, matched on the final component.
    pub excluded_names: HashSet<String>,
    /// Absolute subtrees never descended into (the resolved quarantine dir).
    pub excluded_paths: Vec<PathBuf>,
}

impl WalkerConfig {
    /// Walk `roots` under the scanner settings, additionally pruning `quarantine_dir`.
    pub fn from_scanner(
        scanner: &ScannerConfig,
        roots: Vec<PathBuf>,
        quarantine_dir: &Path,
    ) -> Self {
        Self {
            root_paths: roots,
            max_depth: scanner.max_depth,
            follow_symlinks: scanner.follow_symlinks,
            parallelism: scanner.parallelism,
            excluded_names: scanner.excluded_dir_names.iter().cloned().collect(),
            excluded_paths: vec![resolve_absolute_path(quarantine_dir)],
        }
    }

    fn is_excluded_dir(&self, path: &Path) -> bool {
        let by_name = path
            .file_name()
            .is_some_and(|name| self.excluded_names.contains(name.to_string_lossy().as_ref()));
        by_name
            || self
                .excluded_paths
                .iter()
                .any(|excluded| is_within(path, excluded))
    }
}

/// A regular file discovered during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
}

/// Item in the internal work queue: (directory_path, depth).
type WorkItem = (PathBuf, usize);

/// Parallel directory walker.
///
/// Safety invariants:
/// - Honors `follow_symlinks`; with it enabled, each directory identity is
///   visited once so symlink cycles terminate
/// - Prunes excluded names and paths before reading them
/// - Bounded by `max_depth`
/// - Stops promptly once the consumer drops the receiver
pub struct DirectoryWalker {
    config: WalkerConfig,
}

impl DirectoryWalker {
    pub fn new(config: WalkerConfig) -> Self {
        Self { config }
    }

    /// Walk everything and collect the file entries.
    pub fn walk(&self) -> Result<Vec<WalkEntry>> {
        Ok(self.stream()?.into_iter().collect())
    }

    /// Stream file entries as they are discovered.
    ///
    /// Missing or unreadable roots are skipped. Other root stat errors are
    /// returned before any worker starts.
    pub fn stream(&self) -> Result<channel::Receiver<WalkEntry>> {
        let parallelism = self.config.parallelism.max(1);

        // Unbounded work queue: a worker never blocks on enqueueing children,
        // so the pool cannot deadlock on a full queue.
        let (work_tx, work_rx) = channel::unbounded::<WorkItem>();
        let (result_tx, result_rx) = channel::bounded::<WalkEntry>(1024);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let visited = Arc::new(Mutex::new(HashSet::new()));

        for root in &self.config.root_paths {
            let meta = match metadata_for_path(root, self.config.follow_symlinks) {
                Ok(m) => m,
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::NotFound | ErrorKind::PermissionDenied
                    ) =>
                {
                    continue;
                }
                Err(err) => return Err(GuardError::io(root, err)),
            };
            if !meta.is_dir() {
                continue;
            }
            let absolute = resolve_absolute_path(root);
            if self
                .config
                .excluded_paths
                .iter()
                .any(|excluded| is_within(&absolute, excluded))
            {
                continue;
            }
            in_flight.fetch_add(1, Ordering::Release);
            let _ = work_tx.send((root.clone(), 0));
        }

        for _ in 0..parallelism {
            let work_rx = work_rx.clone();
            let work_tx = work_tx.clone();
            let result_tx = result_tx.clone();
            let in_flight = Arc::clone(&in_flight);
            let cancelled = Arc::clone(&cancelled);
            let visited = Arc::clone(&visited);
            let config = self.config.clone();

            thread::spawn(move || {
                let shared = Shared {
                    work_tx: &work_tx,
                    result_tx: &result_tx,
                    in_flight: &in_flight,
                    cancelled: &cancelled,
                    visited: &visited,
                    config: &config,
                };
                walker_thread(&work_rx, &shared);
            });
        }

        Ok(result_rx)
    }
}

/// State every worker borrows.
struct Shared<'a> {
    work_tx: &'a channel::Sender<WorkItem>,
    result_tx: &'a channel::Sender<WalkEntry>,
    in_flight: &'a AtomicUsize,
    cancelled: &'a AtomicBool,
    visited: &'a Mutex<HashSet<(u64, u64)>>,
    config: &'a WalkerConfig,
}

fn walker_thread(work_rx: &channel::Receiver<WorkItem>, shared: &Shared<'_>) {
    loop {
        if shared.cancelled.load(Ordering::Relaxed) {
            return;
        }
        match work_rx.recv_timeout(Duration::from_millis(50)) {
            Ok((dir_path, depth)) => {
                if !shared.cancelled.load(Ordering::Relaxed) {
                    process_directory(&dir_path, depth, shared);
                }
                shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(channel::RecvTimeoutError::Timeout) => {
                if shared.in_flight.load(Ordering::Acquire) == 0 {
                    return;
                }
            }
            Err(channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Read one directory: emit its regular files, enqueue its subdirectories.
fn process_directory(dir_path: &Path, depth: usize, shared: &Shared<'_>) {
    let config = shared.config;

    if config.follow_symlinks
        && let Ok(meta) = fs::metadata(dir_path)
        && let Some(identity) = dir_identity(&meta)
        && !shared.visited.lock().insert(identity)
    {
        return;
    }

    let Ok(entries) = fs::read_dir(dir_path) else {
        // Permission denied, vanished, or not a directory anymore.
        return;
    };

    for entry in entries.flatten() {
        let child_path = entry.path();
        let Ok(ft) = entry.file_type() else {
            continue;
        };
        if ft.is_symlink() && !config.follow_symlinks {
            continue;
        }

        let Ok(meta) = metadata_for_path(&child_path, config.follow_symlinks) else {
            continue;
        };

        if meta.is_dir() {
            if depth < config.max_depth && !config.is_excluded_dir(&child_path) {
                shared.in_flight.fetch_add(1, Ordering::Release);
                if shared.work_tx.send((child_path, depth + 1)).is_err() {
                    shared.in_flight.fetch_sub(1, Ordering::Release);
                }
            }
            continue;
        }

        if !meta.is_file() {
            continue;
        }

        let walk_entry = WalkEntry { path: child_path };
        if shared.result_tx.send(walk_entry).is_err() {
            // Consumer is gone; wind the whole pool down.
            shared.cancelled.store(true, Ordering::Relaxed);
            return;
        }
    }
}

fn metadata_for_path(path: &Path, follow_symlinks: bool) -> std::io::Result<fs::Metadata> {
    if follow_symlinks {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    }
}

/// (device, inode) identity for cycle detection.
fn dir_identity(meta: &fs::Metadata) -> Option<(u64, u64)> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Some((meta.dev(), meta.ino()))
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> WalkerConfig {
        WalkerConfig {
            root_paths: vec![root.to_path_buf()],
            max_depth: 10,
            follow_symlinks: false,
            parallelism: 2,
            excluded_names: ["node_modules", ".git", "unicode_quarantine"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            excluded_paths: Vec::new(),
        }
    }

    fn walked_paths(config: WalkerConfig) -> Vec<PathBuf> {
        let mut paths: Vec<_> = DirectoryWalker::new(config)
            .walk()
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn walks_nested_files() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a").join("b")).unwrap();
        fs::write(tmp.path().join("top.py"), "x").unwrap();
        fs::write(tmp.path().join("a").join("b").join("deep.md"), "y").unwrap();

        let paths = walked_paths(test_config(tmp.path()));
        assert_eq!(
            paths,
            vec![
                tmp.path().join("a").join("b").join("deep.md"),
                tmp.path().join("top.py"),
            ]
        );
    }

    #[test]
    fn excluded_names_are_never_listed() {
        let tmp = TempDir::new().unwrap();
        for dir in ["node_modules/pkg", ".git/objects", "src"] {
            fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        fs::write(tmp.path().join("node_modules/pkg/index.js"), b"\xff").unwrap();
        fs::write(tmp.path().join(".git/objects/blob.txt"), b"\xff").unwrap();
        fs::write(tmp.path().join("src/main.js"), "ok").unwrap();

        let paths = walked_paths(test_config(tmp.path()));
        assert_eq!(paths, vec![tmp.path().join("src").join("main.js")]);
    }

    #[test]
    fn excluded_paths_prune_quarantine_by_location() {
        let tmp = TempDir::new().unwrap();
        let holding = tmp.path().join("holding-pen");
        fs::create_dir_all(&holding).unwrap();
        fs::write(holding.join("20250101_000000_a.txt"), b"\xff").unwrap();
        fs::write(tmp.path().join("a.txt"), "ok").unwrap();

        let mut config = test_config(tmp.path());
        config.excluded_paths = vec![resolve_absolute_path(&holding)];
        config.root_paths = vec![resolve_absolute_path(tmp.path())];
        let paths = walked_paths(config);
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("a.txt"));
    }

    #[test]
    fn root_inside_quarantine_is_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "x").unwrap();
        let mut config = test_config(tmp.path());
        config.excluded_paths = vec![resolve_absolute_path(tmp.path())];
        assert!(walked_paths(config).is_empty());
    }

    #[test]
    fn respects_max_depth() {
        let tmp = TempDir::new().unwrap();
        let deep = tmp.path().join("a").join("b").join("c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(tmp.path().join("a").join("one.txt"), "1").unwrap();
        fs::write(deep.join("three.txt"), "3").unwrap();

        let mut config = test_config(tmp.path());
        config.max_depth = 2;
        let paths = walked_paths(config);
        assert!(paths.contains(&tmp.path().join("a").join("one.txt")));
        assert!(!paths.contains(&deep.join("three.txt")));
    }

    #[cfg(unix)]
    #[test]
    fn does_not_follow_symlinks_by_default() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real");
        fs::create_dir_all(&real).unwrap();
        fs::write(real.join("f.txt"), "x").unwrap();
        std::os::unix::fs::symlink(&real, tmp.path().join("link")).unwrap();
        std::os::unix::fs::symlink(real.join("f.txt"), tmp.path().join("alias.txt")).unwrap();

        let paths = walked_paths(test_config(tmp.path()));
        assert_eq!(paths, vec![real.join("f.txt")]);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_terminates_when_following() {
        let tmp = TempDir::new().unwrap();
        let inner = tmp.path().join("inner");
        fs::create_dir_all(&inner).unwrap();
        fs::write(inner.join("f.txt"), "x").unwrap();
        std::os::unix::fs::symlink(tmp.path(), inner.join("back")).unwrap();

        let mut config = test_config(tmp.path());
        config.follow_symlinks = true;
        let paths = walked_paths(config);
        assert_eq!(paths, vec![inner.join("f.txt")]);
    }

    #[test]
    fn nonexistent_root_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp.path().join("missing"));
        assert!(walked_paths(config).is_empty());
    }

    #[test]
    fn dropping_receiver_stops_the_pool() {
        let tmp = TempDir::new().unwrap();
        for i in 0..50 {
            let dir = tmp.path().join(format!("d{i}"));
            fs::create_dir_all(&dir).unwrap();
            for j in 0..40 {
                fs::write(dir.join(format!("f{j}.txt")), "x").unwrap();
            }
        }
        let rx = DirectoryWalker::new(test_config(tmp.path()))
            .stream()
            .unwrap();
        let first = rx.recv().unwrap();
        assert!(first.path.starts_with(tmp.path()));
        drop(rx);
    }
}
