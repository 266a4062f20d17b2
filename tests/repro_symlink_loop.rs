//! A symlink cycle under a watch root must not hang the scanner, even with
//! symlink following turned on.

#![cfg(unix)]

use std::fs;
use std::sync::mpsc;
use std::time::Duration;

use encoding_guardian::core::config::Config;
use encoding_guardian::daemon::clock::SystemClock;
use encoding_guardian::logger::activity::ActivityLoggerHandle;
use encoding_guardian::scanner::quarantine::QuarantineStore;
use encoding_guardian::scanner::repair::RepairEngine;
use encoding_guardian::scanner::scan::Scanner;
use tempfile::TempDir;

fn scan_with_loop(follow_symlinks: bool) -> u64 {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("scan_root");
    fs::create_dir_all(root.join("a/b/c")).unwrap();
    fs::write(root.join("a/b/c/deep.txt"), b"deep \xff").unwrap();
    // root/loop -> root
    std::os::unix::fs::symlink(&root, root.join("loop")).unwrap();

    let mut config = Config::default();
    config.scanner.follow_symlinks = follow_symlinks;
    config.scanner.parallelism = 2;
    config.paths.quarantine_dir = tmp.path().join("q");

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let scanner = Scanner::new(
            &config,
            QuarantineStore::new(config.paths.quarantine_dir.clone(), SystemClock::shared()),
            RepairEngine::new(config.encoding_table().unwrap()),
            ActivityLoggerHandle::detached(),
        );
        let tally = scanner.scan(&root).unwrap();
        tx.send(tally.issues_fixed).unwrap();
        drop(tmp);
    });

    match rx.recv_timeout(Duration::from_secs(10)) {
        Ok(fixed) => fixed,
        Err(_) => panic!("scan timed out - likely stuck in symlink loop"),
    }
}

#[test]
fn symlink_loop_is_not_followed_by_default() {
    assert_eq!(scan_with_loop(false), 1);
}

#[test]
fn symlink_loop_terminates_when_following() {
    // The file is repaired on first sight; any revisit finds it already valid.
    assert_eq!(scan_with_loop(true), 1);
}
