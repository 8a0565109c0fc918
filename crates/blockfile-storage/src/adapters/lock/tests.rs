//! # Lock Tests

use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_lock_acquire_creates_file() {
    let dir = TempDir::new().unwrap();

    let lock = DatabaseLock::acquire(dir.path()).expect("Should acquire lock");
    assert!(lock.path().exists());
    assert_eq!(lock.path(), dir.path().join(LOCK_FILE));
    assert_eq!(lock.pid(), std::process::id());
}

#[test]
fn test_lock_contains_pid() {
    let dir = TempDir::new().unwrap();

    let lock = DatabaseLock::acquire(dir.path()).expect("Should acquire lock");
    let content = fs::read_to_string(lock.path()).unwrap();
    let stored_pid: u32 = content.trim().parse().unwrap();
    assert_eq!(stored_pid, std::process::id());
}

#[test]
fn test_double_lock_reports_holder() {
    let dir = TempDir::new().unwrap();

    let _lock = DatabaseLock::acquire(dir.path()).expect("First lock should succeed");

    match DatabaseLock::acquire(dir.path()) {
        Err(LockError::AlreadyLocked { pid, path }) => {
            assert_eq!(pid, Some(std::process::id()));
            assert_eq!(path, dir.path().join(LOCK_FILE));
        }
        other => panic!("Expected AlreadyLocked, got {other:?}"),
    }
}

#[test]
fn test_lock_released_on_drop() {
    let dir = TempDir::new().unwrap();

    {
        let _lock = DatabaseLock::acquire(dir.path()).expect("Should acquire");
    }
    // The file stays; only the lock on it is released.
    assert!(dir.path().join(LOCK_FILE).exists());

    let again = DatabaseLock::acquire(dir.path()).expect("Should acquire after release");
    assert!(matches!(
        DatabaseLock::acquire(dir.path()),
        Err(LockError::AlreadyLocked { .. })
    ));
    drop(again);
}

#[test]
fn test_stale_lock_file_is_reused() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(LOCK_FILE), "999999\n").unwrap();

    let lock = DatabaseLock::acquire(dir.path()).expect("Unheld lock file is free");
    let content = fs::read_to_string(lock.path()).unwrap();
    assert_eq!(content.trim(), std::process::id().to_string());
}
