//! Retention tests.
//!
//! Revision files cannot be back-dated portably, so these tests move "now"
//! forward instead of moving birth times back.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use local_history::{Clock, Config, HistoryService, RetentionPolicy};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
struct MovableClock(Arc<Mutex<DateTime<Local>>>);

impl Clock for MovableClock {
    fn now(&self) -> DateTime<Local> {
        *self.0.lock().unwrap()
    }
}

fn touch(dir: &std::path::Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"r").unwrap();
    path
}

// =============================================================================
// RetentionPolicy
// =============================================================================

#[test]
fn test_purge_31_days_deletes_29_days_keeps() {
    let dir = tempfile::tempdir().unwrap();
    let file = touch(dir.path(), "a_20230601101530.ts");
    let policy = RetentionPolicy::new(30);

    let deleted = policy.purge(&[&file], SystemTime::now() + 29 * DAY);
    assert!(deleted.is_empty());
    assert!(file.exists());

    let deleted = policy.purge(&[&file], SystemTime::now() + 31 * DAY);
    assert_eq!(deleted, vec![file.clone()]);
    assert!(!file.exists());
}

#[test]
fn test_zero_days_limit_deletes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let file = touch(dir.path(), "a_20230601101530.ts");

    let deleted = RetentionPolicy::new(0).purge(&[&file], SystemTime::now() + 3650 * DAY);

    assert!(deleted.is_empty());
    assert!(file.exists());
}

#[test]
fn test_purge_continues_past_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let gone = dir.path().join("gone_20230601101530.ts");
    let file = touch(dir.path(), "a_20230601101530.ts");

    let deleted = RetentionPolicy::new(1).purge(&[&gone, &file], SystemTime::now() + 2 * DAY);

    assert_eq!(deleted, vec![file]);
}

// =============================================================================
// Whole-tree purge
// =============================================================================

#[test]
fn test_purge_all_removes_only_expired_revisions() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap().join("proj");
    fs::create_dir_all(root.join("src")).unwrap();

    let mut config = Config::defaults(&root);
    config.days_limit = 30;
    let clock = MovableClock(Arc::new(Mutex::new(Local::now())));
    let mut service = HistoryService::with_clock(config, Box::new(clock.clone())).unwrap();

    let file = root.join("src/a.ts");
    fs::write(&file, b"A").unwrap();
    service.did_save(&file, b"A").unwrap();

    let stray = root.join(".history/src/notes.txt");
    fs::write(&stray, b"not a revision").unwrap();

    *clock.0.lock().unwrap() = Local::now() + chrono::Duration::days(29);
    assert!(service.purge_all().unwrap().is_empty());

    *clock.0.lock().unwrap() = Local::now() + chrono::Duration::days(31);
    let deleted = service.purge_all().unwrap();

    assert_eq!(deleted.len(), 1);
    assert!(service.find_all_history(&file, true).unwrap().is_empty());
    assert!(stray.exists(), "non-revision files are left alone");
    assert!(root.join(".history/src").is_dir(), "directories are left behind");
}

#[test]
fn test_purge_all_without_history_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::defaults(dir.path().canonicalize().unwrap());
    let service = HistoryService::new(config).unwrap();

    assert!(service.purge_all().unwrap().is_empty());
}
