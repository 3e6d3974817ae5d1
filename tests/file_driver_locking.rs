//! Integration Tests for File Driver Locking
//!
//! Uses independent file descriptors, as separate processes would, to check
//! that writers to one key serialize while other keys stay unaffected.

#![cfg(unix)]

use std::fs::{self, File};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use nix::fcntl::{flock, FlockArg};
use polycache::{
    cache::{MockClock, SharedClock},
    drivers::{FileDriver, FileDriverOptions},
    BaseCache, CacheConfig, Ttl,
};
use tempfile::TempDir;

// == Helper Functions ==

fn open_cache(dir: &Path) -> BaseCache<FileDriver> {
    BaseCache::new(
        FileDriver::new(FileDriverOptions::new(dir)),
        CacheConfig::new(),
    )
}

fn open_clocked_cache(dir: &Path, clock: &SharedClock) -> BaseCache<FileDriver> {
    BaseCache::with_clock(
        FileDriver::with_clock(FileDriverOptions::new(dir), clock.clone()),
        CacheConfig::new(),
        clock.clone(),
    )
}

/// Holds an exclusive lock on `path` until dropped.
struct HeldLock(File);

impl HeldLock {
    fn exclusive(path: &Path) -> Self {
        let file = File::open(path).unwrap();
        flock(file.as_raw_fd(), FlockArg::LockExclusive).unwrap();
        Self(file)
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        let _ = flock(self.0.as_raw_fd(), FlockArg::Unlock);
    }
}

const SETTLE: Duration = Duration::from_millis(200);
const DEADLINE: Duration = Duration::from_secs(10);

// == Locking Tests ==

#[test]
fn test_same_key_writer_waits_for_lock() {
    let dir = TempDir::new().unwrap();
    let mut cache = open_cache(dir.path());
    cache.set("shared", "first", Ttl::Default).unwrap();

    let lock = HeldLock::exclusive(&cache.driver().path_for("shared"));

    let (done_tx, done_rx) = mpsc::channel();
    let base = dir.path().to_path_buf();
    let writer = thread::spawn(move || {
        let mut other = open_cache(&base);
        let stored = other.set("shared", "second", Ttl::Default).unwrap();
        done_tx.send(stored).unwrap();
    });

    assert!(
        done_rx.recv_timeout(SETTLE).is_err(),
        "writer finished while the key was locked"
    );

    drop(lock);
    assert!(done_rx.recv_timeout(DEADLINE).unwrap());
    writer.join().unwrap();

    assert_eq!(cache.get("shared", String::new()).unwrap(), "second");
}

#[test]
fn test_reader_waits_for_writer_lock() {
    let dir = TempDir::new().unwrap();
    let mut cache = open_cache(dir.path());
    cache.set("k", 1, Ttl::Default).unwrap();

    let lock = HeldLock::exclusive(&cache.driver().path_for("k"));

    let (done_tx, done_rx) = mpsc::channel();
    let base = dir.path().to_path_buf();
    let reader = thread::spawn(move || {
        let mut other = open_cache(&base);
        done_tx.send(other.get("k", 0).unwrap()).unwrap();
    });

    assert!(done_rx.recv_timeout(SETTLE).is_err());

    drop(lock);
    assert_eq!(done_rx.recv_timeout(DEADLINE).unwrap(), 1);
    reader.join().unwrap();
}

#[test]
fn test_other_keys_do_not_block() {
    let dir = TempDir::new().unwrap();
    let mut cache = open_cache(dir.path());
    cache.set("busy", "v", Ttl::Default).unwrap();

    let _lock = HeldLock::exclusive(&cache.driver().path_for("busy"));

    let (done_tx, done_rx) = mpsc::channel();
    let base = dir.path().to_path_buf();
    let writer = thread::spawn(move || {
        let mut other = open_cache(&base);
        other.set("idle", "free", Ttl::Default).unwrap();
        done_tx.send(other.get("idle", String::new()).unwrap()).unwrap();
    });

    assert_eq!(done_rx.recv_timeout(DEADLINE).unwrap(), "free");
    writer.join().unwrap();
}

#[test]
fn test_has_does_not_take_the_lock() {
    let dir = TempDir::new().unwrap();
    let mut cache = open_cache(dir.path());
    cache.set("flag", true, Ttl::Default).unwrap();

    let _lock = HeldLock::exclusive(&cache.driver().path_for("flag"));

    let (done_tx, done_rx) = mpsc::channel();
    let base = dir.path().to_path_buf();
    let checker = thread::spawn(move || {
        let mut other = open_cache(&base);
        done_tx.send(other.has("flag").unwrap()).unwrap();
    });

    assert!(done_rx.recv_timeout(DEADLINE).unwrap());
    checker.join().unwrap();
}

#[test]
fn test_concurrent_writers_leave_a_complete_entry() {
    let dir = TempDir::new().unwrap();
    let payloads: Vec<String> = (0..8)
        .map(|i| format!("writer-{i}-").repeat(64 * (i + 1)))
        .collect();

    let handles: Vec<_> = payloads
        .iter()
        .cloned()
        .map(|payload| {
            let base = dir.path().to_path_buf();
            thread::spawn(move || {
                let mut cache = open_cache(&base);
                for _ in 0..20 {
                    cache.set("contended", payload.clone(), Ttl::Default).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut cache = open_cache(dir.path());
    let value: String = cache.get("contended", String::new()).unwrap();
    assert!(payloads.contains(&value));
}

// == Eviction Race Tests ==

#[test]
fn test_writer_reopens_after_its_file_is_evicted() {
    let dir = TempDir::new().unwrap();
    let mut cache = open_cache(dir.path());
    cache.set("k", "old", Ttl::Default).unwrap();
    let path = cache.driver().path_for("k");

    let lock = HeldLock::exclusive(&path);

    let (done_tx, done_rx) = mpsc::channel();
    let base = dir.path().to_path_buf();
    let writer = thread::spawn(move || {
        let mut other = open_cache(&base);
        done_tx.send(other.set("k", "new", Ttl::Default).unwrap()).unwrap();
    });

    assert!(done_rx.recv_timeout(SETTLE).is_err());

    // Unlink the file the writer is queued on, as an evicting reader would.
    fs::remove_file(&path).unwrap();
    drop(lock);

    assert!(done_rx.recv_timeout(DEADLINE).unwrap());
    writer.join().unwrap();

    assert!(path.is_file());
    assert_eq!(cache.get("k", String::new()).unwrap(), "new");
}

#[test]
fn test_eviction_never_drops_a_concurrent_write() {
    let dir = TempDir::new().unwrap();
    let clock = MockClock::default();
    let shared: SharedClock = Arc::new(clock.clone());

    for round in 0..100 {
        let mut reader = open_clocked_cache(dir.path(), &shared);
        reader.set("k", "stale", Ttl::Seconds(1)).unwrap();
        clock.advance(2);

        let fresh = format!("fresh-{round}");
        let mut writer_cache = open_clocked_cache(dir.path(), &shared);
        let value = fresh.clone();
        let writer = thread::spawn(move || {
            assert!(writer_cache.set("k", value, Ttl::Default).unwrap());
        });

        let _ = reader.get("k", String::new()).unwrap();
        writer.join().unwrap();

        assert_eq!(reader.get("k", String::new()).unwrap(), fresh);
    }
}
