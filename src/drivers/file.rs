//! File Driver
//!
//! One file per key under `<base>/<sha1[0:3]>/<sha1[3:]>`, each holding a
//! binary [`CacheEntry`] envelope.
//!
//! # Locking
//! Reads take a shared `flock`, writes an exclusive one, always on the
//! key's own file. Writers truncate and write only after the exclusive lock
//! is held, so the lock-free `has` check never sees a torn entry; at worst it
//! sees an empty file and re-checks under the lock. Different keys never
//! contend.
//!
//! Eviction unlinks files, so a lock holder must confirm the path still
//! names the inode it locked. Writers that lose that race reopen and retry.
//! An empty file belongs to a writer between `open` and `flock` and is
//! never evicted.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use nix::fcntl::{flock, FlockArg};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::cache::{system_clock, CacheEntry, SharedClock};
use crate::drivers::CacheDriver;
use crate::error::{CacheError, Result};

// == Options ==
/// Construction settings for [`FileDriver`].
#[derive(Debug, Clone)]
pub struct FileDriverOptions {
    /// Root directory of the store
    pub base: PathBuf,
    /// Default expiry, used to back-date file modification times
    pub cache_expiry: u64,
    /// Keep decoded entries in an in-process shadow map
    pub warm: bool,
}

impl FileDriverOptions {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            cache_expiry: 0,
            warm: false,
        }
    }

    pub fn cache_expiry(mut self, secs: u64) -> Self {
        self.cache_expiry = secs;
        self
    }

    pub fn warm(mut self, enabled: bool) -> Self {
        self.warm = enabled;
        self
    }
}

/// Decoded entry remembered together with the file stamp it came from.
#[derive(Debug, Clone)]
struct WarmEntry {
    modified: SystemTime,
    len: u64,
    entry: CacheEntry,
}

// == Locked File ==
/// An open file holding an advisory lock, released on drop.
struct LockedFile {
    file: File,
}

impl LockedFile {
    fn acquire(file: File, exclusive: bool, path: &Path) -> Result<Self> {
        let arg = if exclusive {
            FlockArg::LockExclusive
        } else {
            FlockArg::LockShared
        };
        flock(file.as_raw_fd(), arg).map_err(|errno| CacheError::LockAcquisition {
            path: path.to_path_buf(),
            source: io::Error::from(errno),
        })?;
        Ok(Self { file })
    }

    /// Whether `path` still names the locked inode.
    fn is_linked_at(&self, path: &Path) -> io::Result<bool> {
        let held = self.file.metadata()?;
        if held.nlink() == 0 {
            return Ok(false);
        }
        match fs::metadata(path) {
            Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        (&self.file).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        if let Err(e) = flock(self.file.as_raw_fd(), FlockArg::Unlock) {
            warn!("Failed to release file lock: {}", e);
        }
    }
}

// == File Driver ==
/// Durable local store with per-key advisory locking.
#[derive(Debug)]
pub struct FileDriver {
    base: PathBuf,
    cache_expiry: u64,
    clock: SharedClock,
    warm: Option<HashMap<PathBuf, WarmEntry>>,
}

impl FileDriver {
    pub fn new(options: FileDriverOptions) -> Self {
        Self::with_clock(options, system_clock())
    }

    pub fn with_clock(options: FileDriverOptions, clock: SharedClock) -> Self {
        Self {
            base: options.base,
            cache_expiry: options.cache_expiry,
            clock,
            warm: options.warm.then(HashMap::new),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    // == Path Layout ==
    /// Location of the file backing a physical key.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha1::digest(key.as_bytes()));
        self.base.join(&digest[..3]).join(&digest[3..])
    }

    /// Reads the entry under a shared lock, or from the warm map when the
    /// file still carries the stamp of the remembered write.
    fn read_entry(&mut self, path: &Path) -> Result<Option<CacheEntry>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let locked = LockedFile::acquire(file, false, path)?;

        if let Some(warm) = &self.warm {
            let meta = locked.file.metadata()?;
            if let Some(hit) = warm.get(path) {
                if meta.len() == hit.len && meta.modified().ok() == Some(hit.modified) {
                    return Ok(Some(hit.entry.clone()));
                }
            }
        }

        let data = locked.read_all()?;
        drop(locked);

        if data.is_empty() {
            return Ok(None);
        }
        match CacheEntry::from_envelope(&data) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!("Discarding unreadable cache file {}: {}", path.display(), e);
                self.evict_if_stale(path)?;
                Ok(None)
            }
        }
    }

    /// Removes the file if, under the exclusive lock, it is still expired
    /// or unreadable. A fresh value written meanwhile, an empty file and a
    /// file already replaced at `path` are left alone.
    fn evict_if_stale(&mut self, path: &Path) -> Result<()> {
        if let Some(warm) = &mut self.warm {
            warm.remove(path);
        }
        let file = match OpenOptions::new().read(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let locked = LockedFile::acquire(file, true, path)?;
        if !locked.is_linked_at(path)? {
            return Ok(());
        }
        let data = locked.read_all()?;
        if data.is_empty() {
            return Ok(());
        }
        let stale = match CacheEntry::from_envelope(&data) {
            Ok(entry) => entry.is_expired(self.clock.timestamp()),
            Err(_) => true,
        };
        if stale {
            debug!("Evicting stale cache file {}", path.display());
            remove_file_if_exists(path)?;
        }
        Ok(())
    }

    /// Deletes every file, then every emptied directory, below `dir`.
    fn purge_dir(dir: &Path) -> io::Result<()> {
        for item in fs::read_dir(dir)? {
            let item = item?;
            let path = item.path();
            if item.file_type()?.is_dir() {
                Self::purge_dir(&path)?;
                fs::remove_dir(&path)?;
            } else {
                remove_file_if_exists(&path)?;
            }
        }
        Ok(())
    }
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl CacheDriver for FileDriver {
    fn name(&self) -> &'static str {
        "file"
    }

    fn raw_get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        let Some(entry) = self.read_entry(&path)? else {
            return Ok(None);
        };
        if entry.is_expired(self.clock.timestamp()) {
            self.evict_if_stale(&path)?;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    fn raw_set(&mut self, key: &str, payload: Vec<u8>, ttl: Option<u64>) -> Result<bool> {
        let path = self.path_for(key);
        if let Some(dir) = path.parent() {
            // Sibling keys may race to create the same directory.
            match fs::create_dir_all(dir) {
                Err(e) if e.kind() != ErrorKind::AlreadyExists => return Err(e.into()),
                _ => {}
            }
        }

        let entry = CacheEntry::new(key, payload, ttl, self.clock.timestamp());
        let envelope = entry.to_envelope();

        let locked = loop {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
            let locked = LockedFile::acquire(file, true, &path)?;
            if locked.is_linked_at(&path)? {
                break locked;
            }
            debug!("Cache file {} was evicted while waiting, reopening", path.display());
        };

        let mut out = &locked.file;
        locked.file.set_len(0)?;
        out.seek(SeekFrom::Start(0))?;
        out.write_all(&envelope)?;
        out.flush()?;

        // Back-date the stamp so warm readers treat the file as settled.
        let modified = SystemTime::now()
            .checked_sub(Duration::from_secs(self.cache_expiry))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        locked.file.set_modified(modified)?;

        if let Some(warm) = &mut self.warm {
            let stamp = locked.file.metadata()?.modified()?;
            warm.insert(
                path.clone(),
                WarmEntry {
                    modified: stamp,
                    len: envelope.len() as u64,
                    entry,
                },
            );
        }
        drop(locked);

        debug!("Wrote cache file {}", path.display());
        Ok(true)
    }

    fn raw_delete(&mut self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        if let Some(warm) = &mut self.warm {
            warm.remove(&path);
        }
        remove_file_if_exists(&path)?;
        Ok(true)
    }

    fn raw_exists(&mut self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let now = self.clock.timestamp();
        match CacheEntry::from_envelope(&data) {
            Ok(entry) if !entry.is_expired(now) => Ok(true),
            _ => {
                // Stale, or caught mid-write; settle it under the lock.
                self.evict_if_stale(&path)?;
                Ok(self
                    .read_entry(&path)?
                    .is_some_and(|entry| !entry.is_expired(now)))
            }
        }
    }

    fn raw_clear(&mut self, _scope: Option<&str>) -> Result<bool> {
        if let Some(warm) = &mut self.warm {
            warm.clear();
        }
        match Self::purge_dir(&self.base) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(true),
        }
    }
}
