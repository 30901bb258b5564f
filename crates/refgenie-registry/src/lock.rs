//! Lock-protected persistence of the shared genome configuration.
//!
//! Every process that touches a configuration file coordinates through an
//! advisory lock on a sibling file (`<config>.lock`):
//!
//! - readers take a shared lock, parse, and release;
//! - writers take the exclusive lock, re-read the file, apply their
//!   mutation, write a temporary file in the same directory, and rename it
//!   over the original before releasing.
//!
//! A reader therefore never sees a half-written file, and a crash mid-write
//! leaves the previous file in place. The exclusive holder writes a small
//! JSON record into the lock file so that a waiter that times out can say who
//! holds it, and so a record left behind by a dead process can be detected
//! and reclaimed explicitly.
//!
//! The lock file itself is never deleted. Every process must lock the same
//! inode, so reclaiming only clears the record while holding the lock.
//!
//! Locks are filesystem scoped: they order processes that share the same view
//! of the file, not machines.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fs4::fs_std::FileExt;
use refgenie_core::GenomeConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RegistryError, Result};

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// Who holds (or last held) the exclusive lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub host: String,
    pub token: Uuid,
    /// Milliseconds since the Unix epoch.
    pub acquired_at: u64,
}

impl LockHolder {
    fn current() -> Self {
        LockHolder {
            pid: std::process::id(),
            host: hostname(),
            token: Uuid::new_v4(),
            acquired_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }

}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} on {}", self.pid, self.host)
    }
}

/// Result of [`LockedConfigFile::lock_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// Nobody holds the lock and no holder record is left behind.
    Free,
    /// The lock is held. Shared holders leave no record.
    Held(Option<LockHolder>),
    /// Nobody holds the lock, but a record was left behind by a holder that
    /// died before clearing it.
    Stale(LockHolder),
}

/// Modification stamp of the configuration file, used to detect that an
/// in-memory copy is out of date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

/// A parsed configuration together with the stamp of the file it came from.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub config: GenomeConfig,
    pub stamp: FileStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Held lock; released (and the holder record cleared) on drop, including
/// on every error path.
struct LockGuard {
    file: File,
    mode: LockMode,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.mode == LockMode::Exclusive {
            let _ = self.file.set_len(0);
        }
        let _ = FileExt::unlock(&self.file);
    }
}

/// A configuration file shared between processes.
#[derive(Debug, Clone)]
pub struct LockedConfigFile {
    path: PathBuf,
    lock_path: PathBuf,
    timeout: Duration,
}

impl LockedConfigFile {
    /// Wrap `path`; lock waits give up after `timeout`.
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        let path = path.into();
        let mut lock_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "genome_config.yaml".into());
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        LockedConfigFile {
            path,
            lock_path,
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Directory holding the configuration file.
    pub fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write `initial` if the file does not exist yet. Returns whether it
    /// was created; an existing file is left untouched.
    pub fn initialize(&self, initial: &GenomeConfig) -> Result<bool> {
        std::fs::create_dir_all(self.dir())
            .map_err(|e| RegistryError::storage(self.dir(), format!("creating config dir: {e}")))?;
        let _guard = self.acquire(LockMode::Exclusive)?;
        if self.exists() {
            return Ok(false);
        }
        self.write_atomically(initial)?;
        debug!(path = %self.path.display(), "initialized genome configuration");
        Ok(true)
    }

    /// Load the file under a shared lock.
    pub fn read(&self) -> Result<ConfigSnapshot> {
        let _guard = self.acquire(LockMode::Shared)?;
        self.load_unlocked()
    }

    /// Apply `mutate` to a freshly loaded copy under the exclusive lock and
    /// persist the result.
    ///
    /// If `mutate` fails, nothing is written. If it leaves the configuration
    /// unchanged, nothing is written either. Returns the committed snapshot
    /// together with the closure's value.
    pub fn update<T, F>(&self, mutate: F) -> Result<(ConfigSnapshot, T)>
    where
        F: FnOnce(&mut GenomeConfig) -> Result<T>,
    {
        let _guard = self.acquire(LockMode::Exclusive)?;
        let current = self.load_unlocked()?;
        let mut config = current.config.clone();
        let value = mutate(&mut config)?;

        if config == current.config {
            debug!(path = %self.path.display(), "configuration unchanged, skipping write");
            return Ok((current, value));
        }

        let stamp = self.write_atomically(&config)?;
        debug!(path = %self.path.display(), "configuration committed");
        Ok((ConfigSnapshot { config, stamp }, value))
    }

    /// Current stamp of the file on disk.
    pub fn stamp(&self) -> Result<FileStamp> {
        let meta = std::fs::metadata(&self.path)
            .map_err(|e| RegistryError::storage(&self.path, format!("stat config: {e}")))?;
        Ok(FileStamp {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }

    /// Whether the file changed since `snapshot` was taken.
    pub fn is_stale(&self, snapshot: &ConfigSnapshot) -> bool {
        self.stamp().map(|s| s != snapshot.stamp).unwrap_or(true)
    }

    /// Inspect the lock without waiting.
    pub fn lock_status(&self) -> Result<LockStatus> {
        let file = self.open_lock_file()?;
        let holder = read_holder(&self.lock_path);
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                Ok(match holder {
                    Some(h) => LockStatus::Stale(h),
                    None => LockStatus::Free,
                })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(LockStatus::Held(holder)),
            Err(e) => Err(RegistryError::storage(&self.lock_path, e)),
        }
    }

    /// Explicitly clear a holder record left behind by a dead process.
    ///
    /// The exclusive lock is taken (without waiting) and held while the
    /// record is truncated, so a live holder is never disturbed. Fails with
    /// [`RegistryError::LockNotStale`] when the lock is held or no record is
    /// left. Nothing in this crate calls it implicitly.
    pub fn reclaim_stale_lock(&self) -> Result<LockHolder> {
        let file = self.open_lock_file()?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                let detail = match read_holder(&self.lock_path) {
                    Some(h) => format!("held by {h}"),
                    None => "held by readers".to_string(),
                };
                return Err(RegistryError::LockNotStale {
                    path: self.path.clone(),
                    detail,
                });
            }
            Err(e) => return Err(RegistryError::storage(&self.lock_path, e)),
        }
        let guard = LockGuard {
            file,
            mode: LockMode::Exclusive,
        };

        let Some(holder) = read_holder(&self.lock_path) else {
            return Err(RegistryError::LockNotStale {
                path: self.path.clone(),
                detail: "nobody holds it".to_string(),
            });
        };
        guard.file.set_len(0)?;
        warn!(
            path = %self.path.display(),
            holder = %holder,
            "reclaimed stale configuration lock"
        );
        Ok(holder)
    }

    fn acquire(&self, mode: LockMode) -> Result<LockGuard> {
        let file = self.open_lock_file()?;
        let started = Instant::now();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match attempt {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(RegistryError::storage(&self.lock_path, e)),
            }

            let waited = started.elapsed();
            if waited >= self.timeout {
                let holder = read_holder(&self.lock_path).map(|h| h.to_string());
                warn!(
                    path = %self.path.display(),
                    waited_ms = waited.as_millis() as u64,
                    "timed out waiting for configuration lock"
                );
                return Err(RegistryError::LockTimeout {
                    path: self.path.clone(),
                    waited_ms: waited.as_millis(),
                    holder,
                });
            }
            std::thread::sleep(backoff.min(self.timeout - waited));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        let mut guard = LockGuard { file, mode };
        if mode == LockMode::Exclusive {
            let record = serde_json::to_vec(&LockHolder::current())?;
            guard.file.set_len(0)?;
            guard.file.write_all(&record)?;
            guard.file.flush()?;
        }
        debug!(path = %self.path.display(), ?mode, "acquired configuration lock");
        Ok(guard)
    }

    fn open_lock_file(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| RegistryError::storage(&self.lock_path, format!("opening lock file: {e}")))
    }

    fn load_unlocked(&self) -> Result<ConfigSnapshot> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| RegistryError::storage(&self.path, format!("reading config: {e}")))?;
        let stamp = self.stamp()?;
        let config = GenomeConfig::from_yaml_str(&text)?;
        Ok(ConfigSnapshot { config, stamp })
    }

    fn write_atomically(&self, config: &GenomeConfig) -> Result<FileStamp> {
        let text = config.to_yaml_string()?;
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempfile_in(self.dir())
            .map_err(|e| RegistryError::storage(self.dir(), format!("creating temp file: {e}")))?;
        tmp.write_all(text.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| RegistryError::storage(&self.path, format!("replacing config: {}", e.error)))?;

        self.stamp()
    }
}

fn read_holder(lock_path: &Path) -> Option<LockHolder> {
    let data = std::fs::read(lock_path).ok()?;
    if data.is_empty() {
        return None;
    }
    serde_json::from_slice(&data).ok()
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/proc/sys/kernel/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use refgenie_core::{AssetDigest, TagRecord, TagRef};

    fn setup(timeout: Duration) -> (tempfile::TempDir, LockedConfigFile) {
        let dir = tempfile::tempdir().unwrap();
        let file = LockedConfigFile::new(dir.path().join("genome_config.yaml"), timeout);
        file.initialize(&GenomeConfig::new(dir.path().join("genomes")))
            .unwrap();
        (dir, file)
    }

    fn register(cfg: &mut GenomeConfig, r: &str, digest: &str) -> Result<()> {
        cfg.register_tag(
            &TagRef::parse(r).unwrap(),
            TagRecord {
                asset_path: PathBuf::from("x"),
                digest: Some(AssetDigest::from_hex(digest)),
                ..TagRecord::default()
            },
            false,
        )?;
        Ok(())
    }

    #[test]
    fn initialize_does_not_clobber() {
        let (dir, file) = setup(Duration::from_secs(1));
        file.update(|cfg| register(cfg, "hg38/fasta:default", "aa"))
            .unwrap();
        let created = file
            .initialize(&GenomeConfig::new(dir.path().join("other")))
            .unwrap();
        assert!(!created);
        assert!(file.read().unwrap().config.tag("hg38", "fasta", "default").is_ok());
    }

    #[test]
    fn update_rereads_changes_from_other_handles() {
        let (_dir, a) = setup(Duration::from_secs(1));
        let b = LockedConfigFile::new(a.path(), Duration::from_secs(1));

        let stale = a.read().unwrap();
        b.update(|cfg| register(cfg, "hg38/fasta:default", "aa"))
            .unwrap();
        assert!(a.is_stale(&stale));

        let (snapshot, ()) = a
            .update(|cfg| register(cfg, "mm10/fasta:default", "bb"))
            .unwrap();
        assert!(snapshot.config.tag("hg38", "fasta", "default").is_ok());
        assert!(snapshot.config.tag("mm10", "fasta", "default").is_ok());
        assert!(!a.is_stale(&snapshot));
    }

    #[test]
    fn failed_mutation_writes_nothing() {
        let (_dir, file) = setup(Duration::from_secs(1));
        file.update(|cfg| register(cfg, "hg38/fasta:default", "aa"))
            .unwrap();
        let before = std::fs::read(file.path()).unwrap();

        let err = file
            .update(|cfg| register(cfg, "hg38/fasta:default", "bb"))
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Store(refgenie_core::StoreError::AssetExists { .. })
        ));
        assert_eq!(std::fs::read(file.path()).unwrap(), before);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let (dir, file) = setup(Duration::from_secs(1));
        file.update(|cfg| register(cfg, "hg38/fasta:default", "aa"))
            .unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn exclusive_holder_blocks_writers_until_timeout() {
        let (_dir, file) = setup(Duration::from_millis(300));
        let before = std::fs::read(file.path()).unwrap();

        let held = file.acquire(LockMode::Exclusive).unwrap();
        let other = LockedConfigFile::new(file.path(), Duration::from_millis(300));
        let started = Instant::now();
        let err = other
            .update(|cfg| register(cfg, "hg38/fasta:default", "aa"))
            .unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(300));

        match err {
            RegistryError::LockTimeout { holder, .. } => {
                let holder = holder.unwrap();
                assert!(holder.contains(&std::process::id().to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(file.lock_status().unwrap(), LockStatus::Held(Some(_))));
        drop(held);

        assert_eq!(std::fs::read(file.path()).unwrap(), before);
        assert_eq!(file.lock_status().unwrap(), LockStatus::Free);
    }

    #[test]
    fn readers_share_the_lock() {
        let (_dir, file) = setup(Duration::from_millis(200));
        let _reader = file.acquire(LockMode::Shared).unwrap();
        let other = LockedConfigFile::new(file.path(), Duration::from_millis(200));
        assert!(other.read().is_ok());
    }

    #[test]
    fn stale_record_detected_and_reclaimed_explicitly() {
        let (_dir, file) = setup(Duration::from_millis(200));
        assert!(matches!(
            file.reclaim_stale_lock(),
            Err(RegistryError::LockNotStale { .. })
        ));

        let ghost = LockHolder {
            pid: 999_999_999,
            host: hostname(),
            token: Uuid::new_v4(),
            acquired_at: 0,
        };
        std::fs::write(file.lock_path(), serde_json::to_vec(&ghost).unwrap()).unwrap();
        assert_eq!(file.lock_status().unwrap(), LockStatus::Stale(ghost.clone()));

        let reclaimed = file.reclaim_stale_lock().unwrap();
        assert_eq!(reclaimed, ghost);
        assert_eq!(file.lock_status().unwrap(), LockStatus::Free);
        assert!(file.lock_path().is_file());
        assert_eq!(std::fs::metadata(file.lock_path()).unwrap().len(), 0);
    }

    #[test]
    fn reclaim_never_touches_a_held_lock() {
        let (_dir, file) = setup(Duration::from_millis(200));
        let held = file.acquire(LockMode::Exclusive).unwrap();

        let ghost = LockHolder {
            pid: 999_999_999,
            host: hostname(),
            token: Uuid::new_v4(),
            acquired_at: 0,
        };
        std::fs::write(file.lock_path(), serde_json::to_vec(&ghost).unwrap()).unwrap();
        assert_eq!(file.lock_status().unwrap(), LockStatus::Held(Some(ghost.clone())));

        let other = LockedConfigFile::new(file.path(), Duration::from_millis(200));
        assert!(matches!(
            other.reclaim_stale_lock(),
            Err(RegistryError::LockNotStale { .. })
        ));
        assert_eq!(read_holder(file.lock_path()), Some(ghost));

        // The holder still excludes writers through the same lock file.
        assert!(matches!(
            other.update(|cfg| register(cfg, "hg38/fasta:default", "aa")),
            Err(RegistryError::LockTimeout { .. })
        ));
        drop(held);
        assert!(other
            .update(|cfg| register(cfg, "hg38/fasta:default", "aa"))
            .is_ok());
    }

    #[test]
    fn incompatible_file_fails_to_load() {
        let (_dir, file) = setup(Duration::from_millis(200));
        std::fs::write(file.path(), "config_version: 0.3\ngenome_folder: /g\n").unwrap();
        let err = file.read().unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Store(refgenie_core::StoreError::ConfigVersion { .. })
        ));
    }
}
