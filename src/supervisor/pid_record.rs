//! PID record persistence and the advisory lock guarding it.
//!
//! Record layout: first line is the PID, optional second line is the process
//! start time (seconds since Unix epoch) captured at launch. A file holding a
//! bare integer is still accepted.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::error::SupervisorError;

/// OS identifier plus captured launch time of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub pid: u32,
    /// `None` for records written without a launch time.
    pub launched_at: Option<u64>,
}

impl ProcessHandle {
    pub fn new(pid: u32, launched_at: Option<u64>) -> Self {
        Self { pid, launched_at }
    }
}

/// What was found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredRecord {
    Absent,
    Handle(ProcessHandle),
    /// Present but unparsable; holds the raw contents.
    Unreadable(String),
}

pub struct PidRecord {
    path: PathBuf,
}

impl PidRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<StoredRecord, SupervisorError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoredRecord::Absent),
            Err(e) => return Err(SupervisorError::io(&self.path, e)),
        };
        Ok(match parse_record(&contents) {
            Some(handle) => StoredRecord::Handle(handle),
            None => StoredRecord::Unreadable(contents),
        })
    }

    /// Write via temp file + rename so readers never see a half-written record.
    pub fn save(&self, handle: &ProcessHandle) -> Result<(), SupervisorError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|e| SupervisorError::io(dir, e))?;
            }
        }
        let tmp = sibling_with_suffix(&self.path, ".tmp");
        fs::write(&tmp, format_record(handle)).map_err(|e| SupervisorError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| SupervisorError::io(&self.path, e))?;
        tracing::debug!("Wrote PID record {} (pid {})", self.path.display(), handle.pid);
        Ok(())
    }

    /// Remove the record. A missing file is not an error.
    pub fn remove(&self) -> Result<(), SupervisorError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("Removed PID record {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SupervisorError::io(&self.path, e)),
        }
    }
}

fn parse_record(contents: &str) -> Option<ProcessHandle> {
    let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());
    let pid: u32 = lines.next()?.parse().ok()?;
    if pid == 0 {
        return None;
    }
    let launched_at = match lines.next() {
        Some(raw) => Some(raw.parse().ok()?),
        None => None,
    };
    Some(ProcessHandle { pid, launched_at })
}

fn format_record(handle: &ProcessHandle) -> String {
    match handle.launched_at {
        Some(ts) => format!("{}\n{}\n", handle.pid, ts),
        None => format!("{}\n", handle.pid),
    }
}

/// `server.pid` + `.lock` → `server.pid.lock`
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Scoped exclusive advisory lock around a read-check-write sequence on the
/// PID record. Released when dropped.
#[derive(Debug)]
pub struct RecordLock {
    file: File,
    path: PathBuf,
}

impl RecordLock {
    fn open(path: &Path) -> Result<File, SupervisorError> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| SupervisorError::Lock {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Blocks until the lock is available.
    pub fn acquire(path: &Path) -> Result<Self, SupervisorError> {
        let file = Self::open(path)?;
        FileExt::lock_exclusive(&file).map_err(|source| SupervisorError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Acquired lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Non-blocking variant; `Ok(None)` when another holder has it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, SupervisorError> {
        let file = Self::open(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(source) => Err(SupervisorError::Lock {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Retries `try_acquire` every `poll` until `timeout` has passed.
    pub async fn acquire_within(
        path: &Path,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Self, SupervisorError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                tracing::debug!("Acquired lock {}", path.display());
                return Ok(lock);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SupervisorError::LockTimeout {
                    path: path.to_path_buf(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_record_is_absent() {
        let dir = TempDir::new().unwrap();
        let record = PidRecord::new(dir.path().join("server.pid"));
        assert_eq!(record.load().unwrap(), StoredRecord::Absent);
    }

    #[test]
    fn save_then_load_with_launch_time() {
        let dir = TempDir::new().unwrap();
        let record = PidRecord::new(dir.path().join("server.pid"));
        let handle = ProcessHandle::new(4321, Some(1_700_000_000));
        record.save(&handle).unwrap();
        assert_eq!(record.load().unwrap(), StoredRecord::Handle(handle));
        assert!(!dir.path().join("server.pid.tmp").exists());
    }

    #[test]
    fn bare_integer_record_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.pid");
        fs::write(&path, "1234\n").unwrap();
        let record = PidRecord::new(&path);
        assert_eq!(
            record.load().unwrap(),
            StoredRecord::Handle(ProcessHandle::new(1234, None))
        );
    }

    #[test]
    fn garbage_and_zero_are_unreadable() {
        assert_eq!(parse_record("not-a-pid"), None);
        assert_eq!(parse_record("0"), None);
        assert_eq!(parse_record(""), None);
        assert_eq!(parse_record("12\nyesterday"), None);
        assert_eq!(parse_record("  77  \n"), Some(ProcessHandle::new(77, None)));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let record = PidRecord::new(dir.path().join("server.pid"));
        record.save(&ProcessHandle::new(10, None)).unwrap();
        record.remove().unwrap();
        record.remove().unwrap();
        assert_eq!(record.load().unwrap(), StoredRecord::Absent);
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.pid.lock");
        let held = RecordLock::acquire(&path).unwrap();
        assert!(RecordLock::try_acquire(&path).unwrap().is_none());
        drop(held);
        assert!(RecordLock::try_acquire(&path).unwrap().is_some());
    }

    #[tokio::test]
    async fn bounded_acquire_gives_up_while_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.pid.lock");
        let held = RecordLock::acquire(&path).unwrap();

        let begun = Instant::now();
        let err = RecordLock::acquire_within(&path, Duration::from_millis(300), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "LOCK_TIMEOUT");
        assert!(begun.elapsed() < Duration::from_secs(2));

        drop(held);
        RecordLock::acquire_within(&path, Duration::from_millis(300), Duration::from_millis(50))
            .await
            .unwrap();
    }

    #[test]
    fn suffix_is_appended_to_full_name() {
        let p = sibling_with_suffix(Path::new("/tmp/app/server.log"), ".old");
        assert_eq!(p, PathBuf::from("/tmp/app/server.log.old"));
    }
}
