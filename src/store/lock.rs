//! Exclusive cross-process lock over the state directory.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use log::debug;

use crate::error::{Result, SweepError};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Holds `flock(LOCK_EX)` on the lock file until dropped.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Acquire the lock, polling until `timeout` elapses.
    ///
    /// Contention past the timeout is reported as `LockTimeout` instead of
    /// being retried; it points at a stuck prior pass.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let file = open_lock_file(path)?;
        let started = Instant::now();
        loop {
            if try_lock(&file, path, started, timeout)? {
                return Ok(Self::held(file, path, started));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Same as `acquire`, but waits on the tokio timer between polls so a
    /// contended lock does not park a runtime worker.
    pub async fn acquire_async(path: &Path, timeout: Duration) -> Result<Self> {
        let file = open_lock_file(path)?;
        let started = Instant::now();
        loop {
            if try_lock(&file, path, started, timeout)? {
                return Ok(Self::held(file, path, started));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn held(file: File, path: &Path, started: Instant) -> Self {
        debug!("Acquired state lock {} after {:?}", path.display(), started.elapsed());
        Self {
            file,
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?)
}

/// One non-blocking attempt. `Ok(false)` means contended but still in time.
fn try_lock(file: &File, path: &Path, started: Instant, timeout: Duration) -> Result<bool> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            if started.elapsed() >= timeout {
                return Err(SweepError::LockTimeout {
                    path: path.to_path_buf(),
                    waited: started.elapsed(),
                });
            }
            Ok(false)
        }
        Err(e) => Err(SweepError::Io(e)),
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("Failed to release state lock {}: {}", self.path.display(), e);
        }
    }
}
