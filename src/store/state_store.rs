//! File-backed state store with a single locked critical section.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{StateLock, StateSet};
use crate::domain::{ApprovalGrant, AttemptRecord, GlobalRunCounter};
use crate::error::{Result, SweepError};

pub const ATTEMPTS_FILE: &str = "attempts.json";
pub const GLOBAL_FILE: &str = "global.json";
pub const APPROVAL_FILE: &str = "approval.json";
pub const LOCK_FILE: &str = "state.lock";

/// Durable record set guarded by an exclusive file lock.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl StateStore {
    /// Open the store at `dir`, creating the directory if needed and
    /// validating every record so corruption surfaces before any work.
    pub fn open(dir: impl Into<PathBuf>, lock_timeout: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let store = Self { dir, lock_timeout };
        let state = store.load()?;
        info!(
            "Opened state store at {} ({} attempt records, {} total runs)",
            store.dir.display(),
            state.attempts.len(),
            state.global.total_runs
        );
        Ok(store)
    }

    /// Snapshot of all records, read under the lock.
    pub fn load(&self) -> Result<StateSet> {
        self.with_lock(|state| Ok(state.clone()))
    }

    /// Run `f` while holding the exclusive lock over the whole record set.
    ///
    /// State is re-read from disk after the lock is taken. If `f` succeeds,
    /// every record it changed is replaced atomically before the lock is
    /// released. If `f` fails nothing is written.
    pub fn with_lock<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StateSet) -> Result<T>,
    {
        let lock = StateLock::acquire(&self.dir.join(LOCK_FILE), self.lock_timeout)?;
        self.apply(lock, f)
    }

    /// `with_lock` for async callers: waiting for the lock yields to the
    /// runtime. The closure itself still runs inline.
    pub async fn with_lock_async<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StateSet) -> Result<T>,
    {
        let lock = StateLock::acquire_async(&self.dir.join(LOCK_FILE), self.lock_timeout).await?;
        self.apply(lock, f)
    }

    fn apply<T, F>(&self, _lock: StateLock, f: F) -> Result<T>
    where
        F: FnOnce(&mut StateSet) -> Result<T>,
    {
        let before = self.read_all()?;
        let mut state = before.clone();
        let value = f(&mut state)?;

        if state.attempts != before.attempts {
            write_atomic(&self.dir.join(ATTEMPTS_FILE), &state.attempts)?;
        }
        if state.global != before.global {
            write_atomic(&self.dir.join(GLOBAL_FILE), &state.global)?;
        }
        if state.approval != before.approval {
            match &state.approval {
                Some(grant) => write_atomic(&self.dir.join(APPROVAL_FILE), grant)?,
                None => remove_if_exists(&self.dir.join(APPROVAL_FILE))?,
            }
        }

        Ok(value)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_all(&self) -> Result<StateSet> {
        let attempts: BTreeMap<String, AttemptRecord> =
            read_record(&self.dir.join(ATTEMPTS_FILE))?.unwrap_or_default();

        for (name, record) in &attempts {
            if *name != record.key.to_string() {
                return Err(SweepError::StateCorruption {
                    path: self.dir.join(ATTEMPTS_FILE),
                    reason: format!("entry {} holds record for {}", name, record.key),
                });
            }
        }

        let global: GlobalRunCounter = read_record(&self.dir.join(GLOBAL_FILE))?.unwrap_or_default();
        let approval: Option<ApprovalGrant> = read_record(&self.dir.join(APPROVAL_FILE))?;

        Ok(StateSet {
            attempts,
            global,
            approval,
        })
    }
}

/// Missing file means "no record"; unparseable content is corruption.
fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SweepError::Io(e)),
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| SweepError::StateCorruption {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Write to `<path>.tmp`, fsync, then rename over `path`.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let mut file = File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;

    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        // Directory fsync is not supported everywhere
        let _ = dir.sync_all();
    }

    debug!("Persisted {}", path.display());
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SweepError::Io(e)),
    }
}
