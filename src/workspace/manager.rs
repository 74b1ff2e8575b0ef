//! WorkspaceManager creates and releases one workspace per job key.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::backend::{BranchTracking, WorkspaceBackend};
use crate::domain::JobKey;
use crate::error::{Result, SweepError};

/// Manages workspace directories under a single root.
///
/// The directory name is derived from the job key, so creating it is the
/// conflict check: two acquisitions of the same key cannot both succeed.
#[derive(Clone)]
pub struct WorkspaceManager {
    /// Directory holding one subdirectory per live workspace
    root: PathBuf,
    backend: Arc<dyn WorkspaceBackend>,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>, backend: Arc<dyn WorkspaceBackend>) -> Self {
        Self {
            root: root.into(),
            backend,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace path for a key.
    pub fn path(&self, key: &JobKey) -> PathBuf {
        self.root.join(key.slug())
    }

    /// Create and materialize the workspace for `key`.
    ///
    /// Returns `SweepError::WorkspaceConflict` if the directory already
    /// exists. A failed materialize leaves no directory behind.
    pub fn acquire(&self, key: &JobKey, repo_url: &str, branch_ref: &str) -> Result<Workspace> {
        fs::create_dir_all(&self.root)
            .map_err(|e| SweepError::Workspace(format!("Failed to create workspace root: {}", e)))?;

        let path = self.path(key);
        match fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SweepError::WorkspaceConflict(key.clone()));
            }
            Err(e) => {
                return Err(SweepError::Workspace(format!(
                    "Failed to create {}: {}",
                    path.display(),
                    e
                )));
            }
        }

        let tracking = match self.backend.materialize(repo_url, branch_ref, &path) {
            Ok(tracking) => tracking,
            Err(e) => {
                if let Err(cleanup) = self.backend.remove(&path) {
                    warn!("Failed to clean up partial workspace {}: {}", path.display(), cleanup);
                }
                return Err(e);
            }
        };

        info!("Acquired workspace for {} at {}", key, path.display());
        Ok(Workspace {
            path,
            owning_key: key.clone(),
            branch_ref: branch_ref.to_string(),
            created_at: Utc::now(),
            tracking,
            backend: Arc::clone(&self.backend),
            released: false,
        })
    }

    /// Remove the workspace directory.
    pub fn release(&self, workspace: Workspace) -> Result<()> {
        workspace.release()
    }

    /// Workspace directories currently on disk.
    pub fn list_existing(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !hidden && entry.file_type()?.is_dir() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Remove a leftover workspace for `key`. Returns false if none existed.
    pub fn cleanup(&self, key: &JobKey) -> Result<bool> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(false);
        }
        self.backend.remove(&path)?;
        info!("Removed leftover workspace {}", path.display());
        Ok(true)
    }
}

impl fmt::Debug for WorkspaceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceManager").field("root", &self.root).finish()
    }
}

/// A live workspace. Removed on `release` or when dropped.
pub struct Workspace {
    pub path: PathBuf,
    pub owning_key: JobKey,
    pub branch_ref: String,
    pub created_at: DateTime<Utc>,
    pub tracking: BranchTracking,
    backend: Arc<dyn WorkspaceBackend>,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now and surface any error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.backend.remove(&self.path)?;
        debug!("Released workspace {}", self.path.display());
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        warn!("Workspace {} dropped without release, removing", self.path.display());
        if let Err(e) = self.backend.remove(&self.path) {
            warn!("Failed to remove workspace {}: {}", self.path.display(), e);
        }
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("path", &self.path)
            .field("owning_key", &self.owning_key)
            .field("branch_ref", &self.branch_ref)
            .field("created_at", &self.created_at)
            .field("tracking", &self.tracking)
            .finish()
    }
}
