//! Version-control primitives behind the workspace manager.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, warn};

use crate::domain::escape_name;
use crate::error::{Result, SweepError};

/// Per-branch git config flag marking branches this backend created.
const CREATED_FLAG: &str = "prsweepcreated";

/// How the workspace branch was set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchTracking {
    /// A local branch of that name already existed and was checked out
    LocalBranch,
    /// A new local branch was created tracking the remote branch
    RemoteTracking,
}

/// Materializes and removes workspace directories.
///
/// Synchronous so that release can run from `Drop`.
pub trait WorkspaceBackend: Send + Sync {
    /// Populate the empty directory `path` with `branch_ref` of `repo_url`.
    fn materialize(&self, repo_url: &str, branch_ref: &str, path: &Path) -> Result<BranchTracking>;

    /// Remove a directory created by `materialize`, including partial ones.
    fn remove(&self, path: &Path) -> Result<()>;
}

/// Git worktrees off one local clone per repository.
#[derive(Debug, Clone)]
pub struct GitBackend {
    /// Where per-repository clones are kept
    mirror_dir: PathBuf,
    /// Remote name used for tracking branches
    remote: String,
}

impl GitBackend {
    pub fn new(mirror_dir: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            mirror_dir: mirror_dir.into(),
            remote: remote.into(),
        }
    }

    /// Local clone path for a repository URL, one per distinct repository.
    pub fn mirror_path(&self, repo_url: &str) -> PathBuf {
        let without_scheme = repo_url.split_once("://").map(|(_, rest)| rest).unwrap_or(repo_url);
        let trimmed = without_scheme.strip_suffix(".git").unwrap_or(without_scheme);
        self.mirror_dir.join(escape_name(trimmed))
    }

    /// Clone the repository once, fetch on later calls.
    fn ensure_mirror(&self, repo_url: &str) -> Result<PathBuf> {
        let mirror = self.mirror_path(repo_url);

        if mirror.join(".git").exists() {
            git(&mirror, ["fetch", "--prune", self.remote.as_str()], "fetch")?;
            return Ok(mirror);
        }

        fs::create_dir_all(&self.mirror_dir)
            .map_err(|e| SweepError::Workspace(format!("Failed to create mirror dir: {}", e)))?;

        let output = Command::new("git")
            .args(["clone", "--no-checkout", "--origin", self.remote.as_str(), repo_url])
            .arg(&mirror)
            .current_dir(&self.mirror_dir)
            .output()
            .map_err(|e| SweepError::Workspace(format!("Failed to execute git: {}", e)))?;
        check(&output, "clone")?;

        // Detach HEAD so every branch, including the default one, can be
        // checked out in a worktree
        let head = git(&mirror, ["rev-parse", "HEAD"], "rev-parse")?;
        let sha = String::from_utf8_lossy(&head.stdout).trim().to_string();
        git(&mirror, ["update-ref", "--no-deref", "HEAD", sha.as_str()], "detach HEAD")?;

        Ok(mirror)
    }

    /// Bring an existing local branch up to its freshly fetched upstream.
    ///
    /// Local commits that are not on the upstream are kept; the branch is
    /// then used as it is.
    fn fast_forward(&self, worktree: &Path, upstream: &str) {
        let remote_ref = format!("refs/remotes/{}", upstream);
        if git(worktree, ["show-ref", "--verify", "--quiet", remote_ref.as_str()], "show-ref").is_err() {
            return;
        }
        if let Err(e) = git(worktree, ["merge", "--ff-only", upstream], "merge --ff-only") {
            warn!("Local branch at {} diverged from {}, using it as is: {}", worktree.display(), upstream, e);
        }
    }

    /// Delete `branch` from the clone if this backend created it.
    fn drop_created_branch(mirror: &Path, branch: &str) {
        let flag = format!("branch.{}.{}", branch, CREATED_FLAG);
        let created = git(mirror, ["config", "--get", flag.as_str()], "config")
            .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "true")
            .unwrap_or(false);
        if !created {
            return;
        }
        match git(mirror, ["branch", "-D", branch], "branch -D") {
            Ok(_) => debug!("Deleted branch {} from {}", branch, mirror.display()),
            Err(e) => warn!("Failed to delete branch {} from {}: {}", branch, mirror.display(), e),
        }
    }
}

impl WorkspaceBackend for GitBackend {
    fn materialize(&self, repo_url: &str, branch_ref: &str, path: &Path) -> Result<BranchTracking> {
        let mirror = self.ensure_mirror(repo_url)?;

        let local_ref = format!("refs/heads/{}", branch_ref);
        let has_local = Command::new("git")
            .args(["show-ref", "--verify", "--quiet", local_ref.as_str()])
            .current_dir(&mirror)
            .status()
            .map_err(|e| SweepError::Workspace(format!("Failed to execute git: {}", e)))?
            .success();

        let upstream = format!("{}/{}", self.remote, branch_ref);
        let tracking = if has_local {
            let output = Command::new("git")
                .args(["worktree", "add"])
                .arg(path)
                .arg(branch_ref)
                .current_dir(&mirror)
                .output()
                .map_err(|e| SweepError::Workspace(format!("Failed to execute git: {}", e)))?;
            check(&output, "worktree add")?;
            self.fast_forward(path, &upstream);
            BranchTracking::LocalBranch
        } else {
            let output = Command::new("git")
                .args(["worktree", "add", "--track", "-b", branch_ref])
                .arg(path)
                .arg(&upstream)
                .current_dir(&mirror)
                .output()
                .map_err(|e| SweepError::Workspace(format!("Failed to execute git: {}", e)))?;
            check(&output, "worktree add")?;
            let flag = format!("branch.{}.{}", branch_ref, CREATED_FLAG);
            git(&mirror, ["config", flag.as_str(), "true"], "config")?;
            BranchTracking::RemoteTracking
        };

        debug!("Materialized {} at {} ({:?})", branch_ref, path.display(), tracking);
        Ok(tracking)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        // A worktree knows its parent clone through the common git dir.
        // Without a .git entry the directory never got that far.
        let common = path
            .join(".git")
            .exists()
            .then(|| {
                Command::new("git")
                    .args(["rev-parse", "--path-format=absolute", "--git-common-dir"])
                    .current_dir(path)
                    .output()
                    .ok()
            })
            .flatten()
            .filter(|o| o.status.success())
            .map(|o| PathBuf::from(String::from_utf8_lossy(&o.stdout).trim()));

        let mirror = common.as_deref().and_then(Path::parent).map(Path::to_path_buf);
        let branch = mirror
            .as_ref()
            .and_then(|_| git(path, ["symbolic-ref", "--quiet", "--short", "HEAD"], "symbolic-ref").ok())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .filter(|b| !b.is_empty());

        if let Some(mirror) = &mirror {
            let output = Command::new("git")
                .args(["worktree", "remove", "--force"])
                .arg(path)
                .current_dir(mirror)
                .output()
                .map_err(|e| SweepError::Workspace(format!("Failed to execute git: {}", e)))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!("git worktree remove failed for {}: {}", path.display(), stderr.trim());
            }
        }

        if path.exists() {
            fs::remove_dir_all(path)
                .map_err(|e| SweepError::Workspace(format!("Failed to remove {}: {}", path.display(), e)))?;
        }

        if let Some(mirror) = &mirror {
            // Drop bookkeeping for worktrees removed behind git's back
            let _ = git(mirror, ["worktree", "prune"], "worktree prune");

            // The next attempt starts again from the remote branch
            if let Some(branch) = &branch {
                Self::drop_created_branch(mirror, branch);
            }
        }

        Ok(())
    }
}

fn git<I, S>(dir: &Path, args: I, what: &str) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| SweepError::Workspace(format!("Failed to execute git: {}", e)))?;
    check(&output, what)?;
    Ok(output)
}

fn check(output: &Output, what: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(SweepError::Workspace(format!("git {} failed: {}", what, stderr.trim())))
}

/// Plain directories without version control.
///
/// Writes the branch name into a marker file so callers can see what was
/// requested. Used where no repository is available.
#[derive(Debug, Clone, Default)]
pub struct PlainDirBackend {
    fail_materialize: bool,
}

pub const BRANCH_MARKER: &str = ".prsweep-branch";

impl PlainDirBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose materialize always fails.
    pub fn failing() -> Self {
        Self { fail_materialize: true }
    }
}

impl WorkspaceBackend for PlainDirBackend {
    fn materialize(&self, repo_url: &str, branch_ref: &str, path: &Path) -> Result<BranchTracking> {
        if self.fail_materialize {
            return Err(SweepError::Workspace(format!("cannot materialize {} from {}", branch_ref, repo_url)));
        }
        fs::write(path.join(BRANCH_MARKER), branch_ref)?;
        Ok(BranchTracking::RemoteTracking)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }
}
