//! Isolated per-key workspaces.
//!
//! Each admitted key gets its own directory under the workspace root,
//! materialized on the pull request's branch. A directory that already
//! exists means an earlier pass did not finish; it is reported as a
//! conflict and left for the operator.

mod backend;
mod manager;

pub use backend::{BranchTracking, GitBackend, PlainDirBackend, WorkspaceBackend};
pub use manager::{Workspace, WorkspaceManager};
