//! Work items produced by discovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobKey;

/// An open pull request eligible for consideration this pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub key: JobKey,
    pub title: String,
    /// Web URL of the pull request
    pub url: String,
    /// URL the workspace is materialized from
    pub clone_url: String,
    /// Head branch of the pull request
    pub branch_ref: String,
    pub author: Option<String>,
    pub draft: bool,
    pub updated_at: DateTime<Utc>,
}

/// Oldest-updated first; ties broken by key so ordering is deterministic.
pub fn sort_oldest_first(items: &mut [CandidateItem]) {
    items.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.key.cmp(&b.key)));
}
