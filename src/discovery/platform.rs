//! Hosting platform seam.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, SweepError};

/// A repository as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepository {
    /// `owner/repo`
    pub full_name: String,
    pub clone_url: String,
    pub archived: bool,
}

/// An open pull request as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub head_ref: String,
    /// Repository the head branch lives in, when it differs from the base
    pub head_clone_url: Option<String>,
    pub author: Option<String>,
    pub draft: bool,
    pub updated_at: DateTime<Utc>,
}

/// Read-only view of the hosting platform.
#[async_trait]
pub trait HostingPlatform: Send + Sync {
    /// Repositories for a source: an owner, or a single `owner/repo`.
    async fn list_repositories(&self, source: &str) -> Result<Vec<RemoteRepository>>;

    /// Open pull requests in one repository.
    async fn list_open_items(&self, repo: &RemoteRepository) -> Result<Vec<RemoteItem>>;
}

/// In-memory platform with fixed contents.
#[derive(Debug, Default)]
pub struct StaticPlatform {
    repos: Mutex<HashMap<String, Vec<RemoteRepository>>>,
    items: Mutex<HashMap<String, Vec<RemoteItem>>>,
    failing: Mutex<HashSet<String>>,
}

impl StaticPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `repo` under `source`.
    pub fn add_repository(&self, source: &str, repo: RemoteRepository) {
        if let Ok(mut repos) = self.repos.lock() {
            repos.entry(source.to_string()).or_default().push(repo);
        }
    }

    pub fn add_item(&self, repo_full_name: &str, item: RemoteItem) {
        if let Ok(mut items) = self.items.lock() {
            items.entry(repo_full_name.to_string()).or_default().push(item);
        }
    }

    /// Make every query for `source` fail.
    pub fn fail_source(&self, source: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(source.to_string());
        }
    }
}

#[async_trait]
impl HostingPlatform for StaticPlatform {
    async fn list_repositories(&self, source: &str) -> Result<Vec<RemoteRepository>> {
        let failing = self.failing.lock().map_err(|e| SweepError::Discovery {
            source_name: source.to_string(),
            message: e.to_string(),
        })?;
        if failing.contains(source) {
            return Err(SweepError::Discovery {
                source_name: source.to_string(),
                message: "simulated platform failure".to_string(),
            });
        }
        drop(failing);

        let repos = self.repos.lock().map_err(|e| SweepError::Discovery {
            source_name: source.to_string(),
            message: e.to_string(),
        })?;
        Ok(repos.get(source).cloned().unwrap_or_default())
    }

    async fn list_open_items(&self, repo: &RemoteRepository) -> Result<Vec<RemoteItem>> {
        let items = self.items.lock().map_err(|e| SweepError::Discovery {
            source_name: repo.full_name.clone(),
            message: e.to_string(),
        })?;
        Ok(items.get(&repo.full_name).cloned().unwrap_or_default())
    }
}
