//! GitHub REST implementation of the hosting platform.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{HostingPlatform, RemoteItem, RemoteRepository};
use crate::error::{Result, SweepError};

/// Default GitHub API base URL
pub const GITHUB_API_URL: &str = "https://api.github.com";

const PER_PAGE: usize = 100;
const MAX_PAGES: usize = 20;

/// GitHub API client
pub struct GitHubPlatform {
    client: Client,
    api_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for GitHubPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubPlatform")
            .field("api_url", &self.api_url)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl GitHubPlatform {
    /// Create a client; `token` is sent as a bearer token when present.
    pub fn new(api_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SweepError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Fetch every page of a list endpoint.
    async fn get_paged<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut all = Vec::new();
        for page in 1..=MAX_PAGES {
            let separator = if path.contains('?') { '&' } else { '?' };
            let url = format!("{}{}{}per_page={}&page={}", self.api_url, path, separator, PER_PAGE, page);
            let batch: Vec<T> = self.get_json(&url).await?;
            let len = batch.len();
            all.extend(batch);
            if len < PER_PAGE {
                break;
            }
        }
        Ok(all)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SweepError::Discovery {
                source_name: url.to_string(),
                message: format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl HostingPlatform for GitHubPlatform {
    async fn list_repositories(&self, source: &str) -> Result<Vec<RemoteRepository>> {
        if source.contains('/') {
            let repo: GhRepo = self.get_json(&format!("{}/repos/{}", self.api_url, source)).await?;
            return Ok(vec![repo.into()]);
        }

        let repos: Vec<GhRepo> = self.get_paged(&format!("/users/{}/repos?type=owner", source)).await?;
        Ok(repos.into_iter().map(RemoteRepository::from).collect())
    }

    async fn list_open_items(&self, repo: &RemoteRepository) -> Result<Vec<RemoteItem>> {
        let pulls: Vec<GhPull> = self
            .get_paged(&format!("/repos/{}/pulls?state=open&sort=updated&direction=asc", repo.full_name))
            .await?;
        Ok(pulls.into_iter().map(|p| p.into_item(repo)).collect())
    }
}

#[derive(Debug, Deserialize)]
struct GhRepo {
    full_name: String,
    clone_url: String,
    #[serde(default)]
    archived: bool,
}

impl From<GhRepo> for RemoteRepository {
    fn from(repo: GhRepo) -> Self {
        Self {
            full_name: repo.full_name,
            clone_url: repo.clone_url,
            archived: repo.archived,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhHeadRepo {
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct GhHead {
    #[serde(rename = "ref")]
    ref_name: String,
    repo: Option<GhHeadRepo>,
}

#[derive(Debug, Deserialize)]
struct GhPull {
    number: u64,
    title: String,
    html_url: String,
    #[serde(default)]
    draft: bool,
    updated_at: DateTime<Utc>,
    user: Option<GhUser>,
    head: GhHead,
}

impl GhPull {
    fn into_item(self, base: &RemoteRepository) -> RemoteItem {
        let head_clone_url = self
            .head
            .repo
            .map(|r| r.clone_url)
            .filter(|url| *url != base.clone_url);

        RemoteItem {
            number: self.number,
            title: self.title,
            url: self.html_url,
            head_ref: self.head.ref_name,
            head_clone_url,
            author: self.user.map(|u| u.login),
            draft: self.draft,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PULL_JSON: &str = r#"{
        "number": 17,
        "title": "Fix flaky test",
        "html_url": "https://github.com/acme/widgets/pull/17",
        "draft": false,
        "updated_at": "2026-10-17T08:30:00Z",
        "user": { "login": "octocat" },
        "head": {
            "ref": "fix-flaky",
            "repo": { "clone_url": "https://github.com/acme/widgets.git" }
        }
    }"#;

    fn base() -> RemoteRepository {
        RemoteRepository {
            full_name: "acme/widgets".to_string(),
            clone_url: "https://github.com/acme/widgets.git".to_string(),
            archived: false,
        }
    }

    #[test]
    fn test_parse_pull() {
        let pull: GhPull = serde_json::from_str(PULL_JSON).unwrap();
        let item = pull.into_item(&base());
        assert_eq!(item.number, 17);
        assert_eq!(item.head_ref, "fix-flaky");
        assert_eq!(item.author.as_deref(), Some("octocat"));
        assert!(item.head_clone_url.is_none());
        assert_eq!(item.updated_at.to_rfc3339(), "2026-10-17T08:30:00+00:00");
    }

    #[test]
    fn test_parse_fork_pull() {
        let json = PULL_JSON.replace(
            "https://github.com/acme/widgets.git",
            "https://github.com/someone/widgets.git",
        );
        let pull: GhPull = serde_json::from_str(&json).unwrap();
        let item = pull.into_item(&base());
        assert_eq!(item.head_clone_url.as_deref(), Some("https://github.com/someone/widgets.git"));
    }

    #[test]
    fn test_parse_pull_with_deleted_head_repo() {
        let json = r#"{
            "number": 3, "title": "t", "html_url": "u",
            "updated_at": "2026-10-17T08:30:00Z", "user": null,
            "head": { "ref": "gone", "repo": null }
        }"#;
        let pull: GhPull = serde_json::from_str(json).unwrap();
        let item = pull.into_item(&base());
        assert!(!item.draft);
        assert!(item.author.is_none());
        assert!(item.head_clone_url.is_none());
    }

    #[test]
    fn test_parse_repo() {
        let json = r#"{"full_name": "acme/widgets", "clone_url": "https://github.com/acme/widgets.git", "archived": true}"#;
        let repo: RemoteRepository = serde_json::from_str::<GhRepo>(json).unwrap().into();
        assert_eq!(repo.full_name, "acme/widgets");
        assert!(repo.archived);
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let platform = GitHubPlatform::new("https://ghe.example.com/api/v3/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(platform.api_url, "https://ghe.example.com/api/v3");
    }
}
