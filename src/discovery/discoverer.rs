//! Candidate discovery across sources.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use log::{debug, info, warn};

use super::{HostingPlatform, RemoteItem, RemoteRepository};
use crate::domain::{CandidateItem, JobKey};
use crate::error::{Result, SweepError};

/// Filters applied to every discovered item.
#[derive(Debug, Clone)]
pub struct DiscoveryFilter {
    /// Only items updated within this window are candidates
    pub window: Duration,
    /// Only items opened by this login, when set
    pub author: Option<String>,
    pub include_drafts: bool,
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self {
            window: Duration::hours(24),
            author: None,
            include_drafts: false,
        }
    }
}

impl DiscoveryFilter {
    fn accepts(&self, item: &RemoteItem, now: DateTime<Utc>) -> bool {
        if item.draft && !self.include_drafts {
            return false;
        }
        if let Some(author) = &self.author
            && !item
                .author
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(author))
        {
            return false;
        }
        now - item.updated_at <= self.window
    }
}

/// Produces the candidate list for a pass. Holds no core state.
pub struct Discoverer {
    platform: Arc<dyn HostingPlatform>,
    sources: Vec<String>,
    filter: DiscoveryFilter,
    query_timeout: StdDuration,
}

impl Discoverer {
    pub fn new(
        platform: Arc<dyn HostingPlatform>,
        sources: Vec<String>,
        filter: DiscoveryFilter,
        query_timeout: StdDuration,
    ) -> Self {
        Self {
            platform,
            sources,
            filter,
            query_timeout,
        }
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Candidates from every configured source, or only `single_source`.
    pub async fn list_candidates(&self, single_source: Option<&str>) -> Vec<CandidateItem> {
        self.list_candidates_at(single_source, Utc::now()).await
    }

    pub async fn list_candidates_at(&self, single_source: Option<&str>, now: DateTime<Utc>) -> Vec<CandidateItem> {
        let sources: Vec<&str> = match single_source {
            Some(source) => vec![source],
            None => self.sources.iter().map(String::as_str).collect(),
        };

        let queries = sources.iter().map(|source| self.query_source(source, now));
        let results = join_all(queries).await;

        // The same PR can be reached through an owner and an owner/repo source
        let mut by_key: HashMap<JobKey, CandidateItem> = HashMap::new();
        for (source, result) in sources.iter().zip(results) {
            match result {
                Ok(items) => {
                    debug!("Source {} yielded {} candidates", source, items.len());
                    for item in items {
                        by_key.insert(item.key.clone(), item);
                    }
                }
                Err(e) => warn!("Skipping source {}: {}", source, e),
            }
        }

        let candidates: Vec<CandidateItem> = by_key.into_values().collect();
        info!("Discovered {} candidates from {} sources", candidates.len(), sources.len());
        candidates
    }

    async fn query_source(&self, source: &str, now: DateTime<Utc>) -> Result<Vec<CandidateItem>> {
        tokio::time::timeout(self.query_timeout, self.collect_source(source, now))
            .await
            .map_err(|_| SweepError::Discovery {
                source_name: source.to_string(),
                message: format!("query timed out after {:?}", self.query_timeout),
            })?
    }

    async fn collect_source(&self, source: &str, now: DateTime<Utc>) -> Result<Vec<CandidateItem>> {
        let repos = self.platform.list_repositories(source).await?;

        let mut candidates = Vec::new();
        for repo in repos.iter().filter(|r| !r.archived) {
            let items = self.platform.list_open_items(repo).await?;
            candidates.extend(
                items
                    .into_iter()
                    .filter(|item| self.filter.accepts(item, now))
                    .map(|item| to_candidate(repo, item)),
            );
        }
        Ok(candidates)
    }
}

fn to_candidate(repo: &RemoteRepository, item: RemoteItem) -> CandidateItem {
    CandidateItem {
        key: JobKey::new(repo.full_name.clone(), item.number),
        title: item.title,
        url: item.url,
        clone_url: item.head_clone_url.unwrap_or_else(|| repo.clone_url.clone()),
        branch_ref: item.head_ref,
        author: item.author,
        draft: item.draft,
        updated_at: item.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticPlatform;
    use async_trait::async_trait;

    fn repo(name: &str) -> RemoteRepository {
        RemoteRepository {
            full_name: name.to_string(),
            clone_url: format!("https://github.com/{}.git", name),
            archived: false,
        }
    }

    fn item(number: u64, updated_at: DateTime<Utc>) -> RemoteItem {
        RemoteItem {
            number,
            title: format!("PR {}", number),
            url: format!("https://example.com/{}", number),
            head_ref: format!("branch-{}", number),
            head_clone_url: None,
            author: Some("octocat".to_string()),
            draft: false,
            updated_at,
        }
    }

    fn discoverer(platform: Arc<StaticPlatform>, sources: &[&str], filter: DiscoveryFilter) -> Discoverer {
        Discoverer::new(
            platform,
            sources.iter().map(|s| s.to_string()).collect(),
            filter,
            StdDuration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_window_filters_old_items() {
        let now = Utc::now();
        let platform = Arc::new(StaticPlatform::new());
        platform.add_repository("acme", repo("acme/widgets"));
        platform.add_item("acme/widgets", item(1, now - Duration::hours(2)));
        platform.add_item("acme/widgets", item(2, now - Duration::hours(30)));

        let d = discoverer(platform, &["acme"], DiscoveryFilter::default());
        let found = d.list_candidates_at(None, now).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, JobKey::new("acme/widgets", 1));
        assert_eq!(found[0].branch_ref, "branch-1");
        assert_eq!(found[0].clone_url, "https://github.com/acme/widgets.git");
    }

    #[tokio::test]
    async fn test_failing_source_is_skipped() {
        let now = Utc::now();
        let platform = Arc::new(StaticPlatform::new());
        platform.add_repository("acme", repo("acme/widgets"));
        platform.add_item("acme/widgets", item(1, now));
        platform.add_repository("broken", repo("broken/thing"));
        platform.add_item("broken/thing", item(2, now));
        platform.fail_source("broken");

        let d = discoverer(platform, &["broken", "acme"], DiscoveryFilter::default());
        let found = d.list_candidates_at(None, now).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key.source, "acme/widgets");
    }

    #[tokio::test]
    async fn test_single_source() {
        let now = Utc::now();
        let platform = Arc::new(StaticPlatform::new());
        platform.add_repository("acme", repo("acme/widgets"));
        platform.add_item("acme/widgets", item(1, now));
        platform.add_repository("other", repo("other/gadgets"));
        platform.add_item("other/gadgets", item(2, now));

        let d = discoverer(platform, &["acme", "other"], DiscoveryFilter::default());
        let found = d.list_candidates_at(Some("other"), now).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key.source, "other/gadgets");
    }

    #[tokio::test]
    async fn test_drafts_archived_and_author_filters() {
        let now = Utc::now();
        let platform = Arc::new(StaticPlatform::new());
        platform.add_repository("acme", repo("acme/widgets"));
        platform.add_repository(
            "acme",
            RemoteRepository {
                archived: true,
                ..repo("acme/old")
            },
        );
        platform.add_item("acme/old", item(9, now));

        let mut draft = item(1, now);
        draft.draft = true;
        platform.add_item("acme/widgets", draft);

        let mut foreign = item(2, now);
        foreign.author = Some("someone-else".to_string());
        platform.add_item("acme/widgets", foreign);

        platform.add_item("acme/widgets", item(3, now));

        let filter = DiscoveryFilter {
            author: Some("OctoCat".to_string()),
            ..Default::default()
        };
        let d = discoverer(platform, &["acme"], filter);
        let found = d.list_candidates_at(None, now).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key.item_id, 3);
    }

    #[tokio::test]
    async fn test_duplicate_sources_are_merged() {
        let now = Utc::now();
        let platform = Arc::new(StaticPlatform::new());
        platform.add_repository("acme", repo("acme/widgets"));
        platform.add_repository("acme/widgets", repo("acme/widgets"));
        platform.add_item("acme/widgets", item(1, now));

        let d = discoverer(platform, &["acme", "acme/widgets"], DiscoveryFilter::default());
        assert_eq!(d.list_candidates_at(None, now).await.len(), 1);
    }

    struct SlowPlatform;

    #[async_trait]
    impl HostingPlatform for SlowPlatform {
        async fn list_repositories(&self, _source: &str) -> Result<Vec<RemoteRepository>> {
            tokio::time::sleep(StdDuration::from_secs(10)).await;
            Ok(vec![])
        }

        async fn list_open_items(&self, _repo: &RemoteRepository) -> Result<Vec<RemoteItem>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let d = Discoverer::new(
            Arc::new(SlowPlatform),
            vec!["acme".to_string()],
            DiscoveryFilter::default(),
            StdDuration::from_millis(50),
        );
        let err = d.query_source("acme", Utc::now()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
