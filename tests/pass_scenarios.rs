//! End-to-end passes with an in-memory hosting platform and a shell agent.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use prsweep::admission::{AdmissionController, AdmissionLimits, BlockReason};
use prsweep::discovery::{Discoverer, DiscoveryFilter, RemoteItem, RemoteRepository, StaticPlatform};
use prsweep::domain::{JobKey, JobOutcome};
use prsweep::notify::{Notifier, RecordingTransport};
use prsweep::runner::{AgentConfig, JobRunner};
use prsweep::scheduler::{ItemDisposition, PassConfig, PassOptions, PassSummary, SchedulerPass};
use prsweep::store::StateStore;
use prsweep::workspace::{GitBackend, PlainDirBackend, WorkspaceBackend, WorkspaceManager};
use tempfile::TempDir;
use tokio::sync::watch;

const REPO: &str = "acme/widgets";

struct Harness {
    temp: TempDir,
    platform: Arc<StaticPlatform>,
    transport: Arc<RecordingTransport>,
    limits: AdmissionLimits,
    config: PassConfig,
    backend: Arc<dyn WorkspaceBackend>,
    clone_url: String,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        Self {
            temp,
            platform: Arc::new(StaticPlatform::new()),
            transport: Arc::new(RecordingTransport::new()),
            limits: AdmissionLimits::default(),
            config: PassConfig {
                max_batch_size: 5,
                job_timeout: StdDuration::from_secs(10),
                deadline: None,
            },
            backend: Arc::new(PlainDirBackend::new()),
            clone_url: "https://example.invalid/acme/widgets.git".to_string(),
        }
    }

    fn with_repository(self) -> Self {
        self.platform.add_repository(
            "acme",
            RemoteRepository {
                full_name: REPO.to_string(),
                clone_url: self.clone_url.clone(),
                archived: false,
            },
        );
        self
    }

    fn add_item(&self, number: u64, age: Duration) {
        self.platform.add_item(
            REPO,
            RemoteItem {
                number,
                title: format!("PR {}", number),
                url: format!("https://example.invalid/{}/pull/{}", REPO, number),
                head_ref: format!("fix-{}", number),
                head_clone_url: None,
                author: Some("octocat".to_string()),
                draft: false,
                updated_at: Utc::now() - age,
            },
        );
    }

    fn workspace_root(&self) -> std::path::PathBuf {
        self.temp.path().join("workspaces")
    }

    fn workspaces(&self) -> WorkspaceManager {
        WorkspaceManager::new(self.workspace_root(), self.backend.clone())
    }

    fn controller(&self) -> AdmissionController {
        let store = StateStore::open(self.temp.path().join("state"), StdDuration::from_secs(10)).unwrap();
        let notifier = Notifier::new(self.transport.clone(), Some("ops@example.com".to_string()), "prsweep");
        AdmissionController::new(store, self.limits.clone(), notifier)
    }

    fn pass(&self, script: &str) -> SchedulerPass {
        let discoverer = Discoverer::new(
            self.platform.clone(),
            vec!["acme".to_string()],
            DiscoveryFilter::default(),
            StdDuration::from_secs(5),
        );
        SchedulerPass::new(
            self.controller(),
            discoverer,
            self.workspaces(),
            JobRunner::new(AgentConfig::new("sh").arg("-c").arg(script)),
            self.config.clone(),
        )
    }

    async fn run(&self, script: &str) -> PassSummary {
        let (_tx, rx) = watch::channel(false);
        self.pass(script).run_once(&PassOptions::default(), rx).await.unwrap()
    }
}

fn completed(summary: &PassSummary) -> Vec<u64> {
    summary
        .keys_where(|d| matches!(d, ItemDisposition::Completed(_)))
        .iter()
        .map(|k| k.item_id)
        .collect()
}

#[tokio::test]
async fn test_batch_of_five_defers_three_to_next_pass() {
    let h = Harness::new().with_repository();
    // Item n was updated n hours ago, so higher numbers are older
    for n in 1..=8 {
        h.add_item(n, Duration::hours(n as i64));
    }

    let first = h.run("exit 0").await;
    assert_eq!(first.discovered, 8);
    assert_eq!(completed(&first), vec![8, 7, 6, 5, 4]);
    assert_eq!(first.succeeded, 5);
    assert_eq!(first.deferred, 3);
    let deferred: Vec<u64> = first
        .keys_where(|d| *d == ItemDisposition::Deferred)
        .iter()
        .map(|k| k.item_id)
        .collect();
    assert_eq!(deferred, vec![3, 2, 1]);

    let second = h.run("exit 0").await;
    assert_eq!(completed(&second), vec![3, 2, 1]);
    assert_eq!(second.blocked, 5);
    assert!(second.items[..5]
        .iter()
        .all(|r| matches!(r.disposition, ItemDisposition::Blocked(BlockReason::CoolingDown { .. }))));
    assert!(h.workspaces().list_existing().unwrap().is_empty());
}

#[tokio::test]
async fn test_timeout_counts_as_failure_and_releases_workspace() {
    let mut h = Harness::new().with_repository();
    h.config.job_timeout = StdDuration::from_millis(300);
    h.add_item(1, Duration::hours(1));

    let summary = h.run("sleep 30").await;
    assert_eq!(summary.timed_out, 1);
    assert_eq!(summary.items[0].disposition, ItemDisposition::Completed(JobOutcome::TimedOut));

    let state = h.controller().status().unwrap();
    let record = state.attempt(&JobKey::new(REPO, 1)).unwrap();
    assert_eq!(record.attempt_count, 1);
    assert!(record.reserved_at.is_none());
    assert_eq!(state.global.total_runs, 1);
    assert!(h.workspaces().list_existing().unwrap().is_empty());
}

#[tokio::test]
async fn test_three_failed_passes_exhaust_item() {
    let h = Harness::new().with_repository();
    h.add_item(1, Duration::hours(1));

    for _ in 0..3 {
        let summary = h.run("exit 2").await;
        assert_eq!(summary.failed, 1);
    }
    let fourth = h.run("exit 2").await;
    assert_eq!(fourth.failed, 0);
    assert!(matches!(
        fourth.items[0].disposition,
        ItemDisposition::Blocked(BlockReason::Exhausted { attempts: 3, limit: 3 })
    ));
    assert_eq!(h.transport.count_matching("exhausted"), 1);
}

#[tokio::test]
async fn test_global_limit_stops_pass_before_fifty_first() {
    let mut h = Harness::new().with_repository();
    h.limits.global_limit = 50;
    h.config.max_batch_size = 100;
    for n in 1..=51 {
        h.add_item(n, Duration::minutes(n as i64));
    }

    let summary = h.run("exit 0").await;
    assert_eq!(summary.succeeded, 50);
    assert!(summary.requires_approval);
    // Oldest first, so the youngest item is the one left out
    assert_eq!(summary.items[50].key, JobKey::new(REPO, 1));
    assert!(matches!(
        summary.items[50].disposition,
        ItemDisposition::Blocked(BlockReason::RequiresApproval { .. })
    ));
    assert_eq!(h.controller().status().unwrap().global.total_runs, 50);

    // The next pass does not start anything
    h.add_item(52, Duration::minutes(0));
    let next = h.run("exit 0").await;
    assert!(next.requires_approval);
    assert!(next.items.is_empty());
    assert_eq!(h.transport.count_matching("global run limit"), 1);

    // Approval lets the blocked item through
    h.controller().grant_approval("alice").unwrap();
    let approved = h.run("exit 0").await;
    assert!(completed(&approved).contains(&1));
}

#[tokio::test]
async fn test_cancellation_releases_workspace() {
    let h = Harness::new().with_repository();
    h.add_item(1, Duration::hours(2));
    h.add_item(2, Duration::hours(1));

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_millis(300)).await;
        let _ = tx.send(true);
    });

    let summary = h.pass("sleep 30").run_once(&PassOptions::default(), rx).await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.items[0].disposition, ItemDisposition::Completed(JobOutcome::Cancelled));
    assert_eq!(summary.items[1].disposition, ItemDisposition::Deferred);
    assert!(h.workspaces().list_existing().unwrap().is_empty());

    let state = h.controller().status().unwrap();
    assert_eq!(state.attempt(&JobKey::new(REPO, 1)).unwrap().attempt_count, 1);
    assert!(state.attempt(&JobKey::new(REPO, 2)).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_passes_never_share_a_key() {
    let h = Harness::new().with_repository();
    for n in 1..=4 {
        h.add_item(n, Duration::hours(n as i64));
    }

    let a = h.pass("sleep 0.3");
    let b = h.pass("sleep 0.3");
    let (rx_a, rx_b) = (watch::channel(false).1, watch::channel(false).1);
    let options = PassOptions::default();
    let (first, second) = tokio::join!(a.run_once(&options, rx_a), b.run_once(&options, rx_b));
    let (first, second) = (first.unwrap(), second.unwrap());

    let mut all = completed(&first);
    all.extend(completed(&second));
    all.sort();
    assert_eq!(all, vec![1, 2, 3, 4]);
    assert_eq!(first.succeeded + second.succeeded, 4);
    assert!(h.workspaces().list_existing().unwrap().is_empty());
    assert_eq!(h.controller().status().unwrap().global.total_runs, 4);
}

#[tokio::test]
async fn test_leftover_workspace_is_skipped() {
    let h = Harness::new().with_repository();
    h.add_item(1, Duration::hours(2));
    h.add_item(2, Duration::hours(1));
    let stale = h.workspaces().path(&JobKey::new(REPO, 1));
    std::fs::create_dir_all(&stale).unwrap();

    let summary = h.run("exit 0").await;
    assert_eq!(summary.in_progress, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(stale.exists());

    // Operator cleanup makes the key runnable again
    assert!(h.workspaces().cleanup(&JobKey::new(REPO, 1)).unwrap());
    let next = h.run("exit 0").await;
    assert_eq!(completed(&next), vec![1]);
}

#[tokio::test]
async fn test_workspace_failure_is_recorded_and_pass_continues() {
    let mut h = Harness::new().with_repository();
    h.backend = Arc::new(PlainDirBackend::failing());
    h.add_item(1, Duration::hours(2));
    h.add_item(2, Duration::hours(1));

    let summary = h.run("exit 0").await;
    assert_eq!(summary.failed, 2);
    assert!(matches!(summary.items[0].disposition, ItemDisposition::WorkspaceFailed(_)));
    let state = h.controller().status().unwrap();
    assert_eq!(state.attempt(&JobKey::new(REPO, 2)).unwrap().attempt_count, 1);
    assert!(h.workspaces().list_existing().unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_source_does_not_abort_pass() {
    let h = Harness::new().with_repository();
    h.add_item(1, Duration::hours(1));
    h.platform.fail_source("broken");

    let discoverer = Discoverer::new(
        h.platform.clone(),
        vec!["broken".to_string(), "acme".to_string()],
        DiscoveryFilter::default(),
        StdDuration::from_secs(5),
    );
    let pass = SchedulerPass::new(
        h.controller(),
        discoverer,
        h.workspaces(),
        JobRunner::new(AgentConfig::new("true")),
        h.config.clone(),
    );
    let summary = pass.run_once(&PassOptions::default(), watch::channel(false).1).await.unwrap();
    assert_eq!(summary.succeeded, 1);
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Origin repository with `main` and a `fix-1` branch, wired into the harness.
fn git_harness() -> Harness {
    let mut h = Harness::new();
    let origin = h.temp.path().join("origin");
    std::fs::create_dir(&origin).unwrap();
    git(&origin, &["init", "-b", "main"]);
    git(&origin, &["config", "user.email", "test@test.com"]);
    git(&origin, &["config", "user.name", "Test"]);
    std::fs::write(origin.join("README.md"), "# widgets").unwrap();
    git(&origin, &["add", "."]);
    git(&origin, &["commit", "-m", "Initial commit"]);
    git(&origin, &["branch", "fix-1"]);

    h.clone_url = origin.to_string_lossy().to_string();
    h.backend = Arc::new(GitBackend::new(h.workspace_root().join(".mirrors"), "origin"));
    h.with_repository()
}

#[tokio::test]
async fn test_git_workspace_is_on_item_branch() {
    let h = git_harness();
    h.add_item(1, Duration::hours(1));

    let script = r#"test "$(git rev-parse --abbrev-ref HEAD)" = "$PRSWEEP_BRANCH" && test -f README.md"#;
    let summary = h.run(script).await;
    assert_eq!(completed(&summary), vec![1]);
    assert_eq!(summary.succeeded, 1, "{}", summary.one_line());
    assert!(h.workspaces().list_existing().unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_runs_on_updated_branch() {
    let h = git_harness();
    h.add_item(1, Duration::hours(1));

    let first = h.run("exit 1").await;
    assert_eq!(first.failed, 1);

    // The author pushes a follow-up commit before the next pass
    let origin = Path::new(&h.clone_url);
    git(origin, &["checkout", "fix-1"]);
    std::fs::write(origin.join("CHANGES.md"), "follow-up").unwrap();
    git(origin, &["add", "."]);
    git(origin, &["commit", "-m", "Follow-up"]);
    git(origin, &["checkout", "main"]);

    let second = h.run("test -f CHANGES.md").await;
    assert_eq!(second.succeeded, 1, "{}", second.one_line());
    let state = h.controller().status().unwrap();
    assert_eq!(state.attempt(&JobKey::new(REPO, 1)).unwrap().attempt_count, 1);
}

#[tokio::test]
async fn test_repositories_differing_in_punctuation_do_not_share_workspaces() {
    let h = Harness::new();
    for repo in ["acme/my.repo", "acme/my_repo"] {
        h.platform.add_repository(
            "acme",
            RemoteRepository {
                full_name: repo.to_string(),
                clone_url: format!("https://example.invalid/{}.git", repo),
                archived: false,
            },
        );
        h.platform.add_item(
            repo,
            RemoteItem {
                number: 1,
                title: "PR 1".to_string(),
                url: format!("https://example.invalid/{}/pull/1", repo),
                head_ref: "fix-1".to_string(),
                head_clone_url: None,
                author: None,
                draft: false,
                updated_at: Utc::now() - Duration::hours(1),
            },
        );
    }

    // A leftover workspace for one repository must not block the other
    let dotted = JobKey::new("acme/my.repo", 1);
    std::fs::create_dir_all(h.workspaces().path(&dotted)).unwrap();

    let summary = h.run("exit 0").await;
    assert_eq!(summary.in_progress, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(
        summary.keys_where(|d| matches!(d, ItemDisposition::Completed(_))),
        vec![JobKey::new("acme/my_repo", 1)]
    );
    assert!(h.workspaces().path(&dotted).exists());
}
