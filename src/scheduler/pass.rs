//! SchedulerPass drives a single discover/admit/process/record cycle.

use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{ItemDisposition, PassSummary};
use crate::admission::{Admission, AdmissionController, BlockReason, CheckReport, GlobalAdmission};
use crate::discovery::Discoverer;
use crate::domain::{CandidateItem, JobKey, JobOutcome, sort_oldest_first};
use crate::error::{Result, SweepError};
use crate::runner::JobRunner;
use crate::workspace::{Workspace, WorkspaceManager};

/// Limits for one pass
#[derive(Debug, Clone)]
pub struct PassConfig {
    /// Items reserved per pass
    pub max_batch_size: usize,
    /// Wall-clock cap per agent invocation
    pub job_timeout: Duration,
    /// Overall cap for the pass, if any
    pub deadline: Option<Duration>,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 5,
            job_timeout: Duration::from_secs(1200),
            deadline: Some(Duration::from_secs(7200)),
        }
    }
}

/// Per-invocation options from the command line
#[derive(Debug, Clone, Default)]
pub struct PassOptions {
    pub dry_run: bool,
    pub single_source: Option<String>,
    pub max_items: Option<usize>,
}

pub struct SchedulerPass {
    admission: AdmissionController,
    discoverer: Discoverer,
    workspaces: WorkspaceManager,
    runner: JobRunner,
    config: PassConfig,
}

impl SchedulerPass {
    pub fn new(
        admission: AdmissionController,
        discoverer: Discoverer,
        workspaces: WorkspaceManager,
        runner: JobRunner,
        config: PassConfig,
    ) -> Self {
        Self {
            admission,
            discoverer,
            workspaces,
            runner,
            config,
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Run one pass to completion, deadline or cancellation.
    ///
    /// Item-level failures are recorded and the pass moves on. Lock,
    /// corruption and other state store errors end the pass with `Err`.
    pub async fn run_once(&self, options: &PassOptions, cancel: watch::Receiver<bool>) -> Result<PassSummary> {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let watchdog = spawn_watchdog(cancel, cancel_tx, self.config.deadline);

        let result = self.run_inner(options, &mut cancel_rx).await;
        watchdog.abort();

        match &result {
            Ok(summary) => info!("Pass finished: {}", summary.one_line()),
            Err(e) => error!("Pass aborted: {}", e),
        }
        result
    }

    async fn run_inner(&self, options: &PassOptions, cancel: &mut watch::Receiver<bool>) -> Result<PassSummary> {
        let mut summary = PassSummary::new(options.dry_run);

        if !options.dry_run
            && let GlobalAdmission::RequiresApproval { total_runs, limit } = self.admission.admit_global().await?
        {
            warn!("Global limit reached ({}/{}), skipping pass until approved", total_runs, limit);
            summary.requires_approval = true;
            return Ok(summary);
        }

        let mut candidates = self.discoverer.list_candidates(options.single_source.as_deref()).await;
        summary.discovered = candidates.len();
        sort_oldest_first(&mut candidates);
        if let Some(max) = options.max_items {
            candidates.truncate(max);
        }
        info!("Pass over {} candidates (batch size {})", candidates.len(), self.config.max_batch_size);

        let mut queue = candidates.iter();
        while let Some(item) = queue.next() {
            if *cancel.borrow() {
                summary.cancelled = true;
                summary.push(&item.key, ItemDisposition::Deferred);
                break;
            }
            if summary.admitted >= self.config.max_batch_size {
                summary.push(&item.key, ItemDisposition::Deferred);
                break;
            }

            let disposition = if options.dry_run {
                match self.check(item).await?.blocked {
                    None => {
                        summary.admitted += 1;
                        ItemDisposition::WouldRun
                    }
                    Some(reason) => ItemDisposition::Blocked(reason),
                }
            } else {
                match self.admission.try_admit_and_reserve(&item.key).await? {
                    Admission::Blocked(reason) => ItemDisposition::Blocked(reason),
                    Admission::Reserved(_) => match self.process(item, cancel).await? {
                        ItemDisposition::Deferred => {
                            summary.cancelled = true;
                            ItemDisposition::Deferred
                        }
                        disposition => {
                            summary.admitted += 1;
                            disposition
                        }
                    },
                }
            };

            let stop = matches!(disposition, ItemDisposition::Blocked(BlockReason::RequiresApproval { .. }));
            summary.push(&item.key, disposition);
            if stop {
                summary.requires_approval = true;
                break;
            }
        }

        for item in queue {
            summary.push(&item.key, ItemDisposition::Deferred);
        }

        Ok(summary)
    }

    /// Workspace, agent, record, release for one reserved item.
    async fn process(&self, item: &CandidateItem, cancel: &mut watch::Receiver<bool>) -> Result<ItemDisposition> {
        let workspace = match self.acquire(item).await {
            Ok(ws) => ws,
            Err(SweepError::WorkspaceConflict(key)) => {
                warn!(
                    "Workspace for {} already exists at {}; run `prsweep cleanup {}` after checking it",
                    key,
                    self.workspaces.path(&key).display(),
                    key
                );
                self.release_reservation(&key).await?;
                return Ok(ItemDisposition::InProgress);
            }
            Err(e) => {
                warn!("Failed to prepare workspace for {}: {}", item.key, e);
                let outcome = JobOutcome::Failure(e.to_string());
                self.admission.record(&item.key, &outcome).await?;
                return Ok(ItemDisposition::WorkspaceFailed(e.to_string()));
            }
        };

        // Cancelled while the workspace was being prepared: nothing ran,
        // so no attempt is consumed
        if *cancel.borrow() {
            info!("Pass cancelled before {} started, deferring", item.key);
            self.release(workspace).await;
            self.release_reservation(&item.key).await?;
            return Ok(ItemDisposition::Deferred);
        }

        let outcome = self
            .runner
            .run(item, workspace.path(), self.config.job_timeout, cancel)
            .await;

        // An Err from record still drops the workspace on the way out
        let recorded = self.admission.record(&item.key, &outcome).await;
        self.release(workspace).await;
        recorded?;

        Ok(ItemDisposition::Completed(outcome))
    }

    async fn check(&self, item: &CandidateItem) -> Result<CheckReport> {
        let admission = self.admission.clone();
        let key = item.key.clone();
        tokio::task::spawn_blocking(move || admission.check(&key))
            .await
            .map_err(|e| SweepError::Io(std::io::Error::other(format!("admission task failed: {}", e))))?
    }

    async fn release_reservation(&self, key: &JobKey) -> Result<()> {
        let admission = self.admission.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || admission.release_reservation(&key))
            .await
            .map_err(|e| SweepError::Io(std::io::Error::other(format!("admission task failed: {}", e))))?
    }

    async fn acquire(&self, item: &CandidateItem) -> Result<Workspace> {
        let workspaces = self.workspaces.clone();
        let key = item.key.clone();
        let clone_url = item.clone_url.clone();
        let branch_ref = item.branch_ref.clone();

        tokio::task::spawn_blocking(move || workspaces.acquire(&key, &clone_url, &branch_ref))
            .await
            .map_err(|e| SweepError::Workspace(format!("workspace task failed: {}", e)))?
    }

    async fn release(&self, workspace: Workspace) {
        let path = workspace.path().to_path_buf();
        match tokio::task::spawn_blocking(move || workspace.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to release workspace {}: {}", path.display(), e),
            Err(e) => error!("Workspace release task for {} failed: {}", path.display(), e),
        }
    }
}

/// Trip the pass-local cancel flag on the deadline or an external cancel.
fn spawn_watchdog(
    mut external: watch::Receiver<bool>,
    tx: watch::Sender<bool>,
    deadline: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let deadline = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        let external = async {
            loop {
                if *external.borrow_and_update() {
                    return;
                }
                if external.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = deadline => warn!("Pass deadline reached, cancelling"),
            _ = external => info!("Cancellation requested"),
        }
        let _ = tx.send(true);
    })
}
