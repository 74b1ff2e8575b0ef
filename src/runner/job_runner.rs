//! JobRunner spawns the agent command and supervises it until exit,
//! timeout, or cancellation.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::domain::{CandidateItem, JobOutcome};

/// How to invoke the agent
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    /// Program to execute
    pub command: String,
    /// Arguments; item details travel in the environment
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// When set, stdout and stderr go to `<log_dir>/<slug>.log`
    pub log_dir: Option<PathBuf>,
}

impl AgentConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// Executes one job at a time.
#[derive(Debug, Clone)]
pub struct JobRunner {
    config: AgentConfig,
}

impl JobRunner {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run the agent for `item` inside `workspace`.
    ///
    /// The agent runs in its own process group; on timeout or cancellation
    /// the whole group is killed so no descendants outlive the job. Only a
    /// zero exit status is a success.
    pub async fn run(
        &self,
        item: &CandidateItem,
        workspace: &Path,
        timeout: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> JobOutcome {
        if *cancel.borrow() {
            return JobOutcome::Cancelled;
        }

        let mut child = match self.spawn(item, workspace) {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start agent for {}: {}", item.key, e);
                return JobOutcome::Failure(format!("spawn failed: {}", e));
            }
        };
        let pid = child.id();
        debug!("Agent for {} started (pid {:?})", item.key, pid);

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => JobOutcome::Success,
                Ok(status) => JobOutcome::Failure(describe_exit(status)),
                Err(e) => JobOutcome::Failure(format!("wait failed: {}", e)),
            },
            _ = tokio::time::sleep(timeout) => {
                warn!("Agent for {} exceeded {:?}, killing", item.key, timeout);
                terminate(&mut child, pid).await;
                JobOutcome::TimedOut
            },
            _ = cancelled(cancel) => {
                warn!("Pass cancelled, killing agent for {}", item.key);
                terminate(&mut child, pid).await;
                JobOutcome::Cancelled
            },
        };

        info!("Agent for {} finished: {}", item.key, outcome);
        outcome
    }

    fn spawn(&self, item: &CandidateItem, workspace: &Path) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .current_dir(workspace)
            .env("PRSWEEP_REPO", &item.key.source)
            .env("PRSWEEP_ITEM", item.key.item_id.to_string())
            .env("PRSWEEP_BRANCH", &item.branch_ref)
            .env("PRSWEEP_URL", &item.url)
            .env("PRSWEEP_TITLE", &item.title)
            .env("PRSWEEP_WORKSPACE", workspace)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &self.config.log_dir {
            fs::create_dir_all(dir)?;
            let log = File::create(dir.join(format!("{}.log", item.key.slug())))?;
            cmd.stdout(Stdio::from(log.try_clone()?)).stderr(Stdio::from(log));
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn()
    }
}

/// Resolves once the cancel flag is set. Never resolves if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Kill the agent's process group and reap the leader.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        kill_group(pid);
    }
    if let Err(e) = child.kill().await {
        debug!("kill after killpg: {}", e);
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    // SAFETY: killpg only sends a signal; the group id equals the child's
    // pid because it was spawned with process_group(0)
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!("killpg({}) failed: {}", pid, std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    return format!("killed by signal {}", signal);
                }
            }
            "terminated without exit code".to_string()
        }
    }
}
