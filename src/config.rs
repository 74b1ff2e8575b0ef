use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use prsweep::admission::AdmissionLimits;
use prsweep::discovery::{DiscoveryFilter, GITHUB_API_URL};
use prsweep::runner::AgentConfig;
use prsweep::scheduler::PassConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub admission: AdmissionConfig,
    pub batch: BatchConfig,
    pub discovery: DiscoveryConfig,
    pub workspace: WorkspaceConfig,
    pub agent: AgentSection,
    pub notify: NotifyConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub pr_limit: u32,
    pub global_limit: u64,
    pub cooldown_secs: u64,
    pub approval_hours: u64,
    pub reservation_ttl_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            pr_limit: 3,
            global_limit: 50,
            cooldown_secs: 86400,
            approval_hours: 24,
            reservation_ttl_secs: 7200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub job_timeout_secs: u64,
    /// 0 disables the pass deadline
    pub pass_deadline_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 5,
            job_timeout_secs: 1200,
            pass_deadline_secs: 7200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub api_url: String,
    pub token_env: String,
    pub sources: Vec<String>,
    pub author: Option<String>,
    pub window_hours: u64,
    pub query_timeout_secs: u64,
    pub include_drafts: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            api_url: GITHUB_API_URL.to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            sources: Vec::new(),
            author: None,
            window_hours: 24,
            query_timeout_secs: 30,
            include_drafts: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
    /// Remote name used for tracking branches
    pub remote: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("workspaces"),
            remote: "origin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub recipient: Option<String>,
    /// Mail program followed by its arguments
    pub command: Vec<String>,
    pub from: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            recipient: None,
            command: vec!["sendmail".to_string(), "-t".to_string()],
            from: "prsweep".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
    pub lock_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: data_dir().join("state"),
            lock_timeout_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            admission: AdmissionConfig::default(),
            batch: BatchConfig::default(),
            discovery: DiscoveryConfig::default(),
            workspace: WorkspaceConfig::default(),
            agent: AgentSection::default(),
            notify: NotifyConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(env!("CARGO_PKG_NAME"))
}

impl Config {
    /// Load configuration with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file(config_path)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply `PR_LIMIT`, `GLOBAL_LIMIT`, `COOLDOWN_PERIOD`, `MAX_BATCH_SIZE`,
    /// `JOB_TIMEOUT` and `DISCOVERY_WINDOW` from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "PR_LIMIT", &mut self.admission.pr_limit)?;
        override_from(&lookup, "GLOBAL_LIMIT", &mut self.admission.global_limit)?;
        override_from(&lookup, "COOLDOWN_PERIOD", &mut self.admission.cooldown_secs)?;
        override_from(&lookup, "MAX_BATCH_SIZE", &mut self.batch.max_batch_size)?;
        override_from(&lookup, "JOB_TIMEOUT", &mut self.batch.job_timeout_secs)?;
        override_from(&lookup, "DISCOVERY_WINDOW", &mut self.discovery.window_hours)?;
        Ok(())
    }

    /// Reject values that would make admission meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.admission.pr_limit == 0 {
            bail!("admission.pr_limit must be greater than 0");
        }
        if self.admission.global_limit == 0 {
            bail!("admission.global_limit must be greater than 0");
        }
        if self.admission.approval_hours == 0 {
            bail!("admission.approval_hours must be greater than 0");
        }
        if self.admission.reservation_ttl_secs == 0 {
            bail!("admission.reservation_ttl_secs must be greater than 0");
        }
        if self.batch.max_batch_size == 0 {
            bail!("batch.max_batch_size must be greater than 0");
        }
        if self.batch.job_timeout_secs == 0 {
            bail!("batch.job_timeout_secs must be greater than 0");
        }
        if self.discovery.window_hours == 0 {
            bail!("discovery.window_hours must be greater than 0");
        }
        if self.storage.lock_timeout_secs == 0 {
            bail!("storage.lock_timeout_secs must be greater than 0");
        }
        Ok(())
    }

    /// `validate` plus what executing a pass needs.
    pub fn validate_for_pass(&self) -> Result<()> {
        self.validate()?;
        if self.agent.command.trim().is_empty() {
            bail!("agent.command must be set to run a pass");
        }
        if self.discovery.sources.is_empty() {
            bail!("discovery.sources is empty; nothing to sweep");
        }
        Ok(())
    }

    pub fn admission_limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            pr_limit: self.admission.pr_limit,
            global_limit: self.admission.global_limit,
            cooldown: chrono::Duration::seconds(self.admission.cooldown_secs as i64),
            approval_duration: chrono::Duration::hours(self.admission.approval_hours as i64),
            reservation_ttl: chrono::Duration::seconds(self.admission.reservation_ttl_secs as i64),
        }
    }

    pub fn discovery_filter(&self) -> DiscoveryFilter {
        DiscoveryFilter {
            window: chrono::Duration::hours(self.discovery.window_hours as i64),
            author: self.discovery.author.clone(),
            include_drafts: self.discovery.include_drafts,
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.query_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.lock_timeout_secs)
    }

    pub fn pass_config(&self) -> PassConfig {
        PassConfig {
            max_batch_size: self.batch.max_batch_size,
            job_timeout: Duration::from_secs(self.batch.job_timeout_secs),
            deadline: (self.batch.pass_deadline_secs > 0).then(|| Duration::from_secs(self.batch.pass_deadline_secs)),
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            command: self.agent.command.clone(),
            args: self.agent.args.clone(),
            env: self.agent.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            log_dir: self.agent.log_dir.clone(),
        }
    }

    /// Mirror clones live next to the workspaces, hidden from listings
    pub fn mirror_dir(&self) -> PathBuf {
        self.workspace.root.join(".mirrors")
    }
}

fn override_from<T, F>(lookup: &F, name: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| eyre::eyre!("Invalid value for {}: {:?} ({})", name, raw, e))?;
        log::info!("{} overridden from environment", name);
    }
    Ok(())
}
