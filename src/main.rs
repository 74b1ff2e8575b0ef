use chrono::Utc;
use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use prsweep::admission::{AdmissionController, GlobalAdmission};
use prsweep::discovery::{Discoverer, GitHubPlatform};
use prsweep::domain::{JobKey, JobOutcome, sort_oldest_first};
use prsweep::notify::{CommandTransport, Notifier};
use prsweep::runner::JobRunner;
use prsweep::scheduler::{PassOptions, SchedulerPass};
use prsweep::store::StateStore;
use prsweep::workspace::{GitBackend, WorkspaceManager};

mod cli;
mod config;

use cli::Cli;
use cli::commands::{Commands, RecordOutcome};
use config::Config;

fn setup_logging(level: &str) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("prsweep")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("prsweep.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    config.validate().context("Invalid configuration")?;

    match &cli.command {
        Commands::Run {
            dry_run,
            single_source,
            max_items,
        } => {
            let options = PassOptions {
                dry_run: *dry_run,
                single_source: single_source.clone(),
                max_items: *max_items,
            };
            handle_run_command(&options, config).await
        }
        Commands::List { single_source } => handle_list_command(single_source.as_deref(), config).await,
        Commands::Check { key } => handle_check_command(key, config),
        Commands::Record { key, outcome } => handle_record_command(key, *outcome, config).await,
        Commands::Approve { approver } => handle_approve_command(approver, config),
        Commands::Status => handle_status_command(config),
        Commands::Cleanup { key } => handle_cleanup_command(key, config),
    }
}

fn build_admission(config: &Config) -> Result<AdmissionController> {
    let store = StateStore::open(&config.storage.state_dir, config.lock_timeout())
        .context(format!("Failed to open state in {}", config.storage.state_dir.display()))?;

    let notifier = match (&config.notify.recipient, config.notify.command.split_first()) {
        (Some(recipient), Some((program, args))) => Notifier::new(
            Arc::new(CommandTransport::new(program.clone(), args.to_vec())),
            Some(recipient.clone()),
            config.notify.from.clone(),
        ),
        _ => Notifier::log_only(),
    };

    Ok(AdmissionController::new(store, config.admission_limits(), notifier))
}

fn build_discoverer(config: &Config) -> Result<Discoverer> {
    let token = std::env::var(&config.discovery.token_env).ok();
    if token.is_none() {
        warn!("{} not set, querying the hosting platform anonymously", config.discovery.token_env);
    }
    let platform = GitHubPlatform::new(config.discovery.api_url.clone(), token, config.query_timeout())
        .context("Failed to build hosting platform client")?;

    Ok(Discoverer::new(
        Arc::new(platform),
        config.discovery.sources.clone(),
        config.discovery_filter(),
        config.query_timeout(),
    ))
}

fn build_workspaces(config: &Config) -> WorkspaceManager {
    let backend = GitBackend::new(config.mirror_dir(), config.workspace.remote.clone());
    WorkspaceManager::new(config.workspace.root.clone(), Arc::new(backend))
}

fn parse_key(key: &str) -> Result<JobKey> {
    key.parse::<JobKey>().context("Expected a key like owner/repo#123")
}

async fn handle_run_command(options: &PassOptions, config: &Config) -> Result<()> {
    if !options.dry_run {
        config.validate_for_pass().context("Configuration is not usable for a pass")?;
    }

    let pass = SchedulerPass::new(
        build_admission(config)?,
        build_discoverer(config)?,
        build_workspaces(config),
        JobRunner::new(config.agent_config()),
        config.pass_config(),
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling pass");
            let _ = cancel_tx.send(true);
        }
    });

    let summary = pass.run_once(options, cancel_rx).await.context("Pass aborted")?;
    println!("{}", summary);
    Ok(())
}

async fn handle_list_command(single_source: Option<&str>, config: &Config) -> Result<()> {
    let discoverer = build_discoverer(config)?;
    let mut candidates = discoverer.list_candidates(single_source).await;
    sort_oldest_first(&mut candidates);

    if candidates.is_empty() {
        println!("{}", "No candidates found".yellow());
        return Ok(());
    }

    let now = Utc::now();
    for item in &candidates {
        let age = now - item.updated_at;
        println!(
            "{:<40} {:>5}h  {}  {}",
            item.key.to_string().cyan(),
            age.num_hours(),
            item.branch_ref.dimmed(),
            item.title
        );
    }
    println!("{} candidates", candidates.len());
    Ok(())
}

fn handle_check_command(key: &str, config: &Config) -> Result<()> {
    let key = parse_key(key)?;
    let admission = build_admission(config)?;
    let report = admission.check(&key)?;
    let limits = admission.limits();

    println!("{} {}", "Key:".green(), key);
    println!(
        "  attempts: {}/{} ({} total)",
        report.record.effective_attempts(),
        limits.pr_limit,
        report.record.attempt_count
    );
    println!("  status:   {}", report.record.status);
    if let Some(at) = report.record.last_success_at {
        println!("  last success: {}", at.to_rfc3339());
    }
    match &report.global {
        GlobalAdmission::Allowed {
            total_runs,
            limit,
            approved_by,
        } => {
            print!("  global:   {}/{}", total_runs, limit);
            match approved_by {
                Some(by) => println!(" (approved by {})", by),
                None => println!(),
            }
        }
        GlobalAdmission::RequiresApproval { total_runs, limit } => {
            println!("  global:   {}/{} {}", total_runs, limit, "approval required".red());
        }
    }
    match &report.blocked {
        None => println!("{}", "Admissible".green().bold()),
        Some(reason) => println!("{} {}", "Blocked:".red().bold(), reason),
    }
    Ok(())
}

async fn handle_record_command(key: &str, outcome: RecordOutcome, config: &Config) -> Result<()> {
    let key = parse_key(key)?;
    let admission = build_admission(config)?;
    let outcome = match outcome {
        RecordOutcome::Success => JobOutcome::Success,
        RecordOutcome::Failure => JobOutcome::Failure("recorded manually".to_string()),
    };

    let record = admission.record(&key, &outcome).await?;
    println!(
        "{} {} for {} (attempts {}/{}, status {})",
        "Recorded".green(),
        outcome,
        key,
        record.effective_attempts(),
        admission.limits().pr_limit,
        record.status
    );
    Ok(())
}

fn handle_approve_command(approver: &str, config: &Config) -> Result<()> {
    let admission = build_admission(config)?;
    let grant = admission.grant_approval(approver)?;
    println!(
        "{} {} until {}",
        "Approved by".green(),
        grant.granted_by,
        grant.expires_at.to_rfc3339()
    );
    Ok(())
}

fn handle_status_command(config: &Config) -> Result<()> {
    let admission = build_admission(config)?;
    let limits = admission.limits();
    let state = admission.status()?;
    let now = Utc::now();

    println!("{}", "Attempts".bold());
    if state.attempts.is_empty() {
        println!("  (none)");
    }
    for record in state.attempts.values() {
        let reserved = if record.has_live_reservation(now, limits.reservation_ttl) {
            " reserved".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<40} {}/{} ({} total)  {:<12} last attempt {}  last success {}{}",
            record.key.to_string(),
            record.effective_attempts(),
            limits.pr_limit,
            record.attempt_count,
            record.status.to_string(),
            fmt_time(record.last_attempt_at),
            fmt_time(record.last_success_at),
            reserved
        );
    }

    println!("{}", "Global".bold());
    println!("  runs: {}/{}", state.global.total_runs, limits.global_limit);
    if let Some(started) = state.global.window_started_at {
        println!("  since: {}", started.to_rfc3339());
    }

    println!("{}", "Approval".bold());
    match &state.approval {
        Some(grant) => match grant.remaining(now) {
            Some(left) => println!(
                "  {} by {}, {}h{}m left",
                "active".green(),
                grant.granted_by,
                left.num_hours(),
                left.num_minutes() % 60
            ),
            None => println!(
                "  {} (granted by {}, expired {})",
                "expired".red(),
                grant.granted_by,
                grant.expires_at.to_rfc3339()
            ),
        },
        None => println!("  none"),
    }

    let leftovers = build_workspaces(config).list_existing()?;
    if !leftovers.is_empty() {
        println!("{}", "Leftover workspaces".yellow().bold());
        for path in leftovers {
            println!("  {}", path.display());
        }
    }
    Ok(())
}

fn handle_cleanup_command(key: &str, config: &Config) -> Result<()> {
    let key = parse_key(key)?;
    let removed = build_workspaces(config).cleanup(&key)?;
    build_admission(config)?.release_reservation(&key)?;

    if removed {
        println!("{} workspace for {}", "Removed".green(), key);
    } else {
        println!("No workspace for {}; reservation cleared", key);
    }
    Ok(())
}

fn fmt_time(at: Option<chrono::DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging before anything touches state
    let level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    setup_logging(&level).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
