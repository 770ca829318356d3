// File: manager/src/main.rs
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use backup_manager::artifact::{ArtifactCatalog, ArtifactKind};
use backup_manager::config::{Config, ConfigManager};
use backup_manager::context::ManagerContext;
use backup_manager::logging;
use backup_manager::outcome::RunOutcome;
use backup_manager::restore::{AutoConfirm, Confirmer, RestoreOptions, TerminalConfirmer};
use backup_manager::retention::RetentionManager;
use backup_manager::run_lock::RunLock;
use backup_manager::services::{NotificationDispatcher, Operation, RunNotice};
use backup_manager::verify::{SweepSummary, VerifyMode, VerifyTarget};

#[derive(Parser)]
#[command(name = "backup-manager", version, about = "Tiered PostgreSQL backup, verification and restore")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, global = true, env = "BACKUP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dump, seal, verify and store a new artifact, then prune
    Backup,
    /// Restore an artifact into the production database
    Restore {
        /// Artifact path or timestamp id (a prefix selects the newest match)
        reference: String,
        /// Do not roll back to the pre-restore snapshot on failure
        #[arg(long)]
        no_rollback: bool,
        /// Skip the interactive confirmation
        #[arg(long, short = 'y')]
        yes: bool,
        /// Restore into this database instead of the configured one
        #[arg(long)]
        target: Option<String>,
        /// Proceed without a pre-restore snapshot; no rollback will be possible
        #[arg(long)]
        skip_snapshot: bool,
        /// Skip the post-swap table count check
        #[arg(long)]
        no_verify: bool,
    },
    /// Audit stored artifacts (defaults to the newest artifact per tier)
    Verify {
        /// Artifact path or timestamp id
        #[arg(conflicts_with_all = ["all", "latest"])]
        reference: Option<String>,
        #[arg(long, conflicts_with = "latest")]
        all: bool,
        #[arg(long)]
        latest: bool,
        /// Also restore each artifact into a throwaway database
        #[arg(long)]
        test_restore: bool,
    },
    /// List stored artifacts per tier
    List {
        #[arg(long)]
        json: bool,
    },
    /// Apply retention now
    Prune,
    /// Validate configuration and environment only
    Check,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Backup => "backup",
            Command::Restore { .. } => "restore",
            Command::Verify { .. } => "verify",
            Command::List { .. } => "list",
            Command::Prune => "prune",
            Command::Check => "check",
        }
    }

    fn notified_as(&self) -> Option<Operation> {
        match self {
            Command::Backup => Some(Operation::Backup),
            Command::Restore { .. } => Some(Operation::Restore),
            Command::Verify { .. } => Some(Operation::Verify),
            Command::Prune => Some(Operation::Prune),
            Command::List { .. } | Command::Check => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let outcome = run(cli).await;
    ExitCode::from(outcome.exit_code() as u8)
}

async fn run(cli: Cli) -> RunOutcome {
    let operation = cli.command.name();

    let config_manager = match ConfigManager::new(cli.config.clone()).await {
        Ok(manager) => manager,
        Err(e) => {
            let _ = logging::init(None, operation);
            error!("Configuration error: {}", e);
            return RunOutcome::Failure;
        }
    };
    let config = config_manager.get_current_config();

    match logging::init(Some(&config.logs_dir()), operation) {
        Ok(Some(path)) => info!("Logging {} run to {}", operation, path.display()),
        Ok(None) => {}
        Err(e) => {
            let _ = logging::init(None, operation);
            warn!("Run log file unavailable: {:#}", e);
        }
    }
    match config_manager.source() {
        Some(source) => info!("Configuration loaded from {}", source.display()),
        None => info!("No configuration file; using defaults and environment"),
    }

    match cli.command {
        Command::List { json } => list(&config, json),
        Command::Prune => prune(config).await,
        command => {
            let notified_as = command.notified_as();
            let context = match ManagerContext::prepare(config.clone()) {
                Ok(context) => context,
                Err(e) => {
                    error!("Pre-flight failed: {}", e);
                    if let Some(op) = notified_as {
                        let notice = RunNotice::new(op, RunOutcome::Failure, &config.database.name, e.to_string())
                            .with_failed_step(Some(e.step().to_string()));
                        NotificationDispatcher::new(&config.notifications).dispatch(&notice).await;
                    }
                    return RunOutcome::Failure;
                }
            };
            execute(command, &context).await
        }
    }
}

async fn execute(command: Command, context: &ManagerContext) -> RunOutcome {
    let database = context.config.database.name.clone();

    match command {
        Command::Check => {
            for warning in &context.environment.warnings {
                warn!("{}", warning);
            }
            info!(
                "✓ Configuration and environment OK (encryption: {}, offsite copies: {}, notifications: {})",
                context.environment.encryption_enabled,
                context.environment.remote_enabled,
                context.environment.notifications_enabled
            );
            RunOutcome::from_warnings(&context.environment.warnings)
        }

        Command::Backup => {
            let report = context.backup_service().backup().await;
            let notice = RunNotice::new(Operation::Backup, report.outcome, &database, report.summary())
                .with_artifact(report.artifact.as_ref().map(|a| a.path().to_path_buf()))
                .with_failed_step(report.failed_step.map(|step| step.to_string()))
                .with_details(serde_json::json!({
                    "tier": report.tier,
                    "warnings": report.warnings,
                    "uploaded": report.uploaded,
                }));
            context.notifier.dispatch(&notice).await;
            report.outcome
        }

        Command::Restore {
            reference,
            no_rollback,
            yes,
            target,
            skip_snapshot,
            no_verify,
        } => {
            let confirmer: Arc<dyn Confirmer> = if yes {
                Arc::new(AutoConfirm(true))
            } else {
                Arc::new(TerminalConfirmer)
            };
            let options = RestoreOptions {
                rollback_enabled: !no_rollback,
                skip_confirmation: yes,
                target_database: target,
                skip_snapshot,
                verify_after_swap: !no_verify,
            };
            let target_name = options
                .target_database
                .clone()
                .unwrap_or_else(|| database.clone());

            let notice = match context.restore_engine(confirmer).restore(&reference, options).await {
                Ok(report) => {
                    let session = &report.session;
                    let message = match &report.error {
                        Some(e) => e.clone(),
                        None => format!(
                            "'{}' restored from {}",
                            session.target_database(),
                            session.target_artifact().file_name()
                        ),
                    };
                    if report.manual_recovery_required {
                        error!("MANUAL RECOVERY REQUIRED for '{}'", session.target_database());
                    }
                    let failed_step = report
                        .outcome
                        .is_failure()
                        .then(|| failed_state(&report.session));
                    RunNotice::new(Operation::Restore, report.outcome, session.target_database(), message)
                        .with_artifact(Some(session.target_artifact().path().to_path_buf()))
                        .with_failed_step(failed_step)
                        .with_details(serde_json::json!({
                            "status": report.final_status(),
                            "rolled_back": report.rolled_back,
                            "manual_recovery_required": report.manual_recovery_required,
                            "pre_restore_snapshot": session.pre_restore_snapshot().map(|s| s.path().to_path_buf()),
                            "tables_before": session.tables_before(),
                            "tables_after": session.tables_after(),
                        }))
                }
                Err(e) => {
                    error!("Restore aborted: {}", e);
                    RunNotice::new(Operation::Restore, RunOutcome::Failure, &target_name, e.to_string())
                        .with_failed_step(Some("pending".to_string()))
                }
            };
            context.notifier.dispatch(&notice).await;
            notice.outcome
        }

        Command::Verify {
            reference,
            all,
            latest: _,
            test_restore,
        } => {
            let target = match (reference, all) {
                (Some(reference), _) => VerifyTarget::One(reference),
                (None, true) => VerifyTarget::All,
                (None, false) => VerifyTarget::LatestPerTier,
            };
            let mode = VerifyMode::Audit { test_restore };

            let (outcome, message) = match context.verifier().run(target, mode).await {
                Ok(summary) => {
                    print_sweep(&summary);
                    (sweep_outcome(&summary), format!(
                        "{} verified: {} passed, {} warnings, {} failed",
                        summary.total, summary.passed, summary.warnings, summary.failed
                    ))
                }
                Err(e) => {
                    error!("Verification failed: {}", e);
                    (RunOutcome::Failure, e.to_string())
                }
            };
            if outcome != RunOutcome::Success {
                let notice = RunNotice::new(Operation::Verify, outcome, &database, message)
                    .with_failed_step(outcome.is_failure().then(|| "verify".to_string()));
                context.notifier.dispatch(&notice).await;
            }
            outcome
        }

        Command::List { json } => list(&context.config, json),
        Command::Prune => prune(context.config.clone()).await,
    }
}

fn failed_state(session: &backup_manager::restore::RestoreSession) -> String {
    // The state before `failed` is where the run broke
    session
        .history()
        .iter()
        .rev()
        .map(|change| change.status)
        .find(|status| !status.is_terminal())
        .map(|status| status.to_string())
        .unwrap_or_else(|| "pending".to_string())
}

fn sweep_outcome(summary: &SweepSummary) -> RunOutcome {
    if summary.is_failure() {
        RunOutcome::Failure
    } else if summary.warnings > 0 {
        RunOutcome::SuccessWithWarnings
    } else {
        RunOutcome::Success
    }
}

fn print_sweep(summary: &SweepSummary) {
    for report in &summary.reports {
        println!(
            "{:<8} {}",
            report.overall_status.to_string(),
            report.artifact.display()
        );
        for check in report.checks.iter().filter(|check| check.is_fatal()) {
            println!("         {}: {}", check.name, check.detail);
        }
    }
    println!(
        "{} artifacts: {} passed, {} warnings, {} failed",
        summary.total, summary.passed, summary.warnings, summary.failed
    );
}

fn list(config: &Arc<Config>, json: bool) -> RunOutcome {
    let catalog = ArtifactCatalog::new(config.clone());
    let entries = match catalog.entries(Utc::now()) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Failed to list artifacts: {}", e);
            return RunOutcome::Failure;
        }
    };

    if json {
        match serde_json::to_string_pretty(&entries) {
            Ok(body) => println!("{}", body),
            Err(e) => {
                error!("Failed to serialize listing: {}", e);
                return RunOutcome::Failure;
            }
        }
        return RunOutcome::Success;
    }

    if entries.is_empty() {
        println!("No artifacts under {}", config.storage.backup_dir.display());
        return RunOutcome::Success;
    }
    println!(
        "{:<16} {:<12} {:>12} {:>8}  {:<5} {:<5} {}",
        "ID", "TIER", "BYTES", "AGE(h)", "GZ", "GPG", "FILE"
    );
    for entry in &entries {
        let tier = match entry.kind {
            ArtifactKind::Scheduled => entry.tier.to_string(),
            ArtifactKind::PreRestore => "pre_restore".to_string(),
        };
        let marker = if entry.usable { "" } else { "  (unusable: below size floor)" };
        println!(
            "{:<16} {:<12} {:>12} {:>8}  {:<5} {:<5} {}{}",
            entry.id,
            tier,
            entry.size_bytes,
            entry.age_hours,
            entry.compressed,
            entry.encrypted,
            entry.file_name,
            marker
        );
    }
    RunOutcome::Success
}

async fn prune(config: Arc<Config>) -> RunOutcome {
    let database = config.database.name.clone();
    let notifier = NotificationDispatcher::new(&config.notifications);

    let _lease = match RunLock::acquire(&config.locks_dir(), &database, "prune") {
        Ok(lease) => lease,
        Err(e) => {
            error!("{}", e);
            return RunOutcome::Failure;
        }
    };

    match RetentionManager::new(config.clone()).prune(Utc::now()).await {
        Ok(summary) => {
            info!(
                "✓ Prune complete: {} deleted, {} retained, {} pinned, {} bytes freed",
                summary.deleted.len(),
                summary.retained,
                summary.pinned.len(),
                summary.bytes_freed
            );
            let outcome = RunOutcome::from_warnings(&summary.errors);
            if outcome != RunOutcome::Success {
                let notice = RunNotice::new(
                    Operation::Prune,
                    outcome,
                    &database,
                    summary.errors.join("; "),
                );
                notifier.dispatch(&notice).await;
            }
            outcome
        }
        Err(e) => {
            error!("Prune failed: {}", e);
            let notice = RunNotice::new(Operation::Prune, RunOutcome::Failure, &database, e.to_string())
                .with_failed_step(Some("prune".to_string()));
            notifier.dispatch(&notice).await;
            RunOutcome::Failure
        }
    }
}
