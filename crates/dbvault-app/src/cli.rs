//! Argument parsing, command dispatch, and exit-code mapping.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use dbvault_config::{ConfigOverrides, PipelineConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bootstrap::{self, Services};
use crate::error::{AppError, AppResult};
use crate::pipeline::{BackupOptions, RestoreOptions, RunOptions};

#[derive(Parser)]
#[command(
    name = "dbvault",
    about = "Back up and restore databases through the operation bridge"
)]
struct Cli {
    /// JSON configuration file (falls back to DBVAULT_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    database: Option<String>,
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,
    /// Progress notification step in percent.
    #[arg(long, global = true)]
    progress_percent: Option<u8>,
    #[arg(long, global = true)]
    expiration_years: Option<u32>,
    /// Extra phrase that marks an informational message as fatal; repeatable.
    #[arg(long = "fatal-pattern", global = true)]
    fatal_patterns: Vec<String>,
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// `pretty` or `json`.
    #[arg(long, global = true)]
    log_format: Option<String>,
    /// Simulate operations with the scripted engine.
    #[arg(long, global = true)]
    dry_run: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            database: self.database.clone(),
            data_dir: self.data_dir.clone(),
            backup_dir: self.backup_dir.clone(),
            progress_percent: self.progress_percent,
            expiration_years: self.expiration_years,
            fatal_patterns: self.fatal_patterns.clone(),
            log_level: self.log_level.clone(),
            log_format: self.log_format.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Back up, restore, and remove the artifacts (the default).
    Run(RunArgs),
    /// Take a single backup.
    Backup(BackupArgs),
    /// Restore from an existing artifact.
    Restore(RestoreArgs),
}

#[derive(Args, Default)]
struct RunArgs {
    /// Add a differential backup and restore it on top of the full one.
    #[arg(long)]
    differential: bool,
    /// Leave artifacts in the backup directory.
    #[arg(long)]
    keep_artifacts: bool,
}

#[derive(Args)]
struct BackupArgs {
    #[arg(long)]
    differential: bool,
    /// Artifact location; defaults to `<database>_<timestamp>.bak`.
    #[arg(long)]
    to: Option<String>,
    /// Keep the transaction log after the backup.
    #[arg(long)]
    keep_log: bool,
}

#[derive(Args)]
struct RestoreArgs {
    /// Artifact location to restore from.
    #[arg(long)]
    from: String,
    /// Overwrite an existing database.
    #[arg(long)]
    replace: bool,
    /// Leave the database waiting for a differential restore.
    #[arg(long)]
    no_recovery: bool,
    /// Proceed past checksum mismatches.
    #[arg(long)]
    continue_after_error: bool,
}

/// Parse arguments, run the requested command, and return the exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();

    let config = match dbvault_config::load(cli.config.as_deref(), cli.overrides()) {
        Ok(config) => config,
        Err(err) => {
            let err = AppError::config("config.load", err);
            eprintln!("error: {}", err.display_message());
            return err.exit_code();
        }
    };
    if let Err(err) = bootstrap::init_logging(&config) {
        eprintln!("error: {}", err.display_message());
        return err.exit_code();
    }

    let result = dispatch(cli, &config).await;
    let code = match result {
        Ok(()) => {
            info!("Success!");
            0
        }
        Err(err) => {
            error!(exit_code = err.exit_code(), "{}", err.display_message());
            err.exit_code()
        }
    };
    info!("Done");
    code
}

async fn dispatch(cli: Cli, config: &PipelineConfig) -> AppResult<()> {
    let Services {
        pipeline,
        events,
        metrics,
    } = bootstrap::build_services(config, bootstrap::dry_run_requested(cli.dry_run))?;
    let logger = bootstrap::spawn_event_logger(&events);
    let cancel = CancellationToken::new();
    let interrupt = bootstrap::spawn_ctrl_c(cancel.clone());

    info!(database = %pipeline.database(), "dbvault starting");
    let command = cli
        .command
        .unwrap_or_else(|| Command::Run(RunArgs::default()));
    let result = match command {
        Command::Run(args) => {
            let options = RunOptions {
                differential: args.differential,
                keep_artifacts: args.keep_artifacts,
            };
            pipeline.run(options, &cancel).await.map(|report| {
                debug!(
                    artifacts = ?report.artifacts,
                    removed = report.removed.len(),
                    "pipeline finished"
                );
            })
        }
        Command::Backup(args) => {
            let options = BackupOptions {
                differential: args.differential,
                location: args.to,
                truncate_log: !args.keep_log,
            };
            pipeline.backup(options, &cancel).await.map(|location| {
                let path = pipeline.artifact_path(&location);
                info!(path = %path.display(), "backup artifact written");
            })
        }
        Command::Restore(args) => {
            let options = RestoreOptions {
                location: args.from,
                replace: args.replace,
                no_recovery: args.no_recovery,
                continue_after_error: args.continue_after_error,
            };
            pipeline.restore(options, &cancel).await
        }
    };

    interrupt.abort();
    let snapshot = metrics.snapshot();
    debug!(
        progress_events = snapshot.progress_events_total,
        release_failures = snapshot.session_release_failures_total,
        "operation metrics"
    );
    drop(pipeline);
    drop(events);
    if let Err(err) = logger.await {
        debug!(error = %err, "event logger join failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_become_overrides() {
        let cli = Cli::parse_from([
            "dbvault",
            "--database",
            "Pubs",
            "--progress-percent",
            "25",
            "--fatal-pattern",
            "media is full",
            "--fatal-pattern",
            "write-protected",
            "backup",
            "--to",
            "pubs.bak",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.database.as_deref(), Some("Pubs"));
        assert_eq!(overrides.progress_percent, Some(25));
        assert_eq!(overrides.fatal_patterns, vec!["media is full", "write-protected"]);
        assert!(overrides.data_dir.is_none());
        match cli.command {
            Some(Command::Backup(args)) => {
                assert_eq!(args.to.as_deref(), Some("pubs.bak"));
                assert!(!args.differential);
                assert!(!args.keep_log);
            }
            _ => panic!("expected backup command"),
        }
    }

    #[test]
    fn subcommand_is_optional() {
        let cli = Cli::parse_from(["dbvault", "--dry-run"]);
        assert!(cli.dry_run);
        assert!(cli.command.is_none());
    }

    #[test]
    fn restore_requires_a_source() {
        assert!(Cli::try_parse_from(["dbvault", "restore"]).is_err());
        let cli = Cli::parse_from(["dbvault", "restore", "--from", "a.bak", "--no-recovery"]);
        match cli.command {
            Some(Command::Restore(args)) => {
                assert_eq!(args.from, "a.bak");
                assert!(args.no_recovery);
                assert!(!args.replace);
            }
            _ => panic!("expected restore command"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
