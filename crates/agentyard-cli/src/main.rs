//! Agentyard command-line tool.
//!
//! `yard migrate` drives the workspace migration engine. The exit code
//! reports the outcome: 0 on success, 10 when `--check` finds pending
//! migrations, 3 when the prompt is declined, and the engine's outcome
//! code for any failure.

mod args;
mod error;
mod prompt;

use agentyard_migrate::{builtin, ExecuteOutcome, Migrator, OutcomeCode};
use args::{Args, Command, MigrateArgs, Mode};
use clap::Parser;
use error::CliError;
use prompt::TerminalPrompt;
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yard=info,agentyard_migrate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let code = match args.command {
        Command::Migrate(migrate) => match run_migrate(args.workspace, migrate) {
            Ok(code) => code,
            Err(e) => {
                if let CliError::Migration(err) = &e {
                    if err.is_unrecoverable() {
                        eprintln!("The workspace may be inconsistent and needs manual repair.");
                    }
                }
                eprintln!("Error: {e}");
                e.exit_code()
            }
        },
    };
    std::process::exit(code);
}

fn run_migrate(workspace: PathBuf, args: MigrateArgs) -> Result<i32, CliError> {
    let mode = args.mode();
    let json = args.json;
    let config = args.into_config(workspace)?;

    tracing::debug!(
        root = %config.root.display(),
        backup_root = %config.backup_root.display(),
        mode = ?mode,
        "configuration loaded"
    );

    let mut migrator = Migrator::open(config, builtin::registry()?)?;
    if !json {
        migrator = migrator.with_progress(|migration, message| {
            eprintln!("[{migration}] {message}");
        });
    }

    match mode {
        Mode::Check => {
            let report = migrator.check()?;
            emit(&report, json)?;
            Ok(if report.needs_migration() {
                OutcomeCode::MigrationPending.code()
            } else {
                OutcomeCode::Success.code()
            })
        }
        Mode::DryRun => {
            emit(&migrator.dry_run()?, json)?;
            Ok(OutcomeCode::Success.code())
        }
        Mode::Execute { force } => {
            let mut prompt = TerminalPrompt::stdin();
            let report = migrator.execute(force, &mut prompt)?;
            if let Some(e) = prompt.take_error() {
                return Err(e.into());
            }
            emit(&report, json)?;
            Ok(match report.outcome {
                ExecuteOutcome::Declined => OutcomeCode::Declined.code(),
                ExecuteOutcome::UpToDate | ExecuteOutcome::Migrated => OutcomeCode::Success.code(),
            })
        }
        Mode::Rollback { backup_id } => {
            emit(&migrator.rollback(backup_id.as_deref())?, json)?;
            Ok(OutcomeCode::Success.code())
        }
        Mode::Status => {
            emit(&migrator.status()?, json)?;
            Ok(OutcomeCode::Success.code())
        }
    }
}

fn emit<T: Serialize + Display>(report: &T, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}
