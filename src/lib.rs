pub mod backup;
pub mod cli;
mod commands_backup;
mod commands_setup;
pub mod config;
pub mod deploy_log;
pub mod error;
pub mod executor;
pub mod models;
pub mod plan;
pub mod preflight;
pub mod report;
pub mod runner;
pub mod security;
pub mod ssh_client;
pub mod telemetry;
pub mod ui;

use std::process::ExitCode;

use anyhow::Context;

pub use cli::{Cli, Command};
pub use config::RunConfig;
pub use deploy_log::DeployLog;
pub use error::{DeployError, DeployResult};
pub use models::{ScriptRef, Section, SectionResult, Step, StepAction, StepOutcome};
pub use report::{RunReport, EXIT_FAILURE};
pub use runner::{ScriptInvoker, StepRunner};
pub use ssh_client::{RemoteTransport, SshClient};
pub use telemetry::init_tracing;

/// Entry point behind the binary. The error file is truncated before anything
/// else so it only ever describes the current run.
pub fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    std::fs::create_dir_all(&cli.log_dir)
        .with_context(|| format!("Failed to create log directory `{}`", cli.log_dir.display()))?;
    let log = DeployLog::in_dir(&cli.log_dir);
    log.reset_errors();

    let outcome = match &cli.command {
        Command::Setup {
            steps_dir,
            start_app,
        } => commands_setup::setup(&cli.env_file, &log, steps_dir, *start_app),
        Command::Backup { backups_dir } => {
            commands_backup::backup(&cli.env_file, &log, backups_dir)
        }
    };

    if let Err(error) = &outcome {
        log.error(&format!("{error:#}"));
    }
    outcome.map(ExitCode::from)
}
