use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::backup::{backup_section, backup_stamp, BackupContext};
use crate::config::RunConfig;
use crate::deploy_log::DeployLog;
use crate::preflight::{self, BACKUP_TOOLS};
use crate::report::{RunReport, EXIT_FAILURE};
use crate::runner::StepRunner;
use crate::ssh_client::SshClient;
use crate::ui::Console;

pub fn backup(env_file: &Path, log: &DeployLog, backups_dir: &Path) -> anyhow::Result<u8> {
    let config = RunConfig::load(env_file)?;
    let console = Console::new(log.error_path().display().to_string());

    console.banner("VPS Backup");

    if !preflight::run(&console, &config, BACKUP_TOOLS) {
        log.error("Pre-flight checks failed");
        console.failure_banner("Pre-flight checks failed");
        return Ok(EXIT_FAILURE);
    }

    let stamp = backup_stamp();
    let dir = backups_dir.join(&stamp);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create backup directory `{}`", dir.display()))?;

    console.detail(&format!("Target : {}", config.vps_ip));
    console.detail(&format!("Output : {}", dir.display()));
    log.info(&format!("Backup started into {}", dir.display()));

    let runner = StepRunner::new(&console, log).with_secrets(config.secrets());
    let remote = SshClient::from_config(&config);
    let mut context = BackupContext::new(&config, dir.clone(), stamp, Box::new(remote));

    let mut report = RunReport::new();
    report.record(runner.run_section(&backup_section(), &mut context));

    if report.all_passed() {
        console.success_banner("Backup complete!");
        console.detail(&format!("Location: {}", dir.display()));
        log.ok(&format!("Backup complete: {}", dir.display()));
    } else {
        console.failure_banner("Backup failed");
        log.error("Backup finished with failures.");
    }
    tracing::info!(artifacts = context.artifacts.len(), "backup finished");

    Ok(report.exit_status())
}
