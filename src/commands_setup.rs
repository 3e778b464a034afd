use std::path::Path;

use anyhow::Context;

use crate::config::RunConfig;
use crate::deploy_log::DeployLog;
use crate::plan::{provisioning_plan, PlanOptions, SetupContext};
use crate::preflight::{self, SETUP_TOOLS};
use crate::report::{RunReport, EXIT_FAILURE};
use crate::runner::{ScriptInvoker, StepRunner};
use crate::ssh_client::SshClient;
use crate::ui::Console;

pub fn setup(
    env_file: &Path,
    log: &DeployLog,
    steps_dir: &Path,
    start_app: bool,
) -> anyhow::Result<u8> {
    let config = RunConfig::load(env_file)?;
    let console = Console::new(log.error_path().display().to_string());

    console.banner("Automated VPS Setup");
    log.info(&format!("Setup started for {}", config.vps_ip));

    if !preflight::run(&console, &config, SETUP_TOOLS) {
        log.error("Pre-flight checks failed");
        console.failure_banner("Pre-flight checks failed");
        return Ok(EXIT_FAILURE);
    }

    anyhow::ensure!(
        steps_dir.is_dir(),
        "Step scripts directory `{}` does not exist",
        steps_dir.display()
    );
    let steps_dir = steps_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve `{}`", steps_dir.display()))?;

    let scripts = ScriptInvoker::new(steps_dir).with_env(config.script_env());
    let runner = StepRunner::new(&console, log)
        .with_scripts(scripts)
        .with_secrets(config.secrets());
    let remote = SshClient::from_config(&config);
    let mut context = SetupContext::new(config.clone(), Box::new(remote));

    let report: RunReport = provisioning_plan(PlanOptions { start_app })
        .iter()
        .map(|section| runner.run_section(section, &mut context))
        .collect();

    console.summary(report.results());
    if report.all_passed() {
        console.next_steps(&config.app_dir_name);
        log.ok("Deploy complete.");
    } else {
        log.error("Deploy finished with failures.");
    }
    tracing::info!(
        passed = report.passed_count(),
        total = report.total(),
        "setup finished"
    );

    Ok(report.exit_status())
}
