use crate::config::RunConfig;
use crate::error::DeployError;
use crate::executor::tool_available;
use crate::ui::Console;

pub const SETUP_TOOLS: &[&str] = &["sshpass", "ssh", "scp", "ssh-keygen", "bash"];
pub const BACKUP_TOOLS: &[&str] = &["ssh", "scp"];

const PREFLIGHT_TITLE: &str = "Pre-Flight Checks";

#[derive(Debug, Default)]
pub struct PreflightReport {
    pub failures: Vec<DeployError>,
}

impl PreflightReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Pure check: tool lookup is injected so tests do not depend on the host.
pub fn check<F>(config: &RunConfig, tools: &[&str], is_available: F) -> PreflightReport
where
    F: Fn(&str) -> bool,
{
    let mut failures: Vec<DeployError> = tools
        .iter()
        .filter(|tool| !is_available(tool))
        .map(|tool| DeployError::PreflightToolMissing(tool.to_string()))
        .collect();

    if !config.is_complete() {
        failures.push(DeployError::ConfigMissing(config.missing().to_vec()));
    }

    PreflightReport { failures }
}

pub fn run(console: &Console, config: &RunConfig, tools: &[&str]) -> bool {
    console.section(PREFLIGHT_TITLE);

    let report = check(config, tools, tool_available);
    for tool in tools {
        let missing = report.failures.iter().any(|failure| {
            matches!(failure, DeployError::PreflightToolMissing(name) if name == tool)
        });
        if missing {
            console.preflight_fail(tool, &install_hint(tool));
        } else {
            console.preflight_ok(&format!("{tool} available"));
        }
    }

    if config.is_complete() {
        console.preflight_ok(&format!("VPS IP: {}", config.vps_ip));
        console.preflight_ok(&format!("GitHub repo: {}", config.github_repo));
    } else {
        for key in config.missing() {
            console.preflight_fail(&format!(".env → {key}"), "not filled in");
        }
    }

    for failure in &report.failures {
        tracing::warn!(%failure, "preflight check failed");
    }

    if report.passed() {
        console.section_ok(PREFLIGHT_TITLE);
    } else {
        console.section_fail(PREFLIGHT_TITLE);
    }
    report.passed()
}

fn install_hint(tool: &str) -> String {
    match tool {
        "sshpass" => "not installed — run: brew install sshpass  OR  apt install sshpass".to_string(),
        "ssh" | "scp" | "ssh-keygen" => {
            "not found — install the OpenSSH client package".to_string()
        }
        _ => "not found on PATH".to_string(),
    }
}
