use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, DeployResult};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const OPERATIONAL_USER: &str = "deployer";

/// Keys that must be filled in before anything touches the VPS.
pub const REQUIRED_KEYS: [&str; 6] = [
    "VPS_IP",
    "ROOT_PASSWORD",
    "SSH_KEY_PATH",
    "GITHUB_REPO",
    "GITHUB_TOKEN",
    "APP_DIR_NAME",
];

/// Values shipped in `.env.example` that count as "not filled in".
const PLACEHOLDERS: [&str; 6] = [
    "your-vps-ip-here",
    "your-root-password-here",
    "your-username",
    "your-repo",
    "your-app-name",
    "your-github-token-here",
];

const DEFAULT_APP_PORT: &str = "3000";
const DEFAULT_FAIL2BAN_BANTIME: &str = "3600";
const DEFAULT_FAIL2BAN_FINDTIME: &str = "600";
const DEFAULT_FAIL2BAN_MAXRETRY: &str = "5";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfig {
    pub vps_ip: String,
    pub root_password: String,
    pub ssh_key_path: String,
    pub github_repo: String,
    pub github_token: String,
    pub app_dir_name: String,
    pub app_port: String,
    pub extra_ports: Vec<String>,
    pub fail2ban_bantime: String,
    pub fail2ban_findtime: String,
    pub fail2ban_maxretry: String,
    pub backup_volume_filter: String,
    missing: Vec<String>,
}

impl RunConfig {
    pub fn load(path: &Path) -> DeployResult<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeployError::ConfigNotFound(path.to_path_buf()));
            }
            Err(error) => {
                return Err(DeployError::io(
                    format!("Failed to read `{}`", path.display()),
                    error,
                ));
            }
        };

        let home = std::env::var_os("HOME").map(PathBuf::from);
        Ok(Self::from_env_map(&parse_env(&content), home.as_deref()))
    }

    pub fn from_env_map(env: &BTreeMap<String, String>, home: Option<&Path>) -> Self {
        let value = |key: &str| env.get(key).cloned().unwrap_or_default();
        let value_or = |key: &str, default: &str| {
            env.get(key)
                .filter(|value| !value.is_empty())
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        let app_dir_name = value("APP_DIR_NAME");
        let mut config = Self {
            vps_ip: value("VPS_IP"),
            root_password: value("ROOT_PASSWORD"),
            ssh_key_path: expand_home(&value("SSH_KEY_PATH"), home),
            github_repo: value("GITHUB_REPO"),
            github_token: value("GITHUB_TOKEN"),
            app_port: value_or("APP_PORT", DEFAULT_APP_PORT),
            extra_ports: value("EXTRA_PORTS")
                .split(',')
                .map(str::trim)
                .filter(|port| !port.is_empty())
                .map(str::to_string)
                .collect(),
            fail2ban_bantime: value_or("FAIL2BAN_BANTIME", DEFAULT_FAIL2BAN_BANTIME),
            fail2ban_findtime: value_or("FAIL2BAN_FINDTIME", DEFAULT_FAIL2BAN_FINDTIME),
            fail2ban_maxretry: value_or("FAIL2BAN_MAXRETRY", DEFAULT_FAIL2BAN_MAXRETRY),
            backup_volume_filter: value_or("BACKUP_VOLUME_FILTER", &app_dir_name),
            app_dir_name,
            missing: Vec::new(),
        };

        config.missing = REQUIRED_KEYS
            .iter()
            .filter(|key| !is_filled_in(config.required_value(key)))
            .map(|key| key.to_string())
            .collect();
        config
    }

    /// Required keys that were absent, empty or still a placeholder.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn ssh_key_path(&self) -> &Path {
        Path::new(&self.ssh_key_path)
    }

    pub fn remote_app_path(&self) -> String {
        format!("/home/{OPERATIONAL_USER}/{}", self.app_dir_name)
    }

    pub fn script_env(&self) -> Vec<(String, String)> {
        [
            ("VPS_IP", self.vps_ip.clone()),
            ("ROOT_PASSWORD", self.root_password.clone()),
            ("SSH_KEY_PATH", self.ssh_key_path.clone()),
            ("GITHUB_REPO", self.github_repo.clone()),
            ("GITHUB_TOKEN", self.github_token.clone()),
            ("APP_DIR_NAME", self.app_dir_name.clone()),
            ("APP_PORT", self.app_port.clone()),
            ("EXTRA_PORTS", self.extra_ports.join(",")),
            ("FAIL2BAN_BANTIME", self.fail2ban_bantime.clone()),
            ("FAIL2BAN_FINDTIME", self.fail2ban_findtime.clone()),
            ("FAIL2BAN_MAXRETRY", self.fail2ban_maxretry.clone()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
    }

    /// Values that must never appear verbatim in log files.
    pub fn secrets(&self) -> Vec<String> {
        [&self.root_password, &self.github_token]
            .into_iter()
            .filter(|value| !value.trim().is_empty())
            .cloned()
            .collect()
    }

    fn required_value(&self, key: &str) -> &str {
        match key {
            "VPS_IP" => &self.vps_ip,
            "ROOT_PASSWORD" => &self.root_password,
            "SSH_KEY_PATH" => &self.ssh_key_path,
            "GITHUB_REPO" => &self.github_repo,
            "GITHUB_TOKEN" => &self.github_token,
            "APP_DIR_NAME" => &self.app_dir_name,
            _ => "",
        }
    }
}

/// Parses `KEY=VALUE` lines. Blank lines and `#` comments are skipped, and one
/// layer of matching quotes is stripped from values.
pub fn parse_env(content: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        env.insert(key.to_string(), unquote(value.trim()).to_string());
    }

    env
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    let quoted = bytes.len() >= 2
        && matches!(bytes[0], b'"' | b'\'')
        && bytes[bytes.len() - 1] == bytes[0];
    if quoted {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn is_filled_in(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    !lowered.is_empty()
        && !PLACEHOLDERS
            .iter()
            .any(|placeholder| lowered.contains(placeholder))
}

fn expand_home(value: &str, home: Option<&Path>) -> String {
    let Some(home) = home else {
        return value.to_string();
    };
    let home = home.to_string_lossy();

    if let Some(rest) = value.strip_prefix("~/") {
        return format!("{home}/{rest}");
    }
    value.replacen("$HOME", &home, 1)
}
