use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{RunConfig, OPERATIONAL_USER};
use crate::error::{DeployError, DeployResult};
use crate::executor::{execute, CommandSpec, REMOTE_COMMAND_TIMEOUT};

pub const SSH_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const ROOT_USER: &str = "root";

/// ssh and scp reserve this status for their own connection-phase failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

pub trait RemoteTransport {
    /// Password-authenticated root login. Only used before the operational
    /// key is installed.
    fn run_as_root(&self, command: &str) -> DeployResult<String>;

    fn run(&self, command: &str) -> DeployResult<String>;

    fn run_sudo(&self, command: &str) -> DeployResult<String> {
        self.run(&format!("sudo {command}"))
    }

    fn pull(&self, remote_path: &str, local_path: &Path) -> DeployResult<()>;
}

#[derive(Debug, Clone)]
pub struct SshClient {
    host: String,
    root_password: String,
    key_path: PathBuf,
    timeout: Duration,
}

impl SshClient {
    pub fn new(
        host: impl Into<String>,
        root_password: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            root_password: root_password.into(),
            key_path: key_path.into(),
            timeout: REMOTE_COMMAND_TIMEOUT,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            config.vps_ip.clone(),
            config.root_password.clone(),
            config.ssh_key_path(),
        )
    }

    /// The password travels in `SSHPASS`, never in the argument vector.
    pub fn root_command(&self, command: &str) -> CommandSpec {
        CommandSpec::new("sshpass")
            .arg("-e")
            .envs([("SSHPASS".to_string(), self.root_password.clone())])
            .arg("ssh")
            .args(common_options())
            .arg(format!("{ROOT_USER}@{}", self.host))
            .arg(command)
            .timeout(self.timeout)
    }

    pub fn operational_command(&self, command: &str) -> CommandSpec {
        CommandSpec::new("ssh")
            .args(self.key_options())
            .arg(format!("{OPERATIONAL_USER}@{}", self.host))
            .arg(command)
            .timeout(self.timeout)
    }

    pub fn pull_command(&self, remote_path: &str, local_path: &Path) -> CommandSpec {
        CommandSpec::new("scp")
            .args(self.key_options())
            .arg(format!("{OPERATIONAL_USER}@{}:{remote_path}", self.host))
            .arg(local_path.to_string_lossy().to_string())
            .timeout(self.timeout)
    }

    fn key_options(&self) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.key_path.to_string_lossy().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ];
        args.extend(common_options());
        args
    }

    fn invoke(&self, spec: CommandSpec) -> DeployResult<String> {
        match execute(&spec) {
            Ok(output) => Ok(output.stdout),
            Err(DeployError::CommandFailed {
                exit_code: SSH_CONNECTION_FAILURE,
                stderr,
                stdout,
            }) => {
                let detail = if stderr.trim().is_empty() {
                    stdout.trim().to_string()
                } else {
                    stderr.trim().to_string()
                };
                tracing::warn!(host = %self.host, %detail, "ssh connection failed");
                Err(DeployError::RemoteUnreachable {
                    host: self.host.clone(),
                    detail,
                })
            }
            Err(error) => Err(error),
        }
    }
}

impl RemoteTransport for SshClient {
    fn run_as_root(&self, command: &str) -> DeployResult<String> {
        self.invoke(self.root_command(command))
    }

    fn run(&self, command: &str) -> DeployResult<String> {
        self.invoke(self.operational_command(command))
    }

    fn pull(&self, remote_path: &str, local_path: &Path) -> DeployResult<()> {
        self.invoke(self.pull_command(remote_path, local_path))
            .map(|_| ())
    }
}

/// Host keys are not verified: the target is a single freshly provisioned VPS
/// whose key is unknown before the first connection.
fn common_options() -> Vec<String> {
    [
        "StrictHostKeyChecking=no".to_string(),
        format!("UserKnownHostsFile={}", null_device_path()),
        format!("ConnectTimeout={SSH_CONNECT_TIMEOUT_SECONDS}"),
        "LogLevel=ERROR".to_string(),
    ]
    .into_iter()
    .flat_map(|option| ["-o".to_string(), option])
    .collect()
}

fn null_device_path() -> &'static str {
    if cfg!(windows) {
        "NUL"
    } else {
        "/dev/null"
    }
}

pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SshClient {
        SshClient::new("203.0.113.10", "hunter2", "/home/alice/.ssh/id_ed25519")
    }

    #[test]
    fn root_command_uses_password_identity() {
        let spec = client().root_command("id -u deployer");
        assert_eq!(spec.program(), "sshpass");
        let args = spec.arguments();
        assert_eq!(args[0], "-e");
        assert_eq!(args[1], "ssh");
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert_eq!(args[args.len() - 2], "root@203.0.113.10");
        assert_eq!(args[args.len() - 1], "id -u deployer");
        assert!(!args.contains(&"-i".to_string()));
    }

    #[test]
    fn root_password_stays_out_of_the_rendered_command() {
        let spec = client().root_command("id -u deployer");
        assert!(!spec.display().contains("hunter2"), "{}", spec.display());
        assert!(spec
            .arguments()
            .iter()
            .all(|arg| !arg.contains("hunter2")));
        assert_eq!(
            spec.environment().to_vec(),
            vec![("SSHPASS".to_string(), "hunter2".to_string())]
        );
    }

    #[test]
    fn connection_failure_status_maps_to_unreachable() {
        let spec = CommandSpec::new("sh").args([
            "-c",
            "echo 'ssh: connect to host 203.0.113.10 port 22: Connection timed out' >&2; exit 255",
        ]);
        match client().invoke(spec) {
            Err(DeployError::RemoteUnreachable { host, detail }) => {
                assert_eq!(host, "203.0.113.10");
                assert!(detail.contains("Connection timed out"));
            }
            other => panic!("expected RemoteUnreachable, got {other:?}"),
        }
    }

    #[test]
    fn remote_command_failure_keeps_its_status() {
        let spec = CommandSpec::new("sh").args(["-c", "echo 'ufw: not found' >&2; exit 127"]);
        assert!(matches!(
            client().invoke(spec),
            Err(DeployError::CommandFailed { exit_code: 127, .. })
        ));
    }

    #[test]
    fn operational_command_uses_key_identity() {
        let spec = client().operational_command("docker ps");
        assert_eq!(spec.program(), "ssh");
        let args = spec.arguments();
        assert_eq!(args[0], "-i");
        assert_eq!(args[1], "/home/alice/.ssh/id_ed25519");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args[args.len() - 2], "deployer@203.0.113.10");
        assert_eq!(args[args.len() - 1], "docker ps");
        assert_eq!(spec.timeout_duration(), REMOTE_COMMAND_TIMEOUT);
    }

    #[test]
    fn pull_command_targets_remote_path() {
        let spec = client().pull_command("/tmp/app.tar.gz", Path::new("/backups/app.tar.gz"));
        assert_eq!(spec.program(), "scp");
        let args = spec.arguments();
        assert_eq!(args[args.len() - 2], "deployer@203.0.113.10:/tmp/app.tar.gz");
        assert_eq!(args[args.len() - 1], "/backups/app.tar.gz");
    }

    #[test]
    fn quoting_survives_embedded_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
    }

    struct EchoTransport;

    impl RemoteTransport for EchoTransport {
        fn run_as_root(&self, command: &str) -> DeployResult<String> {
            Ok(format!("root:{command}"))
        }

        fn run(&self, command: &str) -> DeployResult<String> {
            Ok(command.to_string())
        }

        fn pull(&self, _remote_path: &str, _local_path: &Path) -> DeployResult<()> {
            Ok(())
        }
    }

    #[test]
    fn sudo_prefixes_operational_command() {
        assert_eq!(
            EchoTransport.run_sudo("ufw status").expect("echo"),
            "sudo ufw status"
        );
    }
}
