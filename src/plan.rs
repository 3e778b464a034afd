use std::path::{Path, PathBuf};

use crate::config::{RunConfig, OPERATIONAL_USER};
use crate::error::{DeployError, DeployResult};
use crate::executor::{execute, CommandSpec};
use crate::models::{Section, Step};
use crate::ssh_client::{shell_quote, RemoteTransport};

const LOGIN_MARKER: &str = "__VPS_DEPLOY_SSH_OK__";

pub struct SetupContext {
    pub config: RunConfig,
    pub remote: Box<dyn RemoteTransport>,
}

impl SetupContext {
    pub fn new(config: RunConfig, remote: Box<dyn RemoteTransport>) -> Self {
        Self { config, remote }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Append the docker compose build-and-start section.
    pub start_app: bool,
}

pub fn provisioning_plan(options: PlanOptions) -> Vec<Section<SetupContext>> {
    let mut sections = vec![
        Section::new(
            "STEP 2 — Initial Server Setup",
            vec![
                Step::script("Update system packages", "02_initial_setup.sh", "update_system"),
                Step::script("Create deployer user", "02_initial_setup.sh", "create_deployer"),
                Step::script("Add deployer to sudo group", "02_initial_setup.sh", "add_sudo"),
                Step::script(
                    "Enable passwordless sudo",
                    "02_initial_setup.sh",
                    "enable_passwordless_sudo",
                ),
            ],
        ),
        Section::new(
            "STEP 3 — SSH Key Setup",
            vec![
                Step::inline("Generate ED25519 key pair", |ctx: &mut SetupContext| {
                    generate_keypair(ctx.config.ssh_key_path())
                }),
                Step::inline("Install public key on VPS", |ctx: &mut SetupContext| {
                    install_public_key(ctx.remote.as_ref(), ctx.config.ssh_key_path())
                }),
                Step::inline("Verify passwordless login", |ctx: &mut SetupContext| {
                    verify_login(ctx.remote.as_ref())
                }),
            ],
        ),
        Section::new(
            "STEP 4 — Firewall (UFW)",
            vec![
                Step::script("Set default policies", "04_firewall.sh", "set_defaults"),
                Step::script("Allow SSH / HTTP / HTTPS", "04_firewall.sh", "allow_core"),
                Step::script("Allow extra ports (config)", "04_firewall.sh", "allow_extra"),
                Step::script("Enable UFW", "04_firewall.sh", "enable"),
                Step::script("Verify firewall status", "04_firewall.sh", "verify"),
            ],
        ),
        Section::new(
            "STEP 5 — Harden SSH",
            vec![
                Step::script("Patch sshd_config", "05_harden_ssh.sh", "patch_config"),
                Step::script("Validate sshd config syntax", "05_harden_ssh.sh", "validate"),
                Step::script("Restart SSH service", "05_harden_ssh.sh", "restart"),
            ],
        ),
        Section::new(
            "STEP 6 — Fail2Ban",
            vec![
                Step::script("Install Fail2Ban", "06_fail2ban.sh", "install"),
                Step::script("Write jail.local (from config)", "06_fail2ban.sh", "write_jail"),
                Step::script("Enable & start Fail2Ban", "06_fail2ban.sh", "start"),
                Step::script("Verify sshd jail active", "06_fail2ban.sh", "verify"),
            ],
        ),
        Section::new(
            "STEP 7 — Automatic Security Updates",
            vec![
                Step::script("Install unattended-upgrades", "07_auto_updates.sh", "install"),
                Step::script("Enable auto-update config", "07_auto_updates.sh", "enable"),
                Step::script("Verify unattended-upgrades", "07_auto_updates.sh", "verify"),
            ],
        ),
        Section::new(
            "STEP 8 — Docker",
            vec![
                Step::script("Install Docker", "08_docker.sh", "install"),
                Step::script("Add deployer to docker group", "08_docker.sh", "add_group"),
                Step::script("Verify docker version", "08_docker.sh", "verify_docker"),
                Step::script("Verify docker compose", "08_docker.sh", "verify_compose"),
            ],
        ),
        Section::new(
            "STEP 12 — Deploy Application Code",
            vec![
                Step::script("Clone / pull repository", "12_deploy_code.sh", "clone_repo"),
                Step::script("Copy & configure .env file", "12_deploy_code.sh", "copy_env"),
                Step::script(
                    "Set .env permissions (600)",
                    "12_deploy_code.sh",
                    "set_env_permissions",
                ),
            ],
        ),
    ];

    if options.start_app {
        sections.push(Section::new(
            "STEP 13 — Start App (Docker Compose)",
            vec![
                Step::script(
                    "Verify docker-compose.yml",
                    "13_docker_compose.sh",
                    "verify_compose_file",
                ),
                Step::script("Build & start containers", "13_docker_compose.sh", "build_and_up"),
                Step::script("Show container status", "13_docker_compose.sh", "show_status"),
                Step::script("Show recent container logs", "13_docker_compose.sh", "show_logs"),
            ],
        ));
    }

    sections
}

fn public_key_path(key_path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.pub", key_path.display()))
}

fn generate_keypair(key_path: &Path) -> DeployResult<Vec<String>> {
    if key_path.exists() {
        return Ok(vec![format!("key already present: {}", key_path.display())]);
    }

    if let Some(parent) = key_path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            DeployError::io(format!("Failed to create `{}`", parent.display()), error)
        })?;
    }

    let spec = CommandSpec::new("ssh-keygen").args([
        "-t".to_string(),
        "ed25519".to_string(),
        "-N".to_string(),
        String::new(),
        "-C".to_string(),
        "vps-deploy".to_string(),
        "-f".to_string(),
        key_path.to_string_lossy().to_string(),
    ]);
    execute(&spec)?;
    Ok(vec![format!("generated {}", key_path.display())])
}

/// Appends the operational public key to `authorized_keys` unless the exact
/// line is already there.
fn install_public_key(remote: &dyn RemoteTransport, key_path: &Path) -> DeployResult<Vec<String>> {
    let pub_path = public_key_path(key_path);
    let public_key = std::fs::read_to_string(&pub_path)
        .map_err(|error| DeployError::io(format!("Failed to read `{}`", pub_path.display()), error))?;
    let public_key = public_key.trim();
    if public_key.is_empty() {
        return Err(DeployError::Step(format!(
            "Public key file `{}` is empty",
            pub_path.display()
        )));
    }

    remote.run_as_root(&authorized_keys_command(public_key))?;
    Ok(Vec::new())
}

fn authorized_keys_command(public_key: &str) -> String {
    let ssh_dir = format!("/home/{OPERATIONAL_USER}/.ssh");
    let keys_file = format!("{ssh_dir}/authorized_keys");
    let quoted = shell_quote(public_key);
    format!(
        "mkdir -p {ssh_dir} && touch {keys_file} && \
         (grep -qxF {quoted} {keys_file} || echo {quoted} >> {keys_file}) && \
         chown -R {OPERATIONAL_USER}:{OPERATIONAL_USER} {ssh_dir} && \
         chmod 700 {ssh_dir} && chmod 600 {keys_file}"
    )
}

fn verify_login(remote: &dyn RemoteTransport) -> DeployResult<Vec<String>> {
    let output = remote.run(&format!("echo {LOGIN_MARKER}"))?;
    if output.contains(LOGIN_MARKER) {
        Ok(Vec::new())
    } else {
        Err(DeployError::Step(format!(
            "Key login answered without the verification marker: {}",
            output.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepAction;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingTransport {
        root_commands: RefCell<Vec<String>>,
        reply: String,
    }

    impl RemoteTransport for RecordingTransport {
        fn run_as_root(&self, command: &str) -> DeployResult<String> {
            self.root_commands.borrow_mut().push(command.to_string());
            Ok(String::new())
        }

        fn run(&self, _command: &str) -> DeployResult<String> {
            Ok(self.reply.clone())
        }

        fn pull(&self, _remote_path: &str, _local_path: &Path) -> DeployResult<()> {
            Ok(())
        }
    }

    #[test]
    fn plan_keeps_declared_order() {
        let titles: Vec<String> = provisioning_plan(PlanOptions::default())
            .into_iter()
            .map(|section| section.title)
            .collect();
        assert_eq!(titles.len(), 8);
        assert_eq!(titles[0], "STEP 2 — Initial Server Setup");
        assert_eq!(titles[1], "STEP 3 — SSH Key Setup");
        assert_eq!(titles[7], "STEP 12 — Deploy Application Code");
    }

    #[test]
    fn start_app_appends_compose_section() {
        let plan = provisioning_plan(PlanOptions { start_app: true });
        let last = plan.last().expect("non-empty plan");
        assert_eq!(last.title, "STEP 13 — Start App (Docker Compose)");
        match &last.steps[1].action {
            StepAction::External(script) => {
                assert_eq!(script.script, "13_docker_compose.sh");
                assert_eq!(script.function, "build_and_up");
            }
            StepAction::Inline(_) => panic!("compose steps are scripts"),
        }
    }

    #[test]
    fn existing_key_is_not_regenerated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key = dir.path().join("id_ed25519");
        std::fs::write(&key, "private").expect("seed key");

        let notes = generate_keypair(&key).expect("existing key");
        assert_eq!(std::fs::read_to_string(&key).expect("key"), "private");
        assert!(notes[0].starts_with("key already present"));
    }

    #[test]
    fn public_key_install_is_idempotent_and_uses_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let key = dir.path().join("id_ed25519");
        std::fs::write(public_key_path(&key), "ssh-ed25519 AAAAC3Nz vps-deploy\n").expect("pub");
        let remote = RecordingTransport::default();

        install_public_key(&remote, &key).expect("install");

        let commands = remote.root_commands.borrow();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("grep -qxF 'ssh-ed25519 AAAAC3Nz vps-deploy'"));
        assert!(commands[0].contains("chmod 600 /home/deployer/.ssh/authorized_keys"));
    }

    #[test]
    fn missing_public_key_fails_without_remote_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let remote = RecordingTransport::default();
        let result = install_public_key(&remote, &dir.path().join("absent"));
        assert!(matches!(result, Err(DeployError::Io { .. })));
        assert!(remote.root_commands.borrow().is_empty());
    }

    #[test]
    fn login_verification_requires_marker() {
        let good = RecordingTransport {
            reply: format!("{LOGIN_MARKER}\n"),
            ..Default::default()
        };
        assert!(verify_login(&good).is_ok());

        let bad = RecordingTransport {
            reply: "Permission denied".to_string(),
            ..Default::default()
        };
        assert!(matches!(verify_login(&bad), Err(DeployError::Step(_))));
    }
}
