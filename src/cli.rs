use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::backup::DEFAULT_BACKUPS_DIR;
use crate::config::DEFAULT_ENV_PATH;
use crate::runner::DEFAULT_STEPS_DIR;

#[derive(Debug, Parser)]
#[command(
    name = "vps-deploy",
    version,
    about = "Provision, harden and back up a single VPS over SSH"
)]
pub struct Cli {
    /// Key/value settings file.
    #[arg(long, global = true, default_value = DEFAULT_ENV_PATH)]
    pub env_file: PathBuf,

    /// Directory receiving deploy.log and errors.txt.
    #[arg(long, global = true, default_value = ".")]
    pub log_dir: PathBuf,

    /// Emit debug diagnostics on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full provisioning plan against the VPS.
    Setup {
        /// Directory holding the numbered step scripts.
        #[arg(long, default_value = DEFAULT_STEPS_DIR)]
        steps_dir: PathBuf,

        /// Also build and start the app with docker compose.
        #[arg(long)]
        start_app: bool,
    },
    /// Pull a timestamped snapshot of the deployed app.
    Backup {
        #[arg(long, default_value = DEFAULT_BACKUPS_DIR)]
        backups_dir: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_defaults() {
        let cli = Cli::try_parse_from(["vps-deploy", "setup"]).expect("parse");
        assert_eq!(cli.env_file, PathBuf::from(".env"));
        assert!(!cli.verbose);
        match cli.command {
            Command::Setup {
                steps_dir,
                start_app,
            } => {
                assert_eq!(steps_dir, PathBuf::from("steps"));
                assert!(!start_app);
            }
            Command::Backup { .. } => panic!("expected setup"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "vps-deploy",
            "backup",
            "--backups-dir",
            "/srv/snapshots",
            "--env-file",
            "prod.env",
            "-v",
        ])
        .expect("parse");
        assert_eq!(cli.env_file, PathBuf::from("prod.env"));
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Command::Backup { ref backups_dir } if backups_dir == &PathBuf::from("/srv/snapshots")
        ));
    }

    #[test]
    fn a_subcommand_is_required() {
        assert!(Cli::try_parse_from(["vps-deploy"]).is_err());
    }
}
