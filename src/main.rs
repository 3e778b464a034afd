use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;

fn main() -> ExitCode {
    let cli = vps_deploy::Cli::parse();
    vps_deploy::init_tracing(cli.verbose);

    match vps_deploy::run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{} {error:#}", "✘".red().bold());
            ExitCode::from(vps_deploy::EXIT_FAILURE)
        }
    }
}
