use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::models::SectionResult;

const BOX_WIDTH: usize = 60;
const RULE: &str = "─────────────────────────────────────────────";
const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "];

#[derive(Debug, Clone)]
pub struct Console {
    error_file: String,
}

impl Console {
    /// `error_file` is the name the operator is pointed at after a failure.
    pub fn new(error_file: impl Into<String>) -> Self {
        Self {
            error_file: error_file.into(),
        }
    }

    pub fn banner(&self, subtitle: &str) {
        let title = "VPS DEPLOY";
        println!();
        println!("{}", box_top().cyan().bold());
        println!("{}", box_row(title, title.bold().to_string()));
        println!("{}", box_bottom().cyan().bold());
        println!("  {}", subtitle.dimmed());
        println!();
    }

    pub fn section(&self, title: &str) {
        println!();
        println!("{}", box_top().cyan().bold());
        println!("{}", box_row(title, title.bold().to_string()));
        println!("{}", box_bottom().cyan().bold());
    }

    /// Indeterminate spinner keyed by the step label. Hidden when stdout is
    /// not a terminal.
    pub fn spinner(&self, label: &str) -> ProgressBar {
        let spinner = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
        if let Ok(style) = ProgressStyle::with_template("  {spinner:.cyan} {msg:.dim}") {
            spinner.set_style(style.tick_strings(SPINNER_FRAMES));
        }
        spinner.set_message(label.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }

    pub fn step_ok(&self, label: &str) {
        println!("  {} {label}", "✔".green());
    }

    pub fn step_fail(&self, label: &str) {
        println!("  {} {label}", "✘".red());
    }

    pub fn step_note(&self, note: &str) {
        println!("    {}", note.dimmed());
    }

    pub fn section_ok(&self, title: &str) {
        println!();
        println!("  {}", format!("✔  {title} — completed").green().bold());
        println!("  {}", RULE.dimmed());
    }

    pub fn section_fail(&self, title: &str) {
        println!();
        println!(
            "  {}",
            format!("✘  {title} — failed (see {})", self.error_file)
                .red()
                .bold()
        );
        println!("  {}", RULE.dimmed());
    }

    pub fn preflight_ok(&self, label: &str) {
        self.step_ok(label);
    }

    pub fn preflight_fail(&self, label: &str, reason: &str) {
        println!("  {} {label} {}", "✘".red(), format!("— {reason}").dimmed());
    }

    pub fn detail(&self, text: &str) {
        println!("  {}", text.dimmed());
    }

    pub fn summary(&self, results: &[SectionResult]) {
        print!("{}", render_summary(results, &self.error_file));
    }

    pub fn success_banner(&self, message: &str) {
        println!();
        println!("  {}", format!("✔  {message}").green().bold());
    }

    pub fn failure_banner(&self, message: &str) {
        println!();
        println!(
            "  {}",
            format!("✘  {message} — check {}", self.error_file)
                .red()
                .bold()
        );
    }

    pub fn next_steps(&self, app_dir: &str) {
        println!("  {}", "Next steps:".dimmed());
        println!(
            "    1. Populate {} on the VPS",
            format!("/home/deployer/{app_dir}/.env").yellow()
        );
        println!("    2. Run  docker compose restart  if you changed .env after first start");
        println!("    3. Re-run with --start-app to build and start the containers");
        println!();
    }
}

pub fn render_summary(results: &[SectionResult], error_file: &str) -> String {
    let passed = results.iter().filter(|result| result.passed).count();
    let total = results.len();
    let bar = "║".cyan().bold();

    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!("{}\n", box_top().cyan().bold()));
    out.push_str(&format!(
        "{}\n",
        box_row("DEPLOYMENT SUMMARY", "DEPLOYMENT SUMMARY".bold().to_string())
    ));
    out.push_str(&format!("{}\n", box_divider().cyan().bold()));

    for result in results {
        let icon = if result.passed {
            "✔".green()
        } else {
            "✘".red()
        };
        let name = pad_right(&result.title, BOX_WIDTH - 6);
        out.push_str(&format!("{bar}  {icon} {name}{bar}\n"));
    }

    out.push_str(&format!("{}\n", box_divider().cyan().bold()));
    let score = format!("  {passed} / {total} sections passed");
    out.push_str(&format!("{bar}{}{bar}\n", pad_right(&score, BOX_WIDTH - 2)));
    out.push_str(&format!("{}\n\n", box_bottom().cyan().bold()));

    if passed == total {
        out.push_str(&format!("  {}\n", "✔  All sections passed!".green().bold()));
    } else {
        out.push_str(&format!(
            "  {}\n",
            format!("✘  Some sections failed — check {error_file}")
                .red()
                .bold()
        ));
    }
    out.push('\n');
    out
}

fn box_top() -> String {
    format!("╔{}╗", "═".repeat(BOX_WIDTH - 2))
}

fn box_divider() -> String {
    format!("╠{}╣", "═".repeat(BOX_WIDTH - 2))
}

fn box_bottom() -> String {
    format!("╚{}╝", "═".repeat(BOX_WIDTH - 2))
}

/// Row whose visible text is `plain`; `styled` is what gets printed.
fn box_row(plain: &str, styled: String) -> String {
    let bar = "║".cyan().bold();
    let padding = (BOX_WIDTH - 4).saturating_sub(plain.chars().count());
    format!("{bar}  {styled}{}{bar}", " ".repeat(padding))
}

fn pad_right(text: &str, width: usize) -> String {
    let padding = width.saturating_sub(text.chars().count());
    format!("{text}{}", " ".repeat(padding))
}
