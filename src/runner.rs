use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::deploy_log::DeployLog;
use crate::error::{DeployError, DeployResult};
use crate::executor::{execute, CommandSpec, STEP_SCRIPT_TIMEOUT};
use crate::models::{ScriptRef, Section, SectionResult, Step, StepAction, StepOutcome};
use crate::security::redact_text;
use crate::ui::Console;

pub const DEFAULT_STEPS_DIR: &str = "steps";

#[derive(Debug, Clone)]
pub struct ScriptInvoker {
    steps_dir: PathBuf,
    envs: Vec<(String, String)>,
    timeout: Duration,
}

impl ScriptInvoker {
    pub fn new(steps_dir: impl Into<PathBuf>) -> Self {
        Self {
            steps_dir: steps_dir.into(),
            envs: Vec::new(),
            timeout: STEP_SCRIPT_TIMEOUT,
        }
    }

    pub fn with_env(mut self, envs: Vec<(String, String)>) -> Self {
        self.envs = envs;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self, script: &ScriptRef) -> CommandSpec {
        CommandSpec::new("bash")
            .arg(self.steps_dir.join(&script.script).to_string_lossy().to_string())
            .arg(script.function.clone())
            .envs(self.envs.clone())
            .timeout(self.timeout)
    }

    pub fn invoke(&self, script: &ScriptRef) -> DeployResult<()> {
        execute(&self.command(script)).map(|_| ())
    }
}

pub struct StepRunner<'a> {
    console: &'a Console,
    log: &'a DeployLog,
    scripts: Option<ScriptInvoker>,
    secrets: Vec<String>,
}

impl<'a> StepRunner<'a> {
    pub fn new(console: &'a Console, log: &'a DeployLog) -> Self {
        Self {
            console,
            log,
            scripts: None,
            secrets: Vec::new(),
        }
    }

    /// Required as soon as a section contains `External` steps.
    pub fn with_scripts(mut self, scripts: ScriptInvoker) -> Self {
        self.scripts = Some(scripts);
        self
    }

    pub fn with_secrets(mut self, secrets: Vec<String>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn run_step<C>(&self, step: &Step<C>, context: &mut C) -> StepOutcome {
        let spinner = self.console.spinner(&step.label);
        let started = Instant::now();

        let result = match &step.action {
            StepAction::External(script) => self.invoke_script(script).map(|()| Vec::new()),
            StepAction::Inline(body) => run_inline(body.as_ref(), context),
        };

        spinner.finish_and_clear();
        tracing::debug!(
            step = %step.label,
            elapsed_ms = started.elapsed().as_millis() as u64,
            success = result.is_ok(),
            "step finished"
        );

        match result {
            Ok(notes) => {
                self.console.step_ok(&step.label);
                for note in &notes {
                    self.console.step_note(note);
                }
                self.log.ok(&step.label);
                StepOutcome::succeeded(&step.label)
            }
            Err(error) => {
                self.console.step_fail(&step.label);
                let detail = redact_text(&error.detail(), &self.secrets);
                tracing::warn!(step = %step.label, %detail, "step failed");
                self.log.error(&format!("{}: {detail}", step.label));
                StepOutcome::failed(&step.label, detail)
            }
        }
    }

    fn invoke_script(&self, script: &ScriptRef) -> DeployResult<()> {
        match &self.scripts {
            Some(scripts) => scripts.invoke(script),
            None => Err(DeployError::Step(format!(
                "No steps directory configured for `{}`",
                script.script
            ))),
        }
    }

    /// Runs every step of the section, even after a failure, and passes iff
    /// none failed.
    pub fn run_section<C>(&self, section: &Section<C>, context: &mut C) -> SectionResult {
        self.console.section(&section.title);
        self.log.info(&format!("Section started: {}", section.title));

        let failed = section
            .steps
            .iter()
            .map(|step| self.run_step(step, context))
            .filter(|outcome| !outcome.success)
            .count();

        let passed = failed == 0;
        if passed {
            self.console.section_ok(&section.title);
        } else {
            self.console.section_fail(&section.title);
            self.log.warn(&format!(
                "Section failed: {} ({failed} of {} steps)",
                section.title,
                section.steps.len()
            ));
        }

        SectionResult {
            title: section.title.clone(),
            passed,
        }
    }
}

fn run_inline<C>(
    body: &dyn Fn(&mut C) -> DeployResult<Vec<String>>,
    context: &mut C,
) -> DeployResult<Vec<String>> {
    match panic::catch_unwind(AssertUnwindSafe(|| body(context))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|value| value.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(DeployError::Step(format!("step panicked: {message}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    #[derive(Default)]
    struct Counter {
        executed: usize,
    }

    fn counting_step(label: &str, fail: bool) -> Step<Counter> {
        Step::inline(label, move |counter: &mut Counter| {
            counter.executed += 1;
            if fail {
                Err(DeployError::Step(format!("{} broke", counter.executed)))
            } else {
                Ok(Vec::new())
            }
        })
    }

    fn harness(dir: &Path) -> (Console, DeployLog) {
        let log = DeployLog::in_dir(dir);
        log.reset_errors();
        (Console::new("errors.txt"), log)
    }

    #[test]
    fn section_runs_every_step_and_passes_only_without_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (console, log) = harness(dir.path());
        let runner = StepRunner::new(&console, &log).with_scripts(ScriptInvoker::new(dir.path()));

        for failures in [0usize, 1, 3, 5] {
            let steps = (0..5)
                .map(|index| counting_step(&format!("step {index}"), index < failures))
                .collect();
            let section = Section::new("Mixed", steps);
            let mut counter = Counter::default();

            let result = runner.run_section(&section, &mut counter);

            assert_eq!(counter.executed, 5, "failures={failures}");
            assert_eq!(result.passed, failures == 0, "failures={failures}");
        }
    }

    #[test]
    fn empty_section_passes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (console, log) = harness(dir.path());
        let runner = StepRunner::new(&console, &log).with_scripts(ScriptInvoker::new(dir.path()));

        let result = runner.run_section(&Section::<()>::new("Nothing", Vec::new()), &mut ());
        assert!(result.passed);
        assert_eq!(result.title, "Nothing");
    }

    #[test]
    fn failing_script_logs_stderr_and_redacts_secrets() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("04_firewall.sh"),
            "case \"$1\" in\n  enable) echo \"ufw rejected $ROOT_PASSWORD\" >&2; exit 1 ;;\n  *) exit 0 ;;\nesac\n",
        )
        .expect("write script");
        let (console, log) = harness(dir.path());
        let scripts = ScriptInvoker::new(dir.path())
            .with_env(vec![("ROOT_PASSWORD".to_string(), "hunter2".to_string())]);
        let runner =
        StepRunner::new(&console, &log)
            .with_scripts(scripts)
            .with_secrets(vec!["hunter2".to_string()]);

        let ok = runner.run_step(&Step::<()>::script("Set default policies", "04_firewall.sh", "set_defaults"), &mut ());
        let failed = runner.run_step(&Step::<()>::script("Enable UFW", "04_firewall.sh", "enable"), &mut ());

        assert!(ok.success);
        assert!(!failed.success);
        assert_eq!(failed.error_detail.as_deref(), Some("stderr: ufw rejected ***"));

        let errors = fs::read_to_string(log.error_path()).expect("errors file");
        assert_eq!(errors.lines().count(), 1);
        assert!(errors.contains("Enable UFW: stderr: ufw rejected ***"));
        assert!(!errors.contains("hunter2"));
    }

    #[test]
    fn timed_out_step_fails_and_section_continues() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("slow.sh"), "sleep 5\n").expect("write slow");
        fs::write(dir.path().join("fast.sh"), "echo \"ran $1\"\n").expect("write fast");
        let (console, log) = harness(dir.path());
        let scripts = ScriptInvoker::new(dir.path()).with_timeout(Duration::from_millis(300));
        let runner = StepRunner::new(&console, &log).with_scripts(scripts);

        let hang = Step::<()>::script("Install Docker", "slow.sh", "install");
        let outcome = runner.run_step(&hang, &mut ());
        assert!(!outcome.success);
        assert!(outcome
            .error_detail
            .as_deref()
            .unwrap_or_default()
            .contains("timed out"));

        let section = Section::new(
            "STEP 8 — Docker",
            vec![
                Step::<()>::script("Install Docker", "slow.sh", "install"),
                Step::<()>::script("Verify docker version", "fast.sh", "verify_docker"),
            ],
        );
        let result = runner.run_section(&section, &mut ());
        assert!(!result.passed);

        let main_log = fs::read_to_string(log.log_path()).expect("main log");
        assert!(main_log.contains("[OK] Verify docker version"));
    }

    #[test]
    fn repeated_bootstrap_failure_renders_the_same_verdict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("deployer-exists");
        fs::write(
            dir.path().join("02_initial_setup.sh"),
            format!(
                "case \"$1\" in\n  create_deployer)\n    if [ -e '{0}' ]; then echo 'adduser: The user `deployer` already exists.' >&2; exit 1; fi\n    touch '{0}' ;;\n  *) exit 0 ;;\nesac\n",
                marker.display()
            ),
        )
        .expect("write script");
        let (console, log) = harness(dir.path());
        let runner = StepRunner::new(&console, &log).with_scripts(ScriptInvoker::new(dir.path()));

        let section = || {
            Section::<()>::new(
                "STEP 2 — Initial Server Setup",
                vec![
                    Step::script("Create deployer user", "02_initial_setup.sh", "create_deployer"),
                    Step::script("Add deployer to sudo group", "02_initial_setup.sh", "add_sudo"),
                ],
            )
        };

        let first = runner.run_section(&section(), &mut ());
        let second = runner.run_section(&section(), &mut ());
        let third = runner.run_section(&section(), &mut ());

        assert!(first.passed);
        assert!(!second.passed);
        assert_eq!(second, third);
        assert!(fs::read_to_string(log.log_path())
            .expect("main log")
            .contains("[OK] Add deployer to sudo group"));
    }

    #[test]
    fn script_step_without_steps_directory_fails_cleanly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (console, log) = harness(dir.path());
        let runner = StepRunner::new(&console, &log);

        let outcome = runner.run_step(&Step::<()>::script("Enable UFW", "04_firewall.sh", "enable"), &mut ());
        assert!(!outcome.success);
        assert_eq!(
            outcome.error_detail.as_deref(),
            Some("No steps directory configured for `04_firewall.sh`")
        );
    }

    #[test]
    fn panicking_inline_step_becomes_a_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (console, log) = harness(dir.path());
        let runner = StepRunner::new(&console, &log).with_scripts(ScriptInvoker::new(dir.path()));

        let step = Step::<()>::inline("Write backup manifest", |_| panic!("disk vanished"));
        let outcome = runner.run_step(&step, &mut ());
        assert!(!outcome.success);
        assert_eq!(
            outcome.error_detail.as_deref(),
            Some("step panicked: disk vanished")
        );
    }
}
