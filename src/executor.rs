use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{DeployError, DeployResult};

pub const REMOTE_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);
pub const STEP_SCRIPT_TIMEOUT: Duration = Duration::from_secs(180);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            timeout: REMOTE_COMMAND_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs<I>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.envs.extend(envs);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn environment(&self) -> &[(String, String)] {
        &self.envs
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    pub fn display(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Spawns the command, waits at most `spec.timeout` and returns its captured
/// output when it exits with status 0.
///
/// The child leads its own process group. On timeout the whole group is
/// killed, including anything still holding the output pipes after the
/// direct child exited.
pub fn execute(spec: &CommandSpec) -> DeployResult<CommandOutput> {
    tracing::debug!(command = %spec.display(), timeout_secs = spec.timeout.as_secs(), "spawning command");

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.envs.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    lead_own_process_group(&mut command);

    let mut child = command.spawn().map_err(|source| DeployError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    // Pipes must be drained while polling, or a full pipe buffer stalls the child.
    let (sender, receiver) = mpsc::channel();
    let mut open_pipes = 0;
    if let Some(pipe) = child.stdout.take() {
        drain(Stream::Stdout, pipe, sender.clone());
        open_pipes += 1;
    }
    if let Some(pipe) = child.stderr.take() {
        drain(Stream::Stderr, pipe, sender.clone());
        open_pipes += 1;
    }
    drop(sender);

    let deadline = Instant::now() + spec.timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(error) => {
                terminate(&mut child);
                return Err(DeployError::io(
                    format!("Failed while waiting for `{}`", spec.program),
                    error,
                ));
            }
        }

        let now = Instant::now();
        if now >= deadline {
            terminate(&mut child);
            return Err(timed_out(spec));
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    };

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while open_pipes > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(remaining) {
            Ok((Stream::Stdout, bytes)) => stdout = bytes,
            Ok((Stream::Stderr, bytes)) => stderr = bytes,
            Err(RecvTimeoutError::Timeout) => {
                // The child exited but its descendants still hold the pipes.
                terminate(&mut child);
                return Err(timed_out(spec));
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
        open_pipes -= 1;
    }

    let output = CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
    };

    if status.success() {
        Ok(output)
    } else {
        let exit_code = status.code().unwrap_or(-1);
        tracing::debug!(command = %spec.display(), exit_code, "command failed");
        Err(DeployError::CommandFailed {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn drain<R>(stream: Stream, mut pipe: R, sender: Sender<(Stream, Vec<u8>)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        let _ = sender.send((stream, buffer));
    });
}

fn timed_out(spec: &CommandSpec) -> DeployError {
    tracing::warn!(command = %spec.display(), "command timed out; process group killed");
    DeployError::CommandTimedOut {
        command: spec.display(),
        timeout: spec.timeout,
    }
}

fn terminate(child: &mut Child) {
    kill_process_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn lead_own_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn lead_own_process_group(_command: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let Ok(group) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg only sends a signal. The group id is the child's pid,
    // set through `process_group(0)` at spawn.
    unsafe {
        libc::killpg(group, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

pub fn tool_available(name: &str) -> bool {
    which::which(name).is_ok()
}
