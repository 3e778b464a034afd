use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(".env file not found at `{}`. Copy .env.example to .env and fill in your values", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Configuration keys not filled in: {}", .0.join(", "))]
    ConfigMissing(Vec<String>),

    #[error("Required local tool `{0}` is not installed")]
    PreflightToolMissing(String),

    #[error("Command exited with status {exit_code}")]
    CommandFailed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Command `{command}` timed out after {}s", .timeout.as_secs())]
    CommandTimedOut { command: String, timeout: Duration },

    #[error("Remote host `{host}` is unreachable: {detail}")]
    RemoteUnreachable { host: String, detail: String },

    #[error("Failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Step(String),
}

impl DeployError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Most specific human detail available: captured stderr, then stdout,
    /// then the error's own message.
    pub fn detail(&self) -> String {
        if let Self::CommandFailed { stdout, stderr, .. } = self {
            let stderr = stderr.trim();
            let stdout = stdout.trim();
            let mut parts = Vec::new();
            if !stderr.is_empty() {
                parts.push(format!("stderr: {stderr}"));
            }
            if !stdout.is_empty() {
                parts.push(format!("stdout: {stdout}"));
            }
            if !parts.is_empty() {
                return parts.join(" | ");
            }
        }
        self.to_string()
    }
}

pub type DeployResult<T> = Result<T, DeployError>;
