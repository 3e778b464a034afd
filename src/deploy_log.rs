use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

pub const LOG_FILE_NAME: &str = "deploy.log";
pub const ERROR_FILE_NAME: &str = "errors.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Ok,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Ok => "OK",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DeployLog {
    log_path: PathBuf,
    error_path: PathBuf,
}

impl DeployLog {
    pub fn new(log_path: impl Into<PathBuf>, error_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            error_path: error_path.into(),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(LOG_FILE_NAME), dir.join(ERROR_FILE_NAME))
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    pub fn info(&self, message: &str) {
        self.write(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.write(LogLevel::Warn, message);
    }

    pub fn ok(&self, message: &str) {
        self.write(LogLevel::Ok, message);
    }

    pub fn error(&self, message: &str) {
        self.write(LogLevel::Error, message);
        let line = format!("{} | {message}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));
        append(&self.error_path, &line);
    }

    /// Truncates the error file. Called once per process, before any step runs.
    pub fn reset_errors(&self) {
        if let Err(error) = std::fs::write(&self.error_path, "") {
            tracing::warn!(
                path = %self.error_path.display(),
                %error,
                "failed to reset error file"
            );
        }
    }

    fn write(&self, level: LogLevel, message: &str) {
        tracing::debug!(%level, entry = message, "deploy log entry");
        let line = format!("[{}] [{level}] {message}\n", Local::now().format("%H:%M:%S"));
        append(&self.log_path, &line);
    }
}

fn append(path: &Path, line: &str) {
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(line.as_bytes()));
    if let Err(error) = result {
        tracing::warn!(path = %path.display(), %error, "failed to append log line");
    }
}
