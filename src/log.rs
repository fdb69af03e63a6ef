use std::{fs, io::Write, path::PathBuf};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

const LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    fn echoes(self, level: LogLevel) -> bool {
        match self {
            Verbosity::Quiet => level == LogLevel::Error,
            Verbosity::Normal => level >= LogLevel::Warn,
            Verbosity::Verbose => true,
        }
    }
}

/// Operation log: kept in memory, appended to the log file, echoed to stderr.
pub struct OperationLog {
    path: Option<PathBuf>,
    verbosity: Verbosity,
    entries: Vec<LogEntry>,
}

impl OperationLog {
    pub fn new(path: Option<PathBuf>, verbosity: Verbosity) -> Self {
        Self {
            path,
            verbosity,
            entries: Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if self.verbosity.echoes(level) {
            eprintln!("[{}] {message}", log_level_label(level));
        }
        if let Some(path) = &self.path {
            let _ = append_log_file(path, level, &message);
        }

        self.entries.push(LogEntry { level, message });
        if self.entries.len() > LOG_CAPACITY {
            let overflow = self.entries.len() - LOG_CAPACITY;
            self.entries.drain(0..overflow);
        }
    }
}

pub fn log_level_label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "INFO",
        LogLevel::Warn => "WARN",
        LogLevel::Error => "ERROR",
    }
}

fn append_log_file(path: &PathBuf, level: LogLevel, message: &str) -> std::io::Result<()> {
    let label = log_level_label(level);
    let stamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{stamp} [{label}] {message}")
}
