use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Severity levels for the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    seq: u64,
    level: &'a str,
    phase: &'a str,
    message: &'a str,
}

/// JSON-line run logger with deterministic sequence numbers.
///
/// Lines are retained in memory so a finished run can hand its full log to
/// the job driver; `echo` mirrors them to stderr for interactive use.
#[derive(Debug, Clone)]
pub struct RunLogger {
    current_level: LogLevel,
    echo: bool,
    seq: u64,
    lines: Vec<String>,
}

impl Default for RunLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info, false)
    }
}

impl RunLogger {
    pub fn new(level: LogLevel, echo: bool) -> Self {
        Self {
            current_level: level,
            echo,
            seq: 0,
            lines: Vec::new(),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.current_level
    }

    pub fn set_level(&mut self, level: LogLevel) {
        self.current_level = level;
    }

    pub fn log(
        &mut self,
        level: LogLevel,
        phase: &str,
        message: &str,
    ) -> Result<(), LoggingError> {
        if level < self.current_level {
            return Ok(());
        }
        let record = LogRecord {
            seq: self.seq,
            level: level.as_str(),
            phase,
            message,
        };
        let line = serde_json::to_string(&record).map_err(LoggingError::Serialize)?;
        if self.echo {
            eprintln!("{line}");
        }
        self.seq += 1;
        self.lines.push(line);
        Ok(())
    }

    pub fn info(&mut self, phase: &str, message: &str) -> Result<(), LoggingError> {
        self.log(LogLevel::Info, phase, message)
    }

    pub fn debug(&mut self, phase: &str, message: &str) -> Result<(), LoggingError> {
        self.log(LogLevel::Debug, phase, message)
    }

    pub fn warn(&mut self, phase: &str, message: &str) -> Result<(), LoggingError> {
        self.log(LogLevel::Warn, phase, message)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// Errors surfaced while serializing log lines.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Human-readable byte count (1024-based).
pub fn humansize(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}
