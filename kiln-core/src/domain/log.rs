//! Log domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// A log entry recorded during a build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogEntry {
    /// Creates an entry stamped with the current time
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            self.level,
            self.message
        )
    }
}

/// Renders entries as newline-terminated text, one entry per line
pub fn render_lines(entries: &[LogEntry]) -> String {
    let mut text = String::new();
    for entry in entries {
        text.push_str(&entry.to_string());
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_render_lines() {
        let ts = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let entries = vec![
            LogEntry {
                timestamp: ts,
                level: LogLevel::Info,
                message: "Provisioning".to_string(),
            },
            LogEntry {
                timestamp: ts,
                level: LogLevel::Error,
                message: "Step failed".to_string(),
            },
        ];

        let text = render_lines(&entries);
        assert_eq!(
            text,
            "[2024-05-01T12:00:00Z] INFO Provisioning\n[2024-05-01T12:00:00Z] ERROR Step failed\n"
        );
    }

    #[test]
    fn test_render_empty() {
        assert!(render_lines(&[]).is_empty());
    }
}
