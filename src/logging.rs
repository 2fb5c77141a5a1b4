use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const LOG_TARGET: &str = "cache_cleaner";
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub context: Value,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, context: Value) -> Self {
        LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context,
        }
    }

    /// The `operation` field of the context, when present.
    pub fn operation(&self) -> Option<&str> {
        self.context.get("operation").and_then(Value::as_str)
    }
}

/// Logging capability handed to every component at construction.
pub trait OperationLogger: Send + Sync {
    fn log(&self, entry: LogEntry);

    fn info(&self, message: &str, context: Value) {
        self.log(LogEntry::new(LogLevel::Info, message, context));
    }

    fn warn(&self, message: &str, context: Value) {
        self.log(LogEntry::new(LogLevel::Warn, message, context));
    }

    fn error(&self, message: &str, context: Value) {
        self.log(LogEntry::new(LogLevel::Error, message, context));
    }
}

/// Forwards entries to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateLogger;

impl OperationLogger for LogCrateLogger {
    fn log(&self, entry: LogEntry) {
        let context = if entry.context.is_null() {
            String::new()
        } else {
            format!(" {}", entry.context)
        };
        match entry.level {
            LogLevel::Info => log::info!(target: LOG_TARGET, "{}{}", entry.message, context),
            LogLevel::Warn => log::warn!(target: LOG_TARGET, "{}{}", entry.message, context),
            LogLevel::Error => log::error!(target: LOG_TARGET, "{}{}", entry.message, context),
        }
    }
}

/// Keeps the most recent entries in memory and passes each one on.
pub struct HistoryLogger {
    inner: Arc<dyn OperationLogger>,
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl HistoryLogger {
    pub fn new(inner: Arc<dyn OperationLogger>) -> Self {
        Self::with_capacity(inner, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn OperationLogger>, capacity: usize) -> Self {
        HistoryLogger {
            inner,
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn entries_for_operation(&self, operation: &str) -> Vec<LogEntry> {
        self.lock()
            .iter()
            .filter(|entry| entry.operation() == Some(operation))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl OperationLogger for HistoryLogger {
    fn log(&self, entry: LogEntry) {
        {
            let mut entries = self.lock();
            if entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }
        self.inner.log(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn history_is_bounded_and_filterable() {
        let history = HistoryLogger::with_capacity(Arc::new(LogCrateLogger), 3);
        history.info("one", json!({"operation": "a"}));
        history.warn("two", json!({"operation": "b"}));
        history.error("three", json!({"operation": "a"}));
        history.info("four", Value::Null);

        let entries = history.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "two");
        assert_eq!(history.entries_for_operation("a").len(), 1);

        history.clear();
        assert!(history.entries().is_empty());
    }
}
