use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::upload::types::UploadEvent;

/// Default maximum number of log lines to keep in memory
pub const DEFAULT_MAX_LOG_LINES: usize = 10000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    pub filename: Option<String>,
}

/// Bounded in-memory upload activity log.
pub struct LogManager {
    activity_logs: Arc<Mutex<VecDeque<LogEntry>>>,
    max_lines: usize,
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_LINES)
    }
}

impl LogManager {
    pub fn new(max_lines: usize) -> Self {
        Self {
            activity_logs: Arc::new(Mutex::new(VecDeque::with_capacity(max_lines.min(1024)))),
            max_lines,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.activity_logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn log(&self, level: LogLevel, message: &str, filename: Option<String>) {
        let now = chrono::Utc::now();
        let entry = LogEntry {
            id: format!("{}", now.timestamp_nanos_opt().unwrap_or_default()),
            timestamp: now.to_rfc3339(),
            level,
            message: message.to_string(),
            filename,
        };

        let mut logs = self.lock();
        logs.push_back(entry);

        // Remove from front if full
        while logs.len() > self.max_lines {
            logs.pop_front();
        }
    }

    /// Records an upload event. Progress events are not kept.
    pub fn record_event(&self, event: &UploadEvent) {
        match event {
            UploadEvent::Progress { .. } => {}
            UploadEvent::Success { filename, url, .. } => self.log(
                LogLevel::Success,
                &format!("Uploaded: {filename} -> {url}"),
                Some(filename.clone()),
            ),
            UploadEvent::Failure { filename, reason } => self.log(
                LogLevel::Error,
                &format!("Failed: {filename} - {reason}"),
                Some(filename.clone()),
            ),
        }
    }

    pub fn get_logs(&self, filename: Option<&str>) -> Vec<LogEntry> {
        let logs = self.lock();
        match filename {
            Some(name) => logs
                .iter()
                .filter(|l| l.filename.as_deref() == Some(name))
                .cloned()
                .collect(),
            None => logs.iter().cloned().collect(),
        }
    }

    /// Get logs with pagination for better performance with large log sets
    pub fn get_logs_paginated(&self, filename: Option<&str>, offset: usize, limit: usize) -> Vec<LogEntry> {
        let logs = self.lock();
        let filtered: Vec<_> = match filename {
            Some(name) => logs
                .iter()
                .filter(|l| l.filename.as_deref() == Some(name))
                .collect(),
            None => logs.iter().collect(),
        };

        let start = offset.min(filtered.len());
        let end = offset.saturating_add(limit).min(filtered.len());

        filtered[start..end].iter().map(|&entry| entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
