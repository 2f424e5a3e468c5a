use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A file waiting in the upload queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpload {
    pub filepath: PathBuf,
    pub filename: String,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingUpload {
    pub fn new(filepath: PathBuf) -> Self {
        let filename = display_name(&filepath);
        Self {
            filepath,
            filename,
            enqueued_at: Utc::now(),
        }
    }
}

/// Basename of `path`, falling back to the whole path when there is none.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Outcome of one upload attempt. Exactly one per `PendingUpload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UploadResult {
    #[serde(rename_all = "camelCase")]
    Success {
        filename: String,
        service_name: String,
        url: String,
        size_bytes: u64,
    },
    #[serde(rename_all = "camelCase")]
    Failure { filename: String, reason: String },
}

impl UploadResult {
    pub fn filename(&self) -> &str {
        match self {
            UploadResult::Success { filename, .. } | UploadResult::Failure { filename, .. } => {
                filename
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UploadResult::Success { .. })
    }
}

/// Everything the coordinator reports to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UploadEvent {
    Progress {
        status: String,
        percent: u8,
    },
    #[serde(rename_all = "camelCase")]
    Success {
        filename: String,
        service_name: String,
        url: String,
        size_bytes: u64,
    },
    #[serde(rename_all = "camelCase")]
    Failure { filename: String, reason: String },
}

impl UploadEvent {
    pub fn progress(status: impl Into<String>, percent: u8) -> Self {
        UploadEvent::Progress {
            status: status.into(),
            percent: percent.min(100),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadEvent::Progress { .. })
    }
}

impl From<UploadResult> for UploadEvent {
    fn from(result: UploadResult) -> Self {
        match result {
            UploadResult::Success {
                filename,
                service_name,
                url,
                size_bytes,
            } => UploadEvent::Success {
                filename,
                service_name,
                url,
                size_bytes,
            },
            UploadResult::Failure { filename, reason } => UploadEvent::Failure { filename, reason },
        }
    }
}

/// Worker thread lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Idle,
    Running,
    Stopped,
}

/// Running totals over upload results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_bytes: u64,
}

impl UploadStats {
    pub fn record(&mut self, event: &UploadEvent) {
        match event {
            UploadEvent::Success { size_bytes, .. } => {
                self.total += 1;
                self.successful += 1;
                self.total_bytes += size_bytes;
            }
            UploadEvent::Failure { .. } => {
                self.total += 1;
                self.failed += 1;
            }
            UploadEvent::Progress { .. } => {}
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64 * 100.0
        }
    }
}
