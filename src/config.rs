//! 업로드 파이프라인 설정 모듈
//!
//! 서버 주소, API 키, 허용 확장자, 유예 시간, 안정화 대기 파라미터를
//! 하나의 `UploadConfig`로 묶어 watcher / coordinator / client에 전달합니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVICE_NAME: &str = "Custom Server";

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif"];

const OTHER_EXTENSIONS: &[&str] = &[
    // video
    "mp4", "avi", "mov", "wmv", "flv", "mkv", "m4v",
    // audio
    "mp3", "wav", "flac", "aac", "ogg", "wma",
    // documents
    "pdf", "txt", "doc", "docx",
    // archives
    "zip", "rar", "7z",
];

/// Watch 대상 디렉토리
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchTarget {
    pub directory: PathBuf,
    #[serde(default = "default_true")]
    pub recursive: bool,
}

impl WatchTarget {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            recursive: true,
        }
    }

    pub fn non_recursive(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            recursive: false,
        }
    }
}

/// Photo-like files get a longer grace period than everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Photo,
    Other,
}

/// How a watcher event introduced the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Created,
    Moved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraceDelays {
    pub photo_created_ms: u64,
    pub other_created_ms: u64,
    pub photo_moved_ms: u64,
    pub other_moved_ms: u64,
}

impl Default for GraceDelays {
    fn default() -> Self {
        Self {
            photo_created_ms: 5000,
            other_created_ms: 2000,
            photo_moved_ms: 2000,
            other_moved_ms: 1000,
        }
    }
}

impl GraceDelays {
    pub fn delay_for(&self, kind: FileKind, arrival: Arrival) -> Duration {
        let ms = match (kind, arrival) {
            (FileKind::Photo, Arrival::Created) => self.photo_created_ms,
            (FileKind::Other, Arrival::Created) => self.other_created_ms,
            (FileKind::Photo, Arrival::Moved) => self.photo_moved_ms,
            (FileKind::Other, Arrival::Moved) => self.other_moved_ms,
        };
        Duration::from_millis(ms)
    }

    /// Same delay for every kind of file. Mostly useful in tests.
    pub fn uniform(ms: u64) -> Self {
        Self {
            photo_created_ms: ms,
            other_created_ms: ms,
            photo_moved_ms: ms,
            other_moved_ms: ms,
        }
    }
}

/// Linear backoff: `base + step * attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub base_ms: u64,
    pub step_ms: u64,
    pub max_ms: u64,
}

impl Backoff {
    pub const fn new(base_ms: u64, step_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            step_ms,
            max_ms,
        }
    }

    pub const fn zero() -> Self {
        Self::new(0, 0, 0)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = self
            .base_ms
            .saturating_add(self.step_ms.saturating_mul(u64::from(attempt)))
            .min(self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Stability-wait 파라미터
///
/// VRChat 스크린샷 기준으로 경험적으로 맞춘 값들이라 설정으로 노출합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub required_stable_checks: u32,
    pub max_attempts: u32,
    /// Above this size the last byte is read as well.
    pub tail_probe_threshold_bytes: u64,
    pub large_file_threshold_bytes: u64,
    pub small_file_backoff: Backoff,
    pub large_file_backoff: Backoff,
    pub lock_backoff: Backoff,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            required_stable_checks: 3,
            max_attempts: 15,
            tail_probe_threshold_bytes: 1024 * 1024,
            large_file_threshold_bytes: 5 * 1024 * 1024,
            small_file_backoff: Backoff::new(1000, 200, 3000),
            large_file_backoff: Backoff::new(3000, 500, 8000),
            lock_backoff: Backoff::new(2000, 500, 5000),
        }
    }
}

impl StabilityConfig {
    /// Polls back to back without sleeping.
    pub fn immediate() -> Self {
        Self {
            small_file_backoff: Backoff::zero(),
            large_file_backoff: Backoff::zero(),
            lock_backoff: Backoff::zero(),
            ..Self::default()
        }
    }

    pub fn poll_delay(&self, size: u64, attempt: u32) -> Duration {
        if size > self.large_file_threshold_bytes {
            self.large_file_backoff.delay(attempt)
        } else {
            self.small_file_backoff.delay(attempt)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub service_name: String,
    pub allowed_extensions: Vec<String>,
    pub photo_extensions: Vec<String>,
    pub grace_delays: GraceDelays,
    pub stability: StabilityConfig,
    pub post_upload_pause_ms: u64,
    pub upload_timeout_ms: u64,
    pub health_timeout_ms: u64,
    /// Copy each uploaded file's URL to the system clipboard.
    pub auto_clipboard: bool,
    pub watch: Vec<WatchTarget>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            api_key: String::new(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            allowed_extensions: PHOTO_EXTENSIONS
                .iter()
                .chain(OTHER_EXTENSIONS)
                .map(|ext| ext.to_string())
                .collect(),
            photo_extensions: PHOTO_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            grace_delays: GraceDelays::default(),
            stability: StabilityConfig::default(),
            post_upload_pause_ms: 500,
            upload_timeout_ms: 60_000,
            health_timeout_ms: 10_000,
            auto_clipboard: true,
            watch: Vec::new(),
        }
    }
}

impl UploadConfig {
    /// YAML 설정 파일을 읽습니다. 누락된 필드는 기본값으로 채워집니다.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: UploadConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.api_base_url = normalize_base_url(&config.api_base_url);
        Ok(config)
    }

    /// Like [`UploadConfig::load`] but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        crate::input_validation::validate_base_url(&self.api_base_url)?;
        crate::input_validation::validate_extensions(&self.allowed_extensions)?;
        crate::input_validation::validate_extensions(&self.photo_extensions)?;
        crate::input_validation::validate_stability(&self.stability)?;
        Ok(())
    }

    /// Returns `None` for files outside the allow-list.
    pub fn classify(&self, path: &Path) -> Option<FileKind> {
        let ext = extension_of(path)?;
        if !contains_ext(&self.allowed_extensions, &ext) {
            return None;
        }
        if contains_ext(&self.photo_extensions, &ext) {
            Some(FileKind::Photo)
        } else {
            Some(FileKind::Other)
        }
    }

    pub fn is_allowed(&self, path: &Path) -> bool {
        self.classify(path).is_some()
    }

    pub fn post_upload_pause(&self) -> Duration {
        Duration::from_millis(self.post_upload_pause_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

/// `example.com/` -> `http://example.com`
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn contains_ext(list: &[String], ext: &str) -> bool {
    list.iter()
        .any(|candidate| candidate.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

fn default_true() -> bool {
    true
}
