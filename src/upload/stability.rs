//! 파일 쓰기 완료 감지 (stability wait)
//!
//! OS가 "쓰기 완료" 신호를 주지 않으므로, 파일 크기가 연속으로 변하지 않는지
//! 폴링해서 판단합니다. 휴리스틱이라 쓰기 도중 정확히 debounce 구간만큼 멈추는
//! writer에는 속을 수 있습니다.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use thiserror::Error;

use crate::config::StabilityConfig;
use crate::upload::types::UploadEvent;

/// Why a file was judged not ready for upload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotReady {
    #[error("File not found")]
    NotFound,
    #[error("File is locked or in use by another application")]
    Locked,
    #[error("File access error: {0}")]
    Inaccessible(String),
    #[error("File not ready after {attempts} attempts")]
    Unstable { attempts: u32 },
}

/// Filesystem access used by the stability wait.
pub trait FileProbe: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Opens the file, reads its first byte (and the last one when the file
    /// is larger than `tail_threshold`) and returns its current size.
    fn probe(&self, path: &Path, tail_threshold: u64) -> io::Result<u64>;
}

/// [`FileProbe`] backed by the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskProbe;

impl FileProbe for DiskProbe {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn probe(&self, path: &Path, tail_threshold: u64) -> io::Result<u64> {
        let size = std::fs::metadata(path)?.len();
        let mut file = File::open(path)?;
        let mut byte = [0u8; 1];

        if size > 0 {
            let _ = file.read(&mut byte)?;
        }

        // 아직 append 중이거나 배타적 잠금 상태라면 여기서 실패한다
        if size > tail_threshold {
            file.seek(SeekFrom::End(-1))?;
            let _ = file.read(&mut byte)?;
        }

        Ok(size)
    }
}

fn is_lock_error(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

/// Polls a file until its size is stable or the attempt budget runs out.
#[derive(Clone)]
pub struct StabilityWaiter {
    config: StabilityConfig,
    probe: Arc<dyn FileProbe>,
}

impl StabilityWaiter {
    pub fn new(config: StabilityConfig) -> Self {
        Self::with_probe(config, Arc::new(DiskProbe))
    }

    pub fn with_probe(config: StabilityConfig, probe: Arc<dyn FileProbe>) -> Self {
        Self { config, probe }
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    /// Returns the stable size, or why the file never became ready.
    /// Waiting/lock progress is reported through `emit`.
    pub fn check_ready(
        &self,
        path: &Path,
        filename: &str,
        emit: &mut dyn FnMut(UploadEvent),
    ) -> Result<u64, NotReady> {
        let cfg = &self.config;
        let max_attempts = cfg.max_attempts;
        let mut last_size = 0u64;
        let mut stable_count = 0u32;

        for attempt in 0..max_attempts {
            let has_next = attempt + 1 < max_attempts;

            if !self.probe.exists(path) {
                return Err(NotReady::NotFound);
            }

            match self.probe.probe(path, cfg.tail_probe_threshold_bytes) {
                Ok(size) => {
                    if size == last_size && size > 0 {
                        stable_count += 1;
                        if stable_count >= cfg.required_stable_checks {
                            log::debug!(
                                "File ready: {} ({} bytes, stable after {} attempts)",
                                filename,
                                size,
                                attempt + 1
                            );
                            return Ok(size);
                        }
                    } else {
                        stable_count = 0;
                        last_size = size;
                    }

                    if has_next {
                        let size_mb = size as f64 / (1024.0 * 1024.0);
                        emit(UploadEvent::progress(
                            format!(
                                "Waiting for {filename} to be ready ({size_mb:.1}MB, {stable_count}/{} stable)",
                                cfg.required_stable_checks
                            ),
                            waiting_percent(attempt),
                        ));
                        thread::sleep(cfg.poll_delay(size, attempt));
                    }
                }
                Err(e) if is_lock_error(&e) => {
                    if !has_next {
                        return Err(NotReady::Locked);
                    }
                    log::debug!("{} is locked (attempt {}): {}", filename, attempt + 1, e);
                    emit(UploadEvent::progress(
                        format!("File {filename} is locked, waiting..."),
                        waiting_percent(attempt),
                    ));
                    thread::sleep(cfg.lock_backoff.delay(attempt));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(NotReady::NotFound);
                }
                Err(e) => return Err(NotReady::Inaccessible(e.to_string())),
            }
        }

        Err(NotReady::Unstable {
            attempts: max_attempts,
        })
    }

    /// Emits a `Failure` event and returns false when the file is not ready.
    pub fn wait_until_ready(
        &self,
        path: &Path,
        filename: &str,
        emit: &mut dyn FnMut(UploadEvent),
    ) -> bool {
        match self.check_ready(path, filename, emit) {
            Ok(_) => true,
            Err(reason) => {
                log::warn!("{} not ready for upload: {}", filename, reason);
                emit(UploadEvent::Failure {
                    filename: filename.to_string(),
                    reason: reason.to_string(),
                });
                false
            }
        }
    }
}

// Preparing(10) 와 Uploading(50) 사이에 머물도록 제한
fn waiting_percent(attempt: u32) -> u8 {
    attempt.saturating_mul(2).saturating_add(20).min(45) as u8
}
