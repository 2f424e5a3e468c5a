//! 자동 업로드 모니터
//!
//! 감시 대상 폴더 목록, 파일 감시자, 업로드 큐를 하나로 묶습니다.
//! 감시 중에 대상이 바뀌면 감시자를 중지 후 새 목록으로 재시작합니다.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::config::{UploadConfig, WatchTarget};
use crate::path_validation::validate_watch_directory;
use crate::system_integration::ClipboardSink;
use crate::upload::{UploadClient, UploadCoordinator, UploadEvent};
use crate::watcher::{FileWatcher, WatchError};

pub struct AutoUploadMonitor {
    config: Arc<UploadConfig>,
    coordinator: UploadCoordinator,
    watcher: FileWatcher,
    targets: BTreeSet<WatchTarget>,
    monitoring: bool,
}

impl AutoUploadMonitor {
    /// Builds a monitor whose initial targets come from `config.watch`.
    pub fn new(config: UploadConfig, client: Arc<dyn UploadClient>) -> Self {
        let coordinator = UploadCoordinator::new(&config, client);
        Self::with_coordinator(Arc::new(config), coordinator)
    }

    pub fn with_coordinator(config: Arc<UploadConfig>, coordinator: UploadCoordinator) -> Self {
        let targets = config.watch.iter().cloned().collect();
        Self {
            watcher: FileWatcher::new(Arc::clone(&config)),
            config,
            coordinator,
            targets,
            monitoring: false,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &UploadCoordinator {
        &self.coordinator
    }

    /// Adds a directory, replacing an entry for the same directory with a
    /// different mode. Returns false if the target set did not change.
    pub fn add_target(&mut self, target: WatchTarget) -> Result<bool, WatchError> {
        let directory =
            validate_watch_directory(&target.directory).map_err(WatchError::InvalidDirectory)?;

        let target = WatchTarget {
            directory,
            recursive: target.recursive,
        };
        if self.targets.contains(&target) {
            return Ok(false);
        }

        // 같은 폴더가 다른 모드로 등록되어 있으면 교체
        self.remove_entry(&target.directory);
        self.targets.insert(target);
        self.restart()?;
        Ok(true)
    }

    /// Removes a directory. Returns false if it was not a target.
    pub fn remove_target(&mut self, directory: &Path) -> Result<bool, WatchError> {
        let directory = directory
            .canonicalize()
            .unwrap_or_else(|_| directory.to_path_buf());
        if !self.remove_entry(&directory) {
            return Ok(false);
        }
        self.restart()?;
        Ok(true)
    }

    fn remove_entry(&mut self, directory: &Path) -> bool {
        let before = self.targets.len();
        self.targets.retain(|target| target.directory != directory);
        self.targets.len() != before
    }

    pub fn targets(&self) -> Vec<WatchTarget> {
        self.targets.iter().cloned().collect()
    }

    /// 감시를 시작합니다. 대상이 없으면 `WatchError::NoTargets`.
    pub fn start(&mut self) -> Result<(), WatchError> {
        let targets = self.targets();
        let coordinator = self.coordinator.clone();
        self.watcher.start(&targets, move |path| {
            coordinator.enqueue(path);
        })?;
        self.monitoring = true;
        log::info!("Auto upload started for {} directories", targets.len());
        Ok(())
    }

    /// Stops watching. Items already queued keep uploading.
    pub fn stop(&mut self) {
        if self.monitoring {
            self.watcher.stop();
            self.monitoring = false;
            log::info!("Auto upload stopped");
        }
    }

    /// Stops watching and the upload worker, waiting for the current item.
    pub fn shutdown(&mut self) {
        self.stop();
        self.coordinator.shutdown();
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    fn restart(&mut self) -> Result<(), WatchError> {
        if !self.monitoring {
            return Ok(());
        }
        if self.targets.is_empty() {
            self.stop();
            return Ok(());
        }
        match self.start() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.monitoring = false;
                Err(e)
            }
        }
    }

    /// Copies every uploaded URL into `sink` when `auto_clipboard` is on.
    /// Returns whether the sink was attached.
    pub fn copy_urls_to(&self, sink: Arc<dyn ClipboardSink>) -> bool {
        if !self.config.auto_clipboard {
            return false;
        }
        self.coordinator.subscribe(move |event| {
            if let UploadEvent::Success { url, .. } = event {
                sink.copy_text(url);
                log::info!("URL copied to clipboard");
            }
        });
        true
    }

    /// Enqueues files and the eligible files inside directories.
    /// Returns how many were accepted by the queue.
    pub fn upload_paths(&self, paths: &[PathBuf], recursive: bool) -> usize {
        let mut accepted = 0;
        for path in paths {
            if path.is_dir() {
                for file in collect_files(path, recursive, &self.config) {
                    if self.coordinator.enqueue(file) {
                        accepted += 1;
                    }
                }
            } else if !self.config.is_allowed(path) {
                log::warn!("Skipping unsupported file type: {}", path.display());
            } else if self.coordinator.enqueue(path.clone()) {
                accepted += 1;
            }
        }
        accepted
    }
}

/// Eligible files under `dir`, sorted by name within each directory.
pub fn collect_files(dir: &Path, recursive: bool, config: &UploadConfig) -> Vec<PathBuf> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    WalkDir::new(dir)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| config.is_allowed(path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraceDelays, StabilityConfig};
    use crate::upload::{StabilityWaiter, UploadError, UploadResponse};
    use std::fs;
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;

    struct EchoClient;

    impl UploadClient for EchoClient {
        fn upload(&self, path: &Path) -> Result<UploadResponse, UploadError> {
            Ok(UploadResponse::with_url(format!(
                "http://files/{}",
                path.file_name().unwrap().to_string_lossy()
            )))
        }

        fn service_name(&self) -> &str {
            "Custom Server"
        }
    }

    #[derive(Default)]
    struct RecordingClipboard {
        copied: Mutex<Vec<String>>,
    }

    impl ClipboardSink for RecordingClipboard {
        fn copy_text(&self, text: &str) {
            self.copied.lock().unwrap().push(text.to_string());
        }
    }

    fn monitor() -> AutoUploadMonitor {
        monitor_with(UploadConfig::default())
    }

    fn monitor_with(base: UploadConfig) -> AutoUploadMonitor {
        let config = Arc::new(UploadConfig {
            grace_delays: GraceDelays::uniform(100),
            stability: StabilityConfig::immediate(),
            post_upload_pause_ms: 0,
            ..base
        });
        let coordinator = UploadCoordinator::with_waiter(
            Arc::new(EchoClient),
            StabilityWaiter::new(StabilityConfig::immediate()),
            Duration::ZERO,
        );
        AutoUploadMonitor::with_coordinator(config, coordinator)
    }

    fn next_success(rx: &mpsc::Receiver<UploadEvent>) -> String {
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).expect("event") {
                UploadEvent::Success { filename, .. } => return filename,
                UploadEvent::Failure { filename, reason } => panic!("{filename}: {reason}"),
                UploadEvent::Progress { .. } => {}
            }
        }
    }

    #[test]
    fn test_start_without_targets_fails() {
        let mut monitor = monitor();
        assert!(matches!(monitor.start(), Err(WatchError::NoTargets)));
        assert!(!monitor.is_monitoring());
    }

    #[test]
    fn test_add_target_rejects_missing_directory() {
        let mut monitor = monitor();
        let result = monitor.add_target(WatchTarget::new("/definitely/not/here"));
        assert!(matches!(result, Err(WatchError::InvalidDirectory(_))));
        assert!(monitor.targets().is_empty());
    }

    #[test]
    fn test_add_and_remove_targets() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let mut monitor = monitor();

        assert!(monitor.add_target(WatchTarget::new(a.path())).unwrap());
        assert!(!monitor.add_target(WatchTarget::new(a.path())).unwrap());
        assert!(monitor.add_target(WatchTarget::non_recursive(b.path())).unwrap());
        assert_eq!(monitor.targets().len(), 2);

        assert!(monitor.remove_target(a.path()).unwrap());
        assert!(!monitor.remove_target(a.path()).unwrap());
        assert_eq!(monitor.targets().len(), 1);
        assert!(!monitor.targets()[0].recursive);
    }

    #[test]
    fn test_uploaded_urls_are_copied() {
        let dir = tempdir().unwrap();
        let shot = dir.path().join("VRChat_1.png");
        fs::write(&shot, b"png").unwrap();

        let monitor = monitor();
        let clipboard = Arc::new(RecordingClipboard::default());
        assert!(monitor.copy_urls_to(clipboard.clone()));
        let rx = monitor.coordinator().subscribe_channel();

        monitor.coordinator().enqueue(shot);
        assert_eq!(next_success(&rx), "VRChat_1.png");

        assert_eq!(
            *clipboard.copied.lock().unwrap(),
            vec!["http://files/VRChat_1.png".to_string()]
        );
    }

    #[test]
    fn test_clipboard_disabled_by_config() {
        let monitor = monitor_with(UploadConfig {
            auto_clipboard: false,
            ..UploadConfig::default()
        });
        let clipboard = Arc::new(RecordingClipboard::default());
        assert!(!monitor.copy_urls_to(clipboard.clone()));

        let dir = tempdir().unwrap();
        let shot = dir.path().join("a.png");
        fs::write(&shot, b"png").unwrap();
        let rx = monitor.coordinator().subscribe_channel();
        monitor.coordinator().enqueue(shot);
        assert_eq!(next_success(&rx), "a.png");
        assert!(clipboard.copied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_changing_target_mode_replaces_entry() {
        let a = tempdir().unwrap();
        let mut monitor = monitor();

        assert!(monitor.add_target(WatchTarget::new(a.path())).unwrap());
        assert!(monitor.add_target(WatchTarget::non_recursive(a.path())).unwrap());
        assert!(!monitor.add_target(WatchTarget::non_recursive(a.path())).unwrap());

        let targets = monitor.targets();
        assert_eq!(targets.len(), 1);
        assert!(!targets[0].recursive);
    }

    #[test]
    fn test_new_file_is_uploaded() {
        let dir = tempdir().unwrap();
        let mut monitor = monitor();
        let rx = monitor.coordinator().subscribe_channel();

        monitor.add_target(WatchTarget::new(dir.path())).unwrap();
        monitor.start().unwrap();
        assert!(monitor.is_monitoring());

        fs::write(dir.path().join("VRChat_1.png"), b"png").unwrap();
        assert_eq!(next_success(&rx), "VRChat_1.png");

        monitor.shutdown();
        assert!(!monitor.is_monitoring());
    }

    #[test]
    fn test_target_change_restarts_watcher() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let mut monitor = monitor();
        let rx = monitor.coordinator().subscribe_channel();

        monitor.add_target(WatchTarget::new(a.path())).unwrap();
        monitor.start().unwrap();
        monitor.add_target(WatchTarget::new(b.path())).unwrap();
        monitor.remove_target(a.path()).unwrap();
        assert!(monitor.is_monitoring());

        fs::write(a.path().join("old.png"), b"png").unwrap();
        fs::write(b.path().join("new.png"), b"png").unwrap();

        assert_eq!(next_success(&rx), "new.png");
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());

        // 마지막 대상을 제거하면 감시 종료
        monitor.remove_target(b.path()).unwrap();
        assert!(!monitor.is_monitoring());
    }

    #[test]
    fn test_upload_paths_walks_directories() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(dir.path().join("a.png"), b"a").unwrap();
        fs::write(dir.path().join("notes.md"), b"n").unwrap();
        fs::write(sub.join("b.jpg"), b"b").unwrap();

        let config = UploadConfig::default();
        assert_eq!(collect_files(dir.path(), false, &config).len(), 1);
        assert_eq!(collect_files(dir.path(), true, &config).len(), 2);

        let monitor = monitor();
        let rx = monitor.coordinator().subscribe_channel();
        let accepted = monitor.upload_paths(
            &[dir.path().to_path_buf(), dir.path().join("notes.md")],
            true,
        );
        assert_eq!(accepted, 2);

        let mut uploaded = vec![next_success(&rx), next_success(&rx)];
        uploaded.sort();
        assert_eq!(uploaded, vec!["a.png".to_string(), "b.jpg".to_string()]);
    }
}
