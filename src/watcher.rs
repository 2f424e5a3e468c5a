//! 파일 시스템 감시 모듈
//!
//! 생성/이동 이벤트를 받아 허용된 확장자만 골라내고, 유예 시간이 지난 뒤에도
//! 파일이 남아 있으면 업로드 후보로 넘깁니다. 유예 시간 안에 이름이 바뀐 파일은
//! 최종 경로 하나만 후보가 됩니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;

use crate::config::{Arrival, UploadConfig, WatchTarget};
use crate::path_validation::validate_watch_directory;
use crate::scheduler::DelayScheduler;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("No directories to watch")]
    NoTargets,

    #[error("Invalid watch directory: {0}")]
    InvalidDirectory(String),

    #[error("File watching unavailable: {0}")]
    Notify(#[from] notify::Error),
}

/// What a single filesystem event means for pending candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    Schedule { path: PathBuf, delay: Duration },
    Cancel(PathBuf),
}

/// Translates a raw notify event into scheduler actions.
pub fn plan_actions(event: &Event, config: &UploadConfig) -> Vec<WatchAction> {
    let mut actions = Vec::new();

    match event.kind {
        EventKind::Create(CreateKind::Folder) => {}
        EventKind::Create(_) => {
            for path in &event.paths {
                actions.extend(schedule_action(path, Arrival::Created, config));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths = [from, to]
            if let [from, to] = event.paths.as_slice() {
                actions.push(WatchAction::Cancel(from.clone()));
                actions.extend(schedule_action(to, Arrival::Moved, config));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in &event.paths {
                actions.push(WatchAction::Cancel(path.clone()));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &event.paths {
                actions.extend(schedule_action(path, Arrival::Moved, config));
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // FSEvents 등은 from/to 구분 없이 개별 경로만 보고함
            for path in &event.paths {
                if path.exists() {
                    actions.extend(schedule_action(path, Arrival::Moved, config));
                } else {
                    actions.push(WatchAction::Cancel(path.clone()));
                }
            }
        }
        _ => {}
    }

    actions
}

fn schedule_action(path: &Path, arrival: Arrival, config: &UploadConfig) -> Option<WatchAction> {
    if path.is_dir() {
        return None;
    }
    let kind = config.classify(path)?;
    Some(WatchAction::Schedule {
        path: path.to_path_buf(),
        delay: config.grace_delays.delay_for(kind, arrival),
    })
}

fn apply_actions(scheduler: &DelayScheduler, actions: Vec<WatchAction>) {
    for action in actions {
        match action {
            WatchAction::Schedule { path, delay } => {
                log::debug!("Candidate {} in {:?}", path.display(), delay);
                scheduler.schedule(path, delay);
            }
            WatchAction::Cancel(path) => {
                if scheduler.cancel(&path) {
                    log::debug!("Dropped pending candidate {} (renamed)", path.display());
                }
            }
        }
    }
}

/// Scheduler whose deadlines re-check that the file still exists before
/// calling `on_candidate`.
fn candidate_scheduler(on_candidate: Arc<dyn Fn(PathBuf) + Send + Sync>) -> DelayScheduler {
    DelayScheduler::new(move |path: PathBuf| {
        if path.is_file() {
            on_candidate(path);
        } else {
            log::debug!("File no longer exists: {}", path.display());
        }
    })
}

struct ActiveWatch {
    targets: Vec<WatchTarget>,
    _watcher: RecommendedWatcher,
    scheduler: Arc<DelayScheduler>,
}

/// Watches a set of directories and reports upload candidates.
pub struct FileWatcher {
    config: Arc<UploadConfig>,
    active: Option<ActiveWatch>,
}

impl FileWatcher {
    pub fn new(config: Arc<UploadConfig>) -> Self {
        Self {
            config,
            active: None,
        }
    }

    /// 감시를 시작합니다. 이미 감시 중이면 중지 후 재시작합니다.
    ///
    /// `on_candidate` runs on the scheduler thread.
    pub fn start<F>(&mut self, targets: &[WatchTarget], on_candidate: F) -> Result<(), WatchError>
    where
        F: Fn(PathBuf) + Send + Sync + 'static,
    {
        self.stop();

        if targets.is_empty() {
            return Err(WatchError::NoTargets);
        }

        let mut resolved = Vec::with_capacity(targets.len());
        for target in targets {
            let directory =
                validate_watch_directory(&target.directory).map_err(WatchError::InvalidDirectory)?;
            resolved.push((target.clone(), directory));
        }

        let scheduler = Arc::new(candidate_scheduler(Arc::new(on_candidate)));
        let event_scheduler = Arc::clone(&scheduler);
        let config = Arc::clone(&self.config);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => apply_actions(&event_scheduler, plan_actions(&event, &config)),
            Err(e) => log::warn!("Watch error: {}", e),
        })?;

        for (target, directory) in &resolved {
            let mode = if target.recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            if let Err(e) = watcher.watch(directory, mode) {
                scheduler.shutdown();
                return Err(e.into());
            }
            log::info!("Watching {} ({:?})", directory.display(), mode);
        }

        self.active = Some(ActiveWatch {
            targets: resolved.into_iter().map(|(target, _)| target).collect(),
            _watcher: watcher,
            scheduler,
        });

        Ok(())
    }

    /// 모든 감시를 중지합니다. 시작하지 않았어도 안전합니다.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            let ActiveWatch {
                targets,
                _watcher: watcher,
                scheduler,
            } = active;
            // OS watch handle 해제 후 대기 중인 후보 폐기
            drop(watcher);
            scheduler.shutdown();
            log::info!("Stopped watching {} directories", targets.len());
        }
    }

    pub fn is_watching(&self) -> bool {
        self.active.is_some()
    }

    pub fn targets(&self) -> Vec<WatchTarget> {
        self.active
            .as_ref()
            .map(|active| active.targets.clone())
            .unwrap_or_default()
    }

    /// Candidates still inside their grace delay.
    pub fn pending_candidates(&self) -> usize {
        self.active
            .as_ref()
            .map(|active| active.scheduler.pending_count())
            .unwrap_or(0)
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
