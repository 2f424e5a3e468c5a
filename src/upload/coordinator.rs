//! 업로드 큐 관리 모듈
//!
//! FIFO 큐를 하나의 백그라운드 worker 스레드가 순서대로 처리합니다.
//! 동시에 진행되는 업로드는 항상 최대 1개입니다.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::Duration;

use crate::config::UploadConfig;
use crate::upload::client::UploadClient;
use crate::upload::stability::StabilityWaiter;
use crate::upload::types::{PendingUpload, UploadEvent, UploadResult, WorkerState};

/// Subscriber callback. Runs on the worker thread.
pub type EventListener = Arc<dyn Fn(&UploadEvent) + Send + Sync>;

struct Inner {
    queue: VecDeque<PendingUpload>,
    state: WorkerState,
    stop_requested: bool,
    worker: Option<thread::JoinHandle<()>>,
}

struct Shared {
    inner: Mutex<Inner>,
    state_changed: Condvar,
    listeners: RwLock<Vec<EventListener>>,
    client: Arc<dyn UploadClient>,
    waiter: StabilityWaiter,
    post_upload_pause: Duration,
    spawn_worker: SpawnWorker,
}

type SpawnWorker = fn(Arc<Shared>) -> std::io::Result<thread::JoinHandle<()>>;

fn spawn_worker_thread(shared: Arc<Shared>) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("photo2url-upload".to_string())
        .spawn(move || run_worker(shared))
}

/// Serializes uploads through a single lazily started worker thread.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct UploadCoordinator {
    shared: Arc<Shared>,
}

impl UploadCoordinator {
    pub fn new(config: &UploadConfig, client: Arc<dyn UploadClient>) -> Self {
        Self::with_waiter(
            client,
            StabilityWaiter::new(config.stability.clone()),
            config.post_upload_pause(),
        )
    }

    pub fn with_waiter(
        client: Arc<dyn UploadClient>,
        waiter: StabilityWaiter,
        post_upload_pause: Duration,
    ) -> Self {
        Self::with_spawner(client, waiter, post_upload_pause, spawn_worker_thread)
    }

    fn with_spawner(
        client: Arc<dyn UploadClient>,
        waiter: StabilityWaiter,
        post_upload_pause: Duration,
        spawn_worker: SpawnWorker,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    queue: VecDeque::new(),
                    state: WorkerState::Idle,
                    stop_requested: false,
                    worker: None,
                }),
                state_changed: Condvar::new(),
                listeners: RwLock::new(Vec::new()),
                client,
                waiter,
                post_upload_pause,
                spawn_worker,
            }),
        }
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&UploadEvent) + Send + Sync + 'static,
    {
        if let Ok(mut listeners) = self.shared.listeners.write() {
            listeners.push(Arc::new(listener));
        }
    }

    /// Subscribes a channel that receives a copy of every event.
    pub fn subscribe_channel(&self) -> mpsc::Receiver<UploadEvent> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        self.subscribe(move |event| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(event.clone());
            }
        });
        rx
    }

    /// Queues `filepath` unless it is already queued, starting the worker if
    /// it is idle. Returns false for duplicates, after [`stop`](Self::stop),
    /// and when no worker thread could be started.
    pub fn enqueue(&self, filepath: impl Into<PathBuf>) -> bool {
        let filepath = filepath.into();
        let mut inner = self.lock_inner();

        if inner.state == WorkerState::Stopped || inner.stop_requested {
            log::warn!("Upload queue stopped, ignoring {}", filepath.display());
            return false;
        }

        if inner.queue.iter().any(|item| item.filepath == filepath) {
            log::debug!("{} already queued", filepath.display());
            return false;
        }

        log::info!("Queued {}", filepath.display());
        inner.queue.push_back(PendingUpload::new(filepath));

        if inner.state == WorkerState::Idle {
            match (self.shared.spawn_worker)(Arc::clone(&self.shared)) {
                Ok(handle) => {
                    inner.state = WorkerState::Running;
                    inner.worker = Some(handle);
                    self.shared.state_changed.notify_all();
                }
                Err(e) => {
                    // 처리할 worker가 없으므로 방금 넣은 항목은 되돌림
                    log::error!("Failed to spawn upload worker: {}", e);
                    inner.queue.pop_back();
                    return false;
                }
            }
        }

        true
    }

    /// Asks the worker to exit once its current item is done. Queued items
    /// stay where they are and produce no events.
    pub fn stop(&self) {
        let mut inner = self.lock_inner();
        if inner.state == WorkerState::Stopped || inner.stop_requested {
            return;
        }
        inner.stop_requested = true;
        if inner.state == WorkerState::Idle {
            inner.state = WorkerState::Stopped;
        }
        self.shared.state_changed.notify_all();
    }

    /// [`stop`](Self::stop), then wait for the worker thread to exit.
    pub fn shutdown(&self) {
        self.stop();
        let handle = self.lock_inner().worker.take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Blocks until the worker is no longer running. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let inner = self.lock_inner();
        match self
            .shared
            .state_changed
            .wait_timeout_while(inner, timeout, |inner| inner.state == WorkerState::Running)
        {
            Ok((_, result)) => !result.timed_out(),
            Err(_) => false,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.lock_inner().state
    }

    /// Paths still waiting in the queue, oldest first.
    pub fn pending(&self) -> Vec<PathBuf> {
        self.lock_inner()
            .queue
            .iter()
            .map(|item| item.filepath.clone())
            .collect()
    }

    pub fn is_queued(&self, filepath: &Path) -> bool {
        self.lock_inner()
            .queue
            .iter()
            .any(|item| item.filepath == filepath)
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.shared.lock_inner()
    }
}

impl Shared {
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        // 리스너 panic 등으로 poison 되어도 큐 상태는 유효함
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: &UploadEvent) {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for listener in listeners {
            listener(event);
        }
    }

    /// Takes the next item, or records why the worker is leaving.
    fn next_item(&self) -> Option<PendingUpload> {
        let mut inner = self.lock_inner();

        if inner.stop_requested {
            inner.state = WorkerState::Stopped;
            self.state_changed.notify_all();
            return None;
        }

        match inner.queue.pop_front() {
            Some(item) => Some(item),
            None => {
                inner.state = WorkerState::Idle;
                self.state_changed.notify_all();
                None
            }
        }
    }

    fn process(&self, item: &PendingUpload) -> UploadResult {
        let filename = item.filename.clone();
        self.emit(&UploadEvent::progress(format!("Preparing {filename}"), 10));

        let size_bytes = match self
            .waiter
            .check_ready(&item.filepath, &filename, &mut |event| self.emit(&event))
        {
            Ok(size) => size,
            Err(reason) => {
                return UploadResult::Failure {
                    filename,
                    reason: reason.to_string(),
                }
            }
        };

        self.emit(&UploadEvent::progress(format!("Uploading {filename}"), 50));

        match self.client.upload(&item.filepath) {
            Ok(response) => match response.url() {
                Some(url) => {
                    self.emit(&UploadEvent::progress(format!("Completed {filename}"), 100));
                    UploadResult::Success {
                        filename,
                        service_name: self.client.service_name().to_string(),
                        url: url.to_string(),
                        size_bytes,
                    }
                }
                None => UploadResult::Failure {
                    filename,
                    reason: "Upload failed - no URL in response".to_string(),
                },
            },
            Err(e) => UploadResult::Failure {
                filename,
                reason: e.to_string(),
            },
        }
    }
}

fn run_worker(shared: Arc<Shared>) {
    while let Some(item) = shared.next_item() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| shared.process(&item)))
            .unwrap_or_else(|payload| UploadResult::Failure {
                filename: item.filename.clone(),
                reason: format!("Upload error: {}", panic_message(payload.as_ref())),
            });

        match &result {
            UploadResult::Success { filename, url, .. } => {
                log::info!("Uploaded {} -> {}", filename, url)
            }
            UploadResult::Failure { filename, reason } => {
                log::warn!("Failed to upload {}: {}", filename, reason)
            }
        }
        shared.emit(&result.into());

        // rate limit
        thread::sleep(shared.post_upload_pause);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unexpected panic".to_string()
    }
}
