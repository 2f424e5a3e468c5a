//! 경로별 지연 실행 스케줄러
//!
//! 파일마다 타이머 스레드를 띄우는 대신, 하나의 스레드가 경로별 마감 시각을
//! 관리합니다. 같은 경로를 다시 예약하면 마감 시각이 교체되고, 취소된 경로는
//! 절대 실행되지 않습니다 (rename 병합에 필요).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

struct Shared {
    pending: Mutex<HashMap<PathBuf, Instant>>,
    wakeup: Condvar,
    cancellation_token: CancellationToken,
}

/// One-shot, cancellable, per-path delays handled by a single thread.
pub struct DelayScheduler {
    shared: Arc<Shared>,
    thread_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DelayScheduler {
    /// Spawns the scheduler thread. `on_fire` runs on that thread, once per
    /// deadline that was neither cancelled nor replaced.
    pub fn new<F>(on_fire: F) -> Self
    where
        F: Fn(PathBuf) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            wakeup: Condvar::new(),
            cancellation_token: CancellationToken::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let thread_handle = thread::Builder::new()
            .name("photo2url-scheduler".to_string())
            .spawn(move || run_loop(&thread_shared, on_fire))
            .ok();

        if thread_handle.is_none() {
            log::error!("Failed to spawn scheduler thread; delayed candidates will be dropped");
        }

        Self {
            shared,
            thread_handle: Mutex::new(thread_handle),
        }
    }

    /// (Re)schedules `path` to fire after `delay`.
    pub fn schedule(&self, path: PathBuf, delay: Duration) {
        if self.shared.cancellation_token.is_cancelled() {
            return;
        }
        let deadline = Instant::now() + delay;
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.insert(path, deadline);
        }
        self.shared.wakeup.notify_all();
    }

    /// Returns true if `path` was pending.
    pub fn cancel(&self, path: &Path) -> bool {
        let removed = self
            .shared
            .pending
            .lock()
            .map(|mut pending| pending.remove(path).is_some())
            .unwrap_or(false);
        if removed {
            self.shared.wakeup.notify_all();
        }
        removed
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.shared
            .pending
            .lock()
            .map(|pending| pending.contains_key(path))
            .unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.shared
            .pending
            .lock()
            .map(|pending| pending.len())
            .unwrap_or(0)
    }

    /// Drops every pending deadline and joins the scheduler thread.
    pub fn shutdown(&self) {
        self.shared.cancellation_token.cancel();
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.clear();
        }
        self.shared.wakeup.notify_all();

        let handle = self
            .thread_handle
            .lock()
            .ok()
            .and_then(|mut handle| handle.take());
        if let Some(handle) = handle {
            // on_fire 콜백 내부에서 shutdown이 호출되면 join하면 안 됨
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for DelayScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop<F>(shared: &Shared, on_fire: F)
where
    F: Fn(PathBuf),
{
    let Ok(mut pending) = shared.pending.lock() else {
        return;
    };

    loop {
        if shared.cancellation_token.is_cancelled() {
            return;
        }

        let now = Instant::now();
        let next = pending
            .iter()
            .min_by_key(|(_, deadline)| **deadline)
            .map(|(path, deadline)| (path.clone(), *deadline));

        match next {
            None => {
                pending = match shared.wakeup.wait(pending) {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
            Some((path, deadline)) if deadline <= now => {
                pending.remove(&path);
                drop(pending);

                on_fire(path);

                pending = match shared.pending.lock() {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
            }
            Some((_, deadline)) => {
                pending = match shared.wakeup.wait_timeout(pending, deadline - now) {
                    Ok((guard, _)) => guard,
                    Err(_) => return,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn scheduler() -> (DelayScheduler, mpsc::Receiver<PathBuf>) {
        let (tx, rx) = mpsc::channel();
        let scheduler = DelayScheduler::new(move |path| {
            let _ = tx.send(path);
        });
        (scheduler, rx)
    }

    #[test]
    fn test_fires_once_after_delay() {
        let (scheduler, rx) = scheduler();
        let started = Instant::now();

        scheduler.schedule(PathBuf::from("/a.png"), Duration::from_millis(100));

        let fired = rx.recv_timeout(Duration::from_secs(2)).expect("should fire");
        assert_eq!(fired, PathBuf::from("/a.png"));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_cancel_prevents_fire() {
        let (scheduler, rx) = scheduler();

        scheduler.schedule(PathBuf::from("/a.png"), Duration::from_millis(150));
        assert!(scheduler.is_pending(Path::new("/a.png")));
        assert!(scheduler.cancel(Path::new("/a.png")));
        assert!(!scheduler.cancel(Path::new("/a.png")));

        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    }

    #[test]
    fn test_reschedule_replaces_deadline() {
        let (scheduler, rx) = scheduler();

        scheduler.schedule(PathBuf::from("/a.png"), Duration::from_millis(50));
        scheduler.schedule(PathBuf::from("/a.png"), Duration::from_millis(300));

        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), PathBuf::from("/a.png"));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let (scheduler, rx) = scheduler();

        scheduler.schedule(PathBuf::from("/late.png"), Duration::from_millis(250));
        scheduler.schedule(PathBuf::from("/early.png"), Duration::from_millis(50));

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), PathBuf::from("/early.png"));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), PathBuf::from("/late.png"));
    }

    #[test]
    fn test_shutdown_discards_pending() {
        let (scheduler, rx) = scheduler();

        scheduler.schedule(PathBuf::from("/a.png"), Duration::from_millis(100));
        scheduler.shutdown();
        scheduler.schedule(PathBuf::from("/b.png"), Duration::from_millis(10));

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        // 두 번째 호출도 안전해야 함
        scheduler.shutdown();
    }
}
