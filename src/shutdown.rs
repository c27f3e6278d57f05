use std::future::Future;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::warn;

/// Root cancellation signal shared by every background task.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
    _keepalive: Option<std::sync::Arc<watch::Sender<bool>>>,
}

/// Owning side; dropping it also cancels.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    pub fn new() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (
            ShutdownTrigger { tx },
            Shutdown {
                rx,
                _keepalive: None,
            },
        )
    }

    /// A signal that never fires, for one-off invocations.
    pub fn never() -> Shutdown {
        let (tx, rx) = watch::channel(false);
        Shutdown {
            rx,
            _keepalive: Some(std::sync::Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the trigger fires or is dropped.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Detached work started by handlers that shutdown still waits for.
#[derive(Default)]
pub struct TaskTracker {
    set: Mutex<JoinSet<()>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(done) = set.try_join_next() {
            if let Err(e) = done {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        set.spawn(task);
    }

    /// Waits for every tracked task, including ones spawned while waiting.
    pub async fn join_all(&self) {
        loop {
            let mut set = std::mem::take(&mut *self.set.lock().unwrap_or_else(|e| e.into_inner()));
            if set.is_empty() {
                return;
            }
            while let Some(done) = set.join_next().await {
                if let Err(e) = done {
                    warn!("Background task ended abnormally: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let (trigger, shutdown) = Shutdown::new();
        let mut waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        assert!(!shutdown.is_cancelled());
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_trigger_cancels() {
        let (trigger, mut shutdown) = Shutdown::new();
        drop(trigger);
        tokio::time::timeout(Duration::from_secs(1), shutdown.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tracker_waits_for_nested_tasks() {
        let tracker = std::sync::Arc::new(TaskTracker::new());
        let done = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (t, d) = (tracker.clone(), done.clone());
        tracker.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let d2 = d.clone();
            t.spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                d2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });
            d.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        tokio::time::timeout(Duration::from_secs(2), tracker.join_all())
            .await
            .unwrap();
        assert_eq!(done.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
