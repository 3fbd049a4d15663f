//! Background task orchestration with cooperative shutdown.
//!
//! Coordination loops (leader scheduler, partition workers) must not be
//! cancelled in the middle of a store call: a leader that is torn down
//! mid-iteration never gets to give up its partition. So tasks are handed a
//! [`ShutdownSignal`] and exit on their own; the registry only aborts tasks
//! that outlive the shutdown timeout.
//!
//! # Example
//!
//! ```rust,no_run
//! use leasekeeper::coordination::background_tasks::BackgroundTaskRegistry;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = BackgroundTaskRegistry::new();
//!
//!     registry.spawn("poller", |shutdown| async move {
//!         // `sleep` returns false once shutdown is requested.
//!         while shutdown.sleep(Duration::from_secs(5)).await {
//!             // poll
//!         }
//!     });
//!
//!     registry.shutdown_all().await;
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::constants::DEFAULT_SHUTDOWN_TIMEOUT_SECS;

/// Cooperative shutdown notification handed to background tasks.
///
/// Cheap to clone. Dropping the sending side counts as shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
    /// Set only by [`ShutdownSignal::never`], which owns its own sender.
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownSignal {
    /// A signal and the sender that triggers it.
    pub fn channel() -> (watch::Sender<bool>, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (
            tx,
            ShutdownSignal {
                rx,
                _keepalive: None,
            },
        )
    }

    /// A signal that never fires (for one-off runs and tests).
    pub fn never() -> ShutdownSignal {
        let (tx, rx) = watch::channel(false);
        ShutdownSignal {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the sender is gone, which also counts as shutdown.
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Sleep for `duration` unless shutdown arrives first.
    ///
    /// Returns `true` if the full duration elapsed, `false` on shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

/// Central registry for background task management.
pub struct BackgroundTaskRegistry {
    tasks: HashMap<&'static str, JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    signal: ShutdownSignal,
    shutting_down: bool,
}

impl BackgroundTaskRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, signal) = ShutdownSignal::channel();
        Self {
            tasks: HashMap::new(),
            shutdown_tx,
            signal,
            shutting_down: false,
        }
    }

    /// Signal shared by every task of this registry.
    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Spawn a named task. The task receives the registry's shutdown signal
    /// and is expected to return promptly once it fires.
    ///
    /// A task already registered under `name` is aborted and replaced.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.shutting_down {
            tracing::warn!(task = name, "Ignoring spawn during shutdown");
            return;
        }

        if let Some(old) = self.tasks.remove(name) {
            old.abort();
            tracing::debug!(task = name, "Aborted previous task instance");
        }

        let fut = task(self.signal());
        let handle = tokio::spawn(async move {
            fut.await;
            tracing::debug!(task = name, "Task completed");
        });

        tracing::info!(task = name, "Spawned background task");

        self.tasks.insert(name, handle);
    }

    /// Whether every registered task is still running.
    pub fn all_running(&self) -> bool {
        self.tasks.values().all(|handle| !handle.is_finished())
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal shutdown and wait up to the default timeout for tasks to exit.
    pub async fn shutdown_all(&mut self) {
        self.shutdown_all_with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS))
            .await;
    }

    /// Signal shutdown and wait up to `timeout`; stragglers are aborted.
    pub async fn shutdown_all_with_timeout(&mut self, timeout: Duration) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;

        tracing::info!(
            task_count = self.tasks.len(),
            "Initiating background task shutdown"
        );

        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + timeout;

        for (name, handle) in self.tasks.drain() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let abort = handle.abort_handle();

            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => {
                    tracing::debug!(task = name, "Task shutdown complete");
                }
                Ok(Err(e)) => {
                    tracing::warn!(task = name, error = %e, "Task panicked during shutdown");
                }
                Err(_) => {
                    tracing::warn!(task = name, "Task did not respond to shutdown, aborting");
                    abort.abort();
                }
            }
        }

        tracing::info!("All background tasks shutdown complete");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }
}

impl Default for BackgroundTaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundTaskRegistry {
    fn drop(&mut self) {
        if !self.shutting_down {
            let _ = self.shutdown_tx.send(true);
            for (name, handle) in self.tasks.drain() {
                tracing::debug!(task = name, "Aborting task on registry drop");
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_signal_sleep_completes() {
        let (_tx, signal) = ShutdownSignal::channel();
        assert!(signal.sleep(Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_sleep_interrupted() {
        let (tx, signal) = ShutdownSignal::channel();
        let sleeper = tokio::spawn({
            let signal = signal.clone();
            async move { signal.sleep(Duration::from_secs(3600)).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        assert!(!sleeper.await.unwrap());
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, signal) = ShutdownSignal::channel();
        drop(tx);
        assert!(signal.is_shutdown());
        assert!(!signal.sleep(Duration::from_secs(3600)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_signal() {
        let signal = ShutdownSignal::never();
        assert!(!signal.is_shutdown());
        assert!(signal.sleep(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_and_shutdown() {
        let mut registry = BackgroundTaskRegistry::new();

        registry.spawn("test_task", |shutdown| async move {
            shutdown.cancelled().await;
        });

        assert_eq!(registry.task_count(), 1);
        assert!(registry.all_running());

        registry.shutdown_all().await;
        assert_eq!(registry.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_task_finish_cleanup() {
        let mut registry = BackgroundTaskRegistry::new();
        let cleaned_up = Arc::new(AtomicBool::new(false));
        let flag = cleaned_up.clone();

        registry.spawn("cleanup", move |shutdown| async move {
            while shutdown.sleep(Duration::from_secs(1)).await {}
            // Simulated release call after the loop exits.
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        registry.shutdown_all().await;

        assert!(cleaned_up.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_replaces_existing_task() {
        let mut registry = BackgroundTaskRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter1 = counter.clone();
        let counter2 = counter.clone();

        registry.spawn("counter", move |shutdown| async move {
            counter1.store(1, Ordering::SeqCst);
            shutdown.cancelled().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        registry.spawn("counter", move |shutdown| async move {
            counter2.store(2, Ordering::SeqCst);
            shutdown.cancelled().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(registry.task_count(), 1);

        registry.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_task_is_not_running() {
        let mut registry = BackgroundTaskRegistry::new();
        registry.spawn("quick_task", |_| async {});

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!registry.all_running());
        registry.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_task_aborted_after_timeout() {
        let mut registry = BackgroundTaskRegistry::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        registry.spawn("stubborn_task", move |_| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let start = tokio::time::Instant::now();
        registry
            .shutdown_all_with_timeout(Duration::from_millis(100))
            .await;

        assert!(start.elapsed() < Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_during_shutdown_ignored() {
        let mut registry = BackgroundTaskRegistry::new();
        registry.shutdown_all().await;
        assert!(registry.is_shutting_down());

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        registry.spawn("late", move |_| async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(registry.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_tasks() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        {
            let mut registry = BackgroundTaskRegistry::new();
            registry.spawn("drop_test", move |_| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                flag.store(true, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
