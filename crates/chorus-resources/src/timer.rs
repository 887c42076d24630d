//! Shared timer for delayed and periodic background work.
//!
//! Every task scheduled here runs on the tokio runtime, is tracked by a
//! [`TaskTracker`] and observes the timer's [`CancellationToken`]. Stopping
//! the timer cancels all of them and waits until they have returned. A
//! periodic task that panics is logged and scheduled again.
//!
//! ```rust,ignore
//! let handle = resources.timer().schedule_with_fixed_delay(
//!     Duration::ZERO,
//!     Duration::from_secs(60),
//!     move || { let job = job.clone(); async move { job.run_once().await } },
//! );
//! // later
//! handle.cancel();
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Handle to one scheduled task.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    /// Stops the task. A run in progress is interrupted at its next await point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the task was cancelled (directly or by stopping the timer).
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A cloneable scheduler backed by the tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct SharedTimer {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl SharedTimer {
    /// Creates a running timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` once after `delay`.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.child_token();
        if self.token.is_cancelled() {
            warn!("Timer already stopped, task not scheduled");
            return TimerHandle { token };
        }

        let cancel = token.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = async { tokio::time::sleep(delay).await; task.await } => {}
            }
        });
        TimerHandle { token }
    }

    /// Runs `task` after `initial`, then again `delay` after each run finished.
    pub fn schedule_with_fixed_delay<F, Fut>(
        &self,
        initial: Duration,
        delay: Duration,
        mut task: F,
    ) -> TimerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.child_token();
        if self.token.is_cancelled() {
            warn!("Timer already stopped, periodic task not scheduled");
            return TimerHandle { token };
        }

        let cancel = token.clone();
        self.tracker.spawn(async move {
            let mut wait = initial;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = AssertUnwindSafe(async { task().await }).catch_unwind() => {
                        if result.is_err() {
                            error!("Periodic task panicked, next run stays scheduled");
                        }
                    }
                }
                wait = delay;
            }
            debug!("Periodic task stopped");
        });
        TimerHandle { token }
    }

    /// Number of tasks still scheduled or running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels every task and waits for all of them to return.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
