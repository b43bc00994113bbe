//! Owned background tasks
//!
//! Every timer in the crate is a [`TaskHandle`]. Dropping the handle aborts the
//! task, so a component that clears its handles cannot leave a timer firing
//! against torn-down state.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// A spawned task that is aborted when the handle is dropped
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn a one-shot task
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::trace!("Spawning task {}", name);
        Self {
            name,
            handle: Some(tokio::spawn(future)),
        }
    }

    /// Spawn a repeating task.
    ///
    /// The first tick fires one `period` after the call. The task ends when
    /// `tick` resolves to `false`.
    pub fn interval<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self::spawn(name, async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                if !tick().await {
                    tracing::trace!("Task {} finished", name);
                    break;
                }
            }
        })
    }

    /// Task name used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has run to completion (or was aborted)
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Abort the task now
    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                tracing::trace!("Cancelling task {}", self.name);
            }
            handle.abort();
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
