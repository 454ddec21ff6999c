use std::future::Future;
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Background work of one transport. Every task spawned through here is joined by
/// [`TransportTasks::closed`], so a disconnect started during teardown is not lost when the
/// runtime shuts down.
#[derive(Clone, Debug, Default)]
pub struct TransportTasks {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl TransportTasks {
    pub fn new() -> Self {
        TransportTasks::default()
    }

    /// Cancelled once the transport is released. Request tasks stop at this point, cleanup
    /// tasks keep running.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Cancel the request tasks. Tasks spawned afterwards are still tracked.
    pub fn close(&self) {
        self.cancel.cancel();
        self.tracker.close();
    }

    /// Wait until the transport has been released and every task has finished.
    pub async fn closed(&self) {
        if !self.tracker.is_empty() {
            info!("Waiting for {} bluetooth tasks to stop", self.tracker.len());
        }
        self.tracker.wait().await;
    }
}
