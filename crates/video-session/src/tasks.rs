//! Owned groups of background tasks with bulk cancellation.

use std::future::Future;
use std::sync::Mutex;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Background tasks owned by one component.
///
/// Cancelling the group (or dropping it) stops every task it spawned, so no
/// task outlives its owner.
pub(crate) struct TaskGroup {
    name: &'static str,
    runtime: Handle,
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGroup {
    pub(crate) fn new(name: &'static str, runtime: Handle) -> Self {
        Self {
            name,
            runtime,
            token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a task that runs until it completes or the group is cancelled.
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_with_token(self.token.clone(), future);
    }

    /// Spawn a task that can also be stopped on its own through the returned token.
    pub(crate) fn spawn_cancellable<F>(&self, future: F) -> CancellationToken
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.child_token();
        self.spawn_with_token(token.clone(), future);
        token
    }

    fn spawn_with_token<F>(&self, token: CancellationToken, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            tracing::debug!(group = self.name, "task group cancelled; not spawning");
            return;
        }
        let handle = self.runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = future => {}
            }
        });
        let mut handles = self.handles.lock().unwrap_or_else(|err| err.into_inner());
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel every task in the group.
    pub(crate) fn cancel_all(&self) {
        self.token.cancel();
        let mut handles = self.handles.lock().unwrap_or_else(|err| err.into_inner());
        for handle in handles.drain(..) {
            handle.abort();
        }
        tracing::debug!(group = self.name, "task group cancelled");
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        if !self.token.is_cancelled() {
            self.cancel_all();
        }
    }
}
