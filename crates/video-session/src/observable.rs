//! Live values projected out of a shared snapshot channel.
//!
//! Every getter on a session or coordinator hands out an [`Observable`]: the
//! current value plus a way to await changes. All observables of one owner
//! read the same `watch` snapshot, so two values derived in one
//! reconciliation step are always seen together.

use tokio::sync::watch;

pub struct Observable<S, T> {
    rx: watch::Receiver<S>,
    project: fn(&S) -> T,
    last: T,
}

impl<S, T> Observable<S, T>
where
    T: Clone + PartialEq,
{
    pub(crate) fn new(rx: watch::Receiver<S>, project: fn(&S) -> T) -> Self {
        let last = project(&rx.borrow());
        Self { rx, project, last }
    }

    /// Current value.
    pub fn get(&self) -> T {
        (self.project)(&self.rx.borrow())
    }

    /// Wait for the next distinct value.
    ///
    /// Snapshot updates that leave this projection unchanged are skipped.
    /// Returns `None` once the owner is gone.
    pub async fn changed(&mut self) -> Option<T> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            let value = (self.project)(&self.rx.borrow_and_update());
            if value != self.last {
                self.last = value.clone();
                return Some(value);
            }
        }
    }

    /// Wait until the value satisfies `predicate`, checking the current value first.
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<T> {
        let current = (self.project)(&self.rx.borrow_and_update());
        self.last = current.clone();
        if predicate(&current) {
            return Some(current);
        }
        while let Some(value) = self.changed().await {
            if predicate(&value) {
                return Some(value);
            }
        }
        None
    }
}

impl<S, T: Clone> Clone for Observable<S, T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            project: self.project,
            last: self.last.clone(),
        }
    }
}

impl<S, T: std::fmt::Debug> std::fmt::Debug for Observable<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable").field("last", &self.last).finish()
    }
}
