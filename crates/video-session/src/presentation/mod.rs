//! Single-instance presentation modes (fullscreen, picture-in-picture).

mod fullscreen;
mod picture_in_picture;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use video_session_types::{PresentationState, VideoRef};

use crate::error::{Result, SessionError};
use crate::observable::Observable;

pub use fullscreen::{FullscreenCoordinator, FullscreenListener};
pub use picture_in_picture::{
    MirrorStatus, PictureInPictureCoordinator, PictureInPictureListener, PictureInPictureMirror,
};

/// Entry displaced or finished by a state change, handed back so the
/// caller can notify its listeners without holding the slot lock.
pub(crate) struct Finished<L: ?Sized> {
    pub(crate) video_ref: VideoRef,
    pub(crate) listeners: Vec<Arc<L>>,
}

struct SlotInner<L: ?Sized> {
    current: Option<VideoRef>,
    listeners: Vec<Arc<L>>,
    /// Cancelled when the pending navigation must not complete.
    pending: Option<CancellationToken>,
}

/// `Inactive -> Loading(ref) -> Active(ref) -> Inactive` with at most one entry.
pub(crate) struct PresentationSlot<L: ?Sized> {
    name: &'static str,
    state: watch::Sender<PresentationState>,
    inner: Mutex<SlotInner<L>>,
}

impl<L: ?Sized> PresentationSlot<L> {
    pub(crate) fn new(name: &'static str) -> Self {
        let (state, _) = watch::channel(PresentationState::Inactive);
        Self {
            name,
            state,
            inner: Mutex::new(SlotInner {
                current: None,
                listeners: Vec::new(),
                pending: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner<L>> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub(crate) fn register(&self, listener: Arc<L>) {
        self.lock().listeners.push(listener);
    }

    /// Enter when the slot is free.
    pub(crate) fn try_begin(&self, video_ref: VideoRef, listener: Arc<L>) -> Result<CancellationToken> {
        let mut inner = self.lock();
        if let Some(current) = inner.current {
            return Err(SessionError::PresentationBusy(current));
        }
        Ok(self.begin_locked(&mut inner, video_ref, listener))
    }

    /// Enter, displacing whatever entry holds the slot.
    pub(crate) fn replace(
        &self,
        video_ref: VideoRef,
        listener: Arc<L>,
    ) -> (CancellationToken, Option<Finished<L>>) {
        let mut inner = self.lock();
        let displaced = self.finish_locked(&mut inner);
        let token = self.begin_locked(&mut inner, video_ref, listener);
        (token, displaced)
    }

    /// Mark the entry for `video_ref` active. Returns the listeners to notify.
    pub(crate) fn activate(&self, video_ref: VideoRef) -> Option<Vec<Arc<L>>> {
        let mut inner = self.lock();
        if inner.current != Some(video_ref) {
            debug!(slot = self.name, %video_ref, "activation for stale entry ignored");
            return None;
        }
        inner.pending = None;
        self.state.send_replace(PresentationState::Active(video_ref));
        debug!(slot = self.name, %video_ref, "active");
        Some(inner.listeners.clone())
    }

    pub(crate) fn finish(&self) -> Option<Finished<L>> {
        let mut inner = self.lock();
        self.finish_locked(&mut inner)
    }

    fn begin_locked(
        &self,
        inner: &mut SlotInner<L>,
        video_ref: VideoRef,
        listener: Arc<L>,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        inner.current = Some(video_ref);
        inner.listeners.push(listener);
        inner.pending = Some(token.clone());
        self.state.send_replace(PresentationState::Loading(video_ref));
        debug!(slot = self.name, %video_ref, "loading");
        token
    }

    fn finish_locked(&self, inner: &mut SlotInner<L>) -> Option<Finished<L>> {
        let video_ref = inner.current.take()?;
        if let Some(pending) = inner.pending.take() {
            pending.cancel();
        }
        let listeners = std::mem::take(&mut inner.listeners);
        self.state.send_replace(PresentationState::Inactive);
        debug!(slot = self.name, %video_ref, "inactive");
        Some(Finished {
            video_ref,
            listeners,
        })
    }

    pub(crate) fn current(&self) -> Option<VideoRef> {
        self.lock().current
    }

    pub(crate) fn observe(&self) -> Observable<PresentationState, PresentationState> {
        Observable::new(self.state.subscribe(), PresentationState::clone)
    }
}
