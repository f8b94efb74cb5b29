use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use video_session_types::{PresentationState, VideoRef};

use super::PresentationSlot;
use crate::engine::SurfaceId;
use crate::navigation::{Navigator, PresentationKind, PresentationRequest};
use crate::observable::Observable;
use crate::session_registry::SessionRegistry;

pub trait PictureInPictureListener: Send + Sync {
    fn on_activated(&self) {}
    /// The entry for `exited` left picture-in-picture, possibly displaced
    /// by a newer entry.
    fn on_exited(&self, _exited: VideoRef) {}
}

/// Arbiter for the single picture-in-picture window.
///
/// A newer entry steals the window: the previous one is exited first and
/// its pending navigation cancelled.
pub struct PictureInPictureCoordinator {
    registry: Arc<SessionRegistry>,
    navigator: Arc<dyn Navigator>,
    slot: PresentationSlot<dyn PictureInPictureListener>,
}

impl PictureInPictureCoordinator {
    pub fn new(registry: Arc<SessionRegistry>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            registry,
            navigator,
            slot: PresentationSlot::new("picture-in-picture"),
        }
    }

    pub fn register(&self, listener: Arc<dyn PictureInPictureListener>) {
        self.slot.register(listener);
    }

    pub fn enter(
        &self,
        video_ref: VideoRef,
        surface: Option<SurfaceId>,
        listener: Arc<dyn PictureInPictureListener>,
    ) {
        let session = self.registry.require(video_ref);
        let (token, displaced) = self.slot.replace(video_ref, listener);
        if let Some(displaced) = displaced {
            info!(displaced = %displaced.video_ref, %video_ref, "picture-in-picture taken over");
            for listener in displaced.listeners {
                listener.on_exited(displaced.video_ref);
            }
        }
        if let Some(surface) = surface {
            session.disconnect_surface(surface);
        }
        info!(%video_ref, "entering picture-in-picture");
        self.navigator.open_presentation(PresentationRequest::new(
            PresentationKind::PictureInPicture,
            video_ref,
            token,
        ));
    }

    pub fn active(&self, video_ref: VideoRef) {
        let Some(listeners) = self.slot.activate(video_ref) else {
            return;
        };
        for listener in listeners {
            listener.on_activated();
        }
    }

    pub fn exit(&self) {
        let Some(finished) = self.slot.finish() else {
            debug!("picture-in-picture exit without entry");
            return;
        };
        info!(video_ref = %finished.video_ref, "picture-in-picture exited");
        for listener in finished.listeners {
            listener.on_exited(finished.video_ref);
        }
    }

    pub fn current(&self) -> Option<VideoRef> {
        self.slot.current()
    }

    pub fn state(&self) -> Observable<PresentationState, PresentationState> {
        self.slot.observe()
    }
}

/// Outcome of one mirror check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorStatus {
    /// The session plays on its own.
    Independent,
    /// The session follows the picture-in-picture session with this ref.
    Mirroring(VideoRef),
}

/// Keeps a session in step with a picture-in-picture session showing the
/// same video.
///
/// While the window shows the same video the observed session follows it
/// instead of running its own stream. Once the window closes, any
/// divergence is settled by syncing from the former window session.
#[derive(Debug)]
pub struct PictureInPictureMirror {
    own: VideoRef,
    mirrored_from: Option<VideoRef>,
}

impl PictureInPictureMirror {
    pub fn new(own: VideoRef) -> Self {
        Self {
            own,
            mirrored_from: None,
        }
    }

    pub fn status(&self) -> MirrorStatus {
        match self.mirrored_from {
            Some(video_ref) => MirrorStatus::Mirroring(video_ref),
            None => MirrorStatus::Independent,
        }
    }

    /// Reconcile against the current picture-in-picture state.
    pub fn check(&mut self, registry: &SessionRegistry, state: &PresentationState) -> MirrorStatus {
        let window = state.video_ref().filter(|video_ref| *video_ref != self.own);
        let Some(window) = window else {
            self.settle(registry);
            return MirrorStatus::Independent;
        };
        let (Some(own), Some(pip)) = (registry.get(self.own), registry.get(window)) else {
            self.mirrored_from = None;
            return MirrorStatus::Independent;
        };
        let own_snapshot = own.snapshot();
        let pip_snapshot = pip.snapshot();
        if own_snapshot.video.is_none() || own_snapshot.video != pip_snapshot.video {
            self.settle(registry);
            return MirrorStatus::Independent;
        }
        let newly = self.mirrored_from != Some(window);
        if newly || (pip_snapshot.playing && !own_snapshot.playing) {
            debug!(own = %self.own, %window, newly, "mirroring picture-in-picture");
            pip.sync_to(&own);
        }
        self.mirrored_from = Some(window);
        MirrorStatus::Mirroring(window)
    }

    /// Settle divergence after the mirrored window went away.
    fn settle(&mut self, registry: &SessionRegistry) {
        let Some(from) = self.mirrored_from.take() else {
            return;
        };
        let (Some(own), Some(pip)) = (registry.get(self.own), registry.get(from)) else {
            return;
        };
        let own_snapshot = own.snapshot();
        let pip_snapshot = pip.snapshot();
        if own_snapshot.video != pip_snapshot.video {
            return;
        }
        let diverged = own_snapshot.progress_ms != pip_snapshot.progress_ms
            || (pip_snapshot.playing && !own_snapshot.playing);
        if diverged {
            info!(own = %self.own, %from, "settling after picture-in-picture");
            pip.sync_to(&own);
        }
    }

    /// Run checks on every window change and every `cadence` until cancelled.
    pub async fn run(
        mut self,
        registry: Arc<SessionRegistry>,
        mut state: Observable<PresentationState, PresentationState>,
        cadence: Duration,
        cancel: CancellationToken,
    ) {
        let mut current = state.get();
        loop {
            self.check(&registry, &current);
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = state.changed() => match next {
                    Some(next) => current = next,
                    None => break,
                },
                _ = tokio::time::sleep(cadence) => {}
            }
        }
        debug!(own = %self.own, "mirror stopped");
    }
}
