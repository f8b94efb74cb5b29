//! Navigation requests handed to the embedding UI.

use tokio_util::sync::CancellationToken;
use video_session_types::VideoRef;

/// Presentation mode a navigation request opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PresentationKind {
    Fullscreen,
    PictureInPicture,
}

/// Request to open a presentation UI for one session.
///
/// The token is cancelled when the request is superseded by a newer entry
/// or the presentation exits before the UI activated; the UI must then not
/// appear.
#[derive(Clone, Debug)]
pub struct PresentationRequest {
    pub kind: PresentationKind,
    pub video_ref: VideoRef,
    cancel: CancellationToken,
}

impl PresentationRequest {
    pub(crate) fn new(kind: PresentationKind, video_ref: VideoRef, cancel: CancellationToken) -> Self {
        Self {
            kind,
            video_ref,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the request was superseded.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Screen transitions the core asks the host UI to perform.
pub trait Navigator: Send + Sync {
    fn open_presentation(&self, request: PresentationRequest);
    /// Show the cast device picker for `video_ref`.
    fn open_cast_picker(&self, video_ref: VideoRef);
}
