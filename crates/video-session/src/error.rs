//! Error taxonomy for the session core.
//!
//! Engine failures are data (they end up in `PlaybackState::Error`), lifecycle
//! misuse is fatal.

use thiserror::Error;
use video_session_types::VideoRef;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The local decoder failed.
    #[error("playback failed (error {code})")]
    Engine { code: i32 },
    /// A cast command was issued without an active remote connection.
    #[error("cast is unavailable: no active connection")]
    CastUnavailable,
    /// Reference counting or lifecycle misuse by the caller.
    #[error("invalid reference state: {0}")]
    InvalidReferenceState(String),
    /// Lookup of a session that was never attached or is already released.
    #[error("unknown session {0}")]
    UnknownSession(VideoRef),
    /// Sync requested between sessions holding different videos.
    #[error("sessions {from} and {to} hold different videos")]
    VideoMismatch { from: VideoRef, to: VideoRef },
    /// A presentation mode is already held by another session.
    #[error("presentation already active for {0}")]
    PresentationBusy(VideoRef),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Log and abort on a caller contract violation.
#[track_caller]
pub(crate) fn contract_violation(err: SessionError) -> ! {
    tracing::error!(error = %err, "contract violation");
    panic!("{err}");
}
