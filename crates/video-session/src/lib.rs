//! Per-video playback session management.
//!
//! A [`Session`] is the single source of truth for one video. It merges a
//! local [`PlaybackEngine`] and the process-wide [`CastCoordinator`] into one
//! observable [`SessionSnapshot`]. Sessions live in a [`SessionRegistry`];
//! fullscreen and picture-in-picture are arbitrated by the coordinators in
//! [`presentation`].

pub mod cast_coordinator;
pub mod cast_engine;
pub mod config;
pub mod engine;
pub mod error;
pub mod navigation;
pub mod observable;
pub mod presentation;
pub mod session;
pub mod session_registry;
mod tasks;

#[cfg(test)]
mod testing;

pub use cast_coordinator::{CastCoordinator, CastSnapshot};
pub use cast_engine::{
    CastConnection, CastEngine, CastEngineFactory, CastEvent, CastEventSink, DEFAULT_ROUTE_ID,
    RemotePlayerState, RouteConnection, RouteInfo,
};
pub use config::{CastConfig, SessionConfig};
pub use engine::{
    EngineEventSink, EnginePosition, EngineState, EngineStatus, PlaybackEngine,
    PlaybackEngineFactory, SurfaceId,
};
pub use error::{Result, SessionError};
pub use navigation::{Navigator, PresentationKind, PresentationRequest};
pub use observable::Observable;
pub use presentation::{
    FullscreenCoordinator, FullscreenListener, MirrorStatus, PictureInPictureCoordinator,
    PictureInPictureListener, PictureInPictureMirror,
};
pub use session::{PlaybackDelegate, PlayerButton, Session, SessionSnapshot};
pub use session_registry::SessionRegistry;
