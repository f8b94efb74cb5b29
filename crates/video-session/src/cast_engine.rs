//! Remote cast engine boundary.
//!
//! Discovery, route selection and the remote media channel live behind
//! [`CastEngine`]; only the [`CastCoordinator`](crate::cast_coordinator::CastCoordinator)
//! talks to it.

use tokio::sync::mpsc;
use video_session_types::Video;

use crate::config::CastConfig;

/// Route id of the device's own (non-remote) output.
pub const DEFAULT_ROUTE_ID: &str = "DEFAULT_ROUTE";

/// Connection state of the cast subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CastConnection {
    NoDevicesAvailable,
    NotConnected,
    Connecting,
    Connected,
}

/// Connection state of one route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RouteConnection {
    Disconnected,
    Connecting,
    Connected,
}

/// Route as discovered by the engine, before shaping for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteInfo {
    pub id: String,
    pub name: String,
    pub connection: RouteConnection,
    pub selected: bool,
}

/// Remote media player state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemotePlayerState {
    Unknown,
    /// Nothing playing; reached after end of media or a failed load.
    Idle,
    Playing,
    Paused,
    Buffering,
    Loading,
}

/// Events reported by the cast engine.
#[derive(Clone, Debug, PartialEq)]
pub enum CastEvent {
    Connection(CastConnection),
    RoutesChanged(Vec<RouteInfo>),
    /// A remote session was established.
    SessionStarted,
    /// A previous remote session was picked up again.
    SessionResumed,
    /// The remote session finished, explicitly or after the media ended.
    SessionEnded,
    PlayerState(RemotePlayerState),
    /// Remote media metadata changed; `video` is `None` when nothing is loaded.
    MediaLoaded { video: Option<Video>, playing: bool },
    Progress { progress_ms: u64, duration_ms: u64 },
}

/// Sender half handed to the cast engine.
#[derive(Clone, Debug)]
pub struct CastEventSink {
    tx: mpsc::UnboundedSender<CastEvent>,
}

impl CastEventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<CastEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report an event. Returns `false` once the coordinator released the engine.
    pub fn emit(&self, event: CastEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Commands the cast coordinator issues to the remote engine.
pub trait CastEngine: Send {
    /// Load `video` on the remote receiver, or remember it until a session starts.
    fn start_casting(&mut self, video: &Video);
    /// End the current remote session.
    fn stop_casting(&mut self);
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, position_ms: u64);
    /// Switch output route. Returns `false` when the route is unknown.
    fn select_route(&mut self, route_id: &str) -> bool;
    fn selected_route(&self) -> Option<String>;
    /// Detach listeners and free the engine.
    fn dispose(&mut self);
}

/// Creates the cast engine on first coordinator attach.
pub trait CastEngineFactory: Send + Sync {
    fn create(&self, events: CastEventSink, config: &CastConfig) -> Box<dyn CastEngine>;
}
