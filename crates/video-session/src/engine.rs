//! Local playback engine boundary.
//!
//! The decoder/renderer is a black box. A session drives it through
//! [`PlaybackEngine`] and learns about it through [`EngineStatus`] events pushed
//! into an [`EngineEventSink`], possibly from engine-owned threads.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use video_session_types::Quality;

/// Lifecycle state reported by the local engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Nothing prepared, or preparation failed (see `error_code`).
    #[default]
    Idle,
    Buffering,
    Ready,
    /// Reached the end of the source.
    Ended,
}

/// One status event from the local engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineStatus {
    pub state: EngineState,
    pub is_playing: bool,
    pub position_ms: u64,
    pub buffered_ms: u64,
    /// Source duration when known.
    pub duration_ms: Option<u64>,
    /// Engine error code when `state` is `Idle` because of a failure.
    pub error_code: Option<i32>,
}

/// Cheap position probe used by the progress poller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnginePosition {
    pub position_ms: u64,
    pub buffered_ms: u64,
}

/// Identifier of a physical rendering surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    /// Allocate a process-unique surface id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Sender half handed to an engine for reporting status.
#[derive(Clone, Debug)]
pub struct EngineEventSink {
    tx: mpsc::UnboundedSender<EngineStatus>,
}

impl EngineEventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<EngineStatus>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report a status change. Returns `false` once the owning session is gone.
    pub fn emit(&self, status: EngineStatus) -> bool {
        self.tx.send(status).is_ok()
    }
}

/// Commands a session issues to its local engine.
///
/// Implementations must not block on the session: status is reported
/// asynchronously through the sink.
pub trait PlaybackEngine: Send {
    fn prepare(&mut self, url: &str, headers: &BTreeMap<String, String>);
    /// Drop the current source; the engine reports Idle afterwards.
    fn clear(&mut self);
    fn play(&mut self);
    fn pause(&mut self);
    fn seek_to(&mut self, position_ms: u64);
    fn set_speed(&mut self, speed: f32);
    /// Current playback rate.
    fn speed(&self) -> f32;
    /// Video tracks the current source offers, as `Quality::Detected` handles.
    fn enumerate_qualities(&self) -> Vec<Quality>;
    fn apply_quality(&mut self, quality: &Quality);
    /// Bind the single output surface, or unbind with `None`.
    fn set_surface(&mut self, surface: Option<SurfaceId>);
    fn position(&self) -> EnginePosition;
    fn state(&self) -> EngineState;
    /// Free decoder resources. The engine is not used afterwards.
    fn release(&mut self);
}

/// Creates local engines on first need.
pub trait PlaybackEngineFactory: Send + Sync {
    fn create(&self, events: EngineEventSink) -> Box<dyn PlaybackEngine>;
}
