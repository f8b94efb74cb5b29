//! One video's playback state machine.
//!
//! A session merges the local engine and the shared cast coordinator into a
//! single [`SessionSnapshot`]. Engine events and cast snapshots are funneled
//! into one event-loop task, every mutation recomputes the whole snapshot
//! under the core lock, and observers read it through a `watch` channel.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use video_session_types::{
    ButtonPosition, CastAvailability, CastState, PlaybackState, Quality, Speed, Video, VideoRef,
};

use crate::cast_coordinator::{CastCoordinator, CastSnapshot};
use crate::config::SessionConfig;
use crate::engine::{
    EngineEventSink, EngineState, EngineStatus, PlaybackEngine, PlaybackEngineFactory, SurfaceId,
};
use crate::error::{SessionError, contract_violation};
use crate::observable::Observable;
use crate::tasks::TaskGroup;

/// Observer of playback milestones.
///
/// Callbacks run on the session's event task after its lock is released.
pub trait PlaybackDelegate: Send + Sync {
    fn on_ready(&self) {}
    fn on_play(&self) {}
    fn on_pause(&self) {}
    fn on_finish(&self) {}
    fn on_error(&self, _message: &str) {}
}

/// Extra control placed on the player chrome.
#[derive(Clone)]
pub struct PlayerButton {
    pub position: ButtonPosition,
    pub icon: String,
    pub title: String,
    action: Arc<dyn Fn() + Send + Sync>,
}

impl PlayerButton {
    pub fn new(
        position: ButtonPosition,
        icon: impl Into<String>,
        title: impl Into<String>,
        action: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            position,
            icon: icon.into(),
            title: title.into(),
            action: Arc::new(action),
        }
    }

    pub fn invoke(&self) {
        (self.action)()
    }
}

impl PartialEq for PlayerButton {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
            && self.icon == other.icon
            && self.title == other.title
            && std::ptr::addr_eq(Arc::as_ptr(&self.action), Arc::as_ptr(&other.action))
    }
}

impl fmt::Debug for PlayerButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerButton")
            .field("position", &self.position)
            .field("icon", &self.icon)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

/// Externally visible state of one session, recomputed atomically.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub video: Option<Video>,
    pub state: PlaybackState,
    pub playing: bool,
    /// Position of the authoritative engine.
    pub progress_ms: u64,
    /// Duration reported by the authoritative engine; `0` while unknown.
    pub duration_ms: u64,
    /// Local buffered position.
    pub buffered_ms: u64,
    pub quality: Quality,
    pub speed: Speed,
    pub cast_availability: CastAvailability,
    pub picture_in_picture_available: bool,
    pub quality_selection_available: bool,
    pub speed_selection_available: bool,
    pub buttons: BTreeMap<String, PlayerButton>,
}

#[derive(Debug)]
enum Notice {
    Ready,
    Play,
    Pause,
    Finish,
    Error(String),
}

impl Notice {
    fn deliver(&self, delegate: &dyn PlaybackDelegate) {
        match self {
            Notice::Ready => delegate.on_ready(),
            Notice::Play => delegate.on_play(),
            Notice::Pause => delegate.on_pause(),
            Notice::Finish => delegate.on_finish(),
            Notice::Error(message) => delegate.on_error(message),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct LocalPlayback {
    playing: bool,
    progress_ms: u64,
    buffered_ms: u64,
    duration_ms: u64,
}

struct SessionCore {
    attachs: usize,
    shows: usize,
    /// Connected surfaces; the last one is bound to the engine.
    surfaces: Vec<SurfaceId>,
    closed: bool,
    factory: Arc<dyn PlaybackEngineFactory>,
    sink: EngineEventSink,
    engine: Option<Box<dyn PlaybackEngine>>,
    video: Option<Video>,
    state: PlaybackState,
    local: LocalPlayback,
    last_status: EngineStatus,
    quality: Quality,
    speed: Speed,
    cast: CastSnapshot,
    availability: CastAvailability,
    /// Position to restore once a re-prepared engine is ready.
    pending_seek: Option<u64>,
    poller: Option<CancellationToken>,
    buttons: BTreeMap<String, PlayerButton>,
    delegates: Vec<Arc<dyn PlaybackDelegate>>,
}

impl SessionCore {
    fn engine(&mut self) -> &mut dyn PlaybackEngine {
        let surface = self.surfaces.last().copied();
        let factory = &self.factory;
        let sink = &self.sink;
        self.engine
            .get_or_insert_with(|| {
                debug!("creating local engine");
                let mut engine = factory.create(sink.clone());
                if surface.is_some() {
                    engine.set_surface(surface);
                }
                engine
            })
            .as_mut()
    }

    fn derived_availability(&self) -> CastAvailability {
        let same_video = self.video.is_some() && self.cast.video == self.video;
        match self.cast.state {
            CastState::Initializing => CastAvailability::Initializing,
            CastState::Loading if same_video => CastAvailability::Loading,
            CastState::Active if same_video => CastAvailability::Active,
            CastState::Inactive | CastState::Loading | CastState::Active => {
                CastAvailability::Inactive
            }
        }
    }

    fn progress_ms(&self) -> u64 {
        if self.availability == CastAvailability::Active {
            self.cast.progress_ms
        } else {
            self.local.progress_ms
        }
    }

    fn duration_ms(&self) -> u64 {
        if self.availability == CastAvailability::Active {
            self.cast.duration_ms
        } else {
            self.local.duration_ms
        }
    }

    fn playing(&self) -> bool {
        let casting = self.availability.is_casting();
        (self.local.playing && !casting) || (casting && self.cast.playing)
    }

    fn derive(&self, picture_in_picture_enabled: bool) -> SessionSnapshot {
        let controls = self.state.is_ready() && self.availability == CastAvailability::Inactive;
        SessionSnapshot {
            video: self.video.clone(),
            state: self.state.clone(),
            playing: self.playing(),
            progress_ms: self.progress_ms(),
            duration_ms: self.duration_ms(),
            buffered_ms: self.local.buffered_ms,
            quality: self.quality.clone(),
            speed: self.speed,
            cast_availability: self.availability,
            picture_in_picture_available: controls && picture_in_picture_enabled,
            quality_selection_available: controls,
            speed_selection_available: controls,
            buttons: self.buttons.clone(),
        }
    }

    fn route(&self) -> Route {
        match self.availability {
            CastAvailability::Active => Route::Cast,
            CastAvailability::Loading => Route::Pending,
            CastAvailability::Initializing | CastAvailability::Inactive => Route::Local,
        }
    }

    fn should_poll(&self) -> bool {
        !self.closed
            && self.shows > 0
            && self.local.playing
            && self.state.is_ready()
            && !self.availability.is_casting()
    }

    fn stop_polling(&mut self) {
        if let Some(token) = self.poller.take() {
            token.cancel();
        }
    }
}

/// Which engine a command goes to.
enum Route {
    Local,
    Cast,
    /// Cast is connecting with this video; commands wait for it.
    Pending,
}

struct SessionShared {
    video_ref: VideoRef,
    this: Weak<SessionShared>,
    cast: Arc<CastCoordinator>,
    seek_interval: Duration,
    poll_interval: Duration,
    picture_in_picture_enabled: bool,
    snapshot: watch::Sender<SessionSnapshot>,
    core: Mutex<SessionCore>,
    tasks: TaskGroup,
}

/// Playback session for one [`VideoRef`].
///
/// Sessions are only constructed by the
/// [`SessionRegistry`](crate::session_registry::SessionRegistry).
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    pub(crate) fn new(
        video_ref: VideoRef,
        factory: Arc<dyn PlaybackEngineFactory>,
        cast: Arc<CastCoordinator>,
        config: &SessionConfig,
        runtime: Handle,
    ) -> Self {
        cast.attach();
        let cast_rx = cast.subscribe();
        let cast_snapshot = cast_rx.borrow().clone();
        let (sink, engine_rx) = EngineEventSink::channel();
        let mut core = SessionCore {
            attachs: 0,
            shows: 0,
            surfaces: Vec::new(),
            closed: false,
            factory,
            sink,
            engine: None,
            video: None,
            state: PlaybackState::Loading,
            local: LocalPlayback::default(),
            last_status: EngineStatus::default(),
            quality: Quality::Automatic,
            speed: Speed::default(),
            cast: cast_snapshot,
            availability: CastAvailability::Initializing,
            pending_seek: None,
            poller: None,
            buttons: BTreeMap::new(),
            delegates: Vec::new(),
        };
        let picture_in_picture_enabled = config.picture_in_picture_enabled();
        core.availability = core.derived_availability();
        let (snapshot, _) = watch::channel(core.derive(picture_in_picture_enabled));

        let shared = Arc::new_cyclic(|this| SessionShared {
            video_ref,
            this: this.clone(),
            cast,
            seek_interval: config.seek_interval(),
            poll_interval: config.progress_poll_interval(),
            picture_in_picture_enabled,
            snapshot,
            core: Mutex::new(core),
            tasks: TaskGroup::new("session", runtime),
        });
        shared
            .tasks
            .spawn(run_events(Arc::downgrade(&shared), engine_rx, cast_rx));
        debug!(%video_ref, "session created");
        Self { shared }
    }

    pub fn video_ref(&self) -> VideoRef {
        self.shared.video_ref
    }

    /// Replace the video and reset playback state.
    pub fn load(&self, video: Video) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        info!(video_ref = %shared.video_ref, url = %video.url, "load");
        core.stop_polling();
        core.state = PlaybackState::Loading;
        core.local = LocalPlayback::default();
        core.last_status = EngineStatus::default();
        core.quality = Quality::Automatic;
        core.speed = Speed::default();
        core.pending_seek = None;
        let replaced = core.video.replace(video.clone()).is_some();
        core.availability = core.derived_availability();
        let engine = core.engine();
        if replaced {
            engine.clear();
        }
        engine.prepare(&video.url, &video.headers);
        shared.commit(core, Vec::new());
    }

    pub fn play(&self) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        if core.video.is_none() {
            debug!(video_ref = %shared.video_ref, "play without video ignored");
            return;
        }
        match core.route() {
            Route::Cast => {
                drop(core);
                if let Err(err) = shared.cast.try_play() {
                    warn!(video_ref = %shared.video_ref, error = %err, "cast play dropped");
                }
            }
            Route::Pending => debug!(video_ref = %shared.video_ref, "play while cast loading ignored"),
            Route::Local => {
                let engine = core.engine();
                if engine.state() == EngineState::Ended {
                    engine.seek_to(0);
                    core.local.progress_ms = 0;
                }
                core.engine().play();
                shared.commit(core, Vec::new());
            }
        }
    }

    pub fn pause(&self) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        if core.video.is_none() {
            return;
        }
        match core.route() {
            Route::Cast => {
                drop(core);
                if let Err(err) = shared.cast.try_pause() {
                    warn!(video_ref = %shared.video_ref, error = %err, "cast pause dropped");
                }
            }
            Route::Pending => debug!(video_ref = %shared.video_ref, "pause while cast loading ignored"),
            Route::Local => core.engine().pause(),
        }
    }

    /// Seek the authoritative engine, clamped to `[0, duration]`.
    ///
    /// The upper bound only applies once the duration is known.
    pub fn seek(&self, position_ms: i64) {
        let shared = &self.shared;
        let core = shared.lock_open();
        shared.seek_locked(core, position_ms);
    }

    pub fn seek_back(&self) {
        let shared = &self.shared;
        let core = shared.lock_open();
        let target = core.progress_ms() as i64 - shared.seek_interval.as_millis() as i64;
        shared.seek_locked(core, target);
    }

    pub fn seek_forward(&self) {
        let shared = &self.shared;
        let core = shared.lock_open();
        let target = core.progress_ms() as i64 + shared.seek_interval.as_millis() as i64;
        shared.seek_locked(core, target);
    }

    /// Select a video track. Applied to the local engine only.
    pub fn set_quality(&self, quality: Quality) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        if core.quality.same_track(&quality) {
            debug!(video_ref = %shared.video_ref, quality = %quality.key(), "quality unchanged");
            return;
        }
        debug!(video_ref = %shared.video_ref, quality = %quality.key(), "set quality");
        core.quality = quality.clone();
        if core.state.is_ready() && !core.availability.is_casting() {
            core.engine().apply_quality(&quality);
        }
        // Positions reported under the old track are stale.
        core.stop_polling();
        shared.commit(core, Vec::new());
    }

    pub fn set_speed(&self, speed: Speed) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        debug!(video_ref = %shared.video_ref, %speed, "set speed");
        core.speed = speed;
        if core.state.is_ready() && !core.availability.is_casting() {
            core.engine().set_speed(speed.value());
        }
        shared.commit(core, Vec::new());
    }

    /// Re-prepare the local engine after an error, keeping the position.
    pub fn retry(&self) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        let Some(video) = core.video.clone() else {
            return;
        };
        info!(video_ref = %shared.video_ref, "retry");
        core.state = PlaybackState::Loading;
        core.last_status = EngineStatus::default();
        core.pending_seek = Some(core.local.progress_ms).filter(|position| *position > 0);
        core.engine().prepare(&video.url, &video.headers);
        shared.commit(core, Vec::new());
    }

    /// Register one more interested observer.
    pub fn attach(&self) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        core.attachs += 1;
        debug!(video_ref = %shared.video_ref, attachs = core.attachs, "attach");
    }

    /// Drop one observer. Returns `true` when this was the last one; the
    /// session has then released its resources and must be evicted.
    pub fn detach(&self) -> bool {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        if core.attachs == 0 {
            drop(core);
            contract_violation(SessionError::InvalidReferenceState(format!(
                "session {} detached more often than attached",
                shared.video_ref
            )));
        }
        core.attachs -= 1;
        debug!(video_ref = %shared.video_ref, attachs = core.attachs, "detach");
        if core.attachs > 0 {
            return false;
        }
        core.closed = true;
        core.stop_polling();
        shared.tasks.cancel_all();
        if let Some(mut engine) = core.engine.take() {
            engine.release();
        }
        drop(core);
        shared.cast.detach();
        info!(video_ref = %shared.video_ref, "session released");
        true
    }

    /// Bind `surface` as the engine's output.
    pub fn connect_surface(&self, surface: SurfaceId) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        core.surfaces.push(surface);
        debug!(video_ref = %shared.video_ref, connects = core.surfaces.len(), "connect surface");
        core.engine().set_surface(Some(surface));
    }

    /// Unbind `surface`; the previously connected surface, if any, takes over.
    pub fn disconnect_surface(&self, surface: SurfaceId) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        let index = core.surfaces.iter().rposition(|bound| *bound == surface);
        let Some(index) = index else {
            drop(core);
            contract_violation(SessionError::InvalidReferenceState(format!(
                "surface {} is not connected to session {}",
                surface.raw(),
                shared.video_ref
            )));
        };
        core.surfaces.remove(index);
        debug!(video_ref = %shared.video_ref, connects = core.surfaces.len(), "disconnect surface");
        let next = core.surfaces.last().copied();
        if let Some(engine) = core.engine.as_mut() {
            engine.set_surface(next);
        }
    }

    pub fn show(&self) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        core.shows += 1;
        debug!(video_ref = %shared.video_ref, shows = core.shows, "show");
        shared.commit(core, Vec::new());
    }

    /// Hide one surface; pauses local playback once nothing is visible.
    pub fn hide(&self) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        if core.shows == 0 {
            drop(core);
            contract_violation(SessionError::InvalidReferenceState(format!(
                "session {} hidden more often than shown",
                shared.video_ref
            )));
        }
        core.shows -= 1;
        debug!(video_ref = %shared.video_ref, shows = core.shows, "hide");
        if core.shows == 0 {
            core.stop_polling();
            if core.local.playing {
                if let Some(engine) = core.engine.as_mut() {
                    engine.pause();
                }
            }
        }
        shared.commit(core, Vec::new());
    }

    pub fn add_button(&self, key: impl Into<String>, button: PlayerButton) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        core.buttons.insert(key.into(), button);
        shared.commit(core, Vec::new());
    }

    pub fn remove_button(&self, key: &str) {
        let shared = &self.shared;
        let mut core = shared.lock_open();
        if core.buttons.remove(key).is_some() {
            shared.commit(core, Vec::new());
        }
    }

    pub fn add_delegate(&self, delegate: Arc<dyn PlaybackDelegate>) {
        self.shared.lock_open().delegates.push(delegate);
    }

    pub fn remove_delegate(&self, delegate: &Arc<dyn PlaybackDelegate>) {
        self.shared
            .lock_open()
            .delegates
            .retain(|registered| !std::ptr::addr_eq(Arc::as_ptr(registered), Arc::as_ptr(delegate)));
    }

    /// Hand this session's position and playing state to `other`.
    ///
    /// Both sessions must hold the same video.
    pub fn sync_to(&self, other: &Session) {
        if Arc::ptr_eq(&self.shared, &other.shared) {
            return;
        }
        let (video, progress_ms, playing) = {
            let core = self.shared.lock_open();
            (core.video.clone(), core.progress_ms(), core.playing())
        };
        let target = other.snapshot();
        if target.video != video {
            contract_violation(SessionError::VideoMismatch {
                from: self.shared.video_ref,
                to: other.shared.video_ref,
            });
        }
        info!(
            from = %self.shared.video_ref,
            to = %other.shared.video_ref,
            progress_ms,
            playing,
            "sync session"
        );
        other.seek(progress_ms as i64);
        if playing && !target.playing {
            other.play();
        }
    }

    /// Automatic followed by the engine's tracks, highest first.
    pub fn available_qualities(&self) -> Vec<Quality> {
        let core = self.shared.lock_core();
        let mut detected = core
            .engine
            .as_ref()
            .map(|engine| engine.enumerate_qualities())
            .unwrap_or_default();
        detected.sort_by(|left, right| right.height().cmp(&left.height()));
        let mut qualities = Vec::with_capacity(detected.len() + 1);
        qualities.push(Quality::Automatic);
        qualities.extend(detected);
        qualities
    }

    pub fn available_speeds(&self) -> Vec<Speed> {
        Speed::all()
    }

    pub fn attach_count(&self) -> usize {
        self.shared.lock_core().attachs
    }

    pub fn connect_count(&self) -> usize {
        self.shared.lock_core().surfaces.len()
    }

    pub fn show_count(&self) -> usize {
        self.shared.lock_core().shows
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    fn observe<T: Clone + PartialEq>(
        &self,
        project: fn(&SessionSnapshot) -> T,
    ) -> Observable<SessionSnapshot, T> {
        Observable::new(self.shared.snapshot.subscribe(), project)
    }

    pub fn state(&self) -> Observable<SessionSnapshot, PlaybackState> {
        self.observe(|snapshot| snapshot.state.clone())
    }

    pub fn is_playing(&self) -> Observable<SessionSnapshot, bool> {
        self.observe(|snapshot| snapshot.playing)
    }

    pub fn video(&self) -> Observable<SessionSnapshot, Option<Video>> {
        self.observe(|snapshot| snapshot.video.clone())
    }

    pub fn progress(&self) -> Observable<SessionSnapshot, u64> {
        self.observe(|snapshot| snapshot.progress_ms)
    }

    pub fn duration(&self) -> Observable<SessionSnapshot, u64> {
        self.observe(|snapshot| snapshot.duration_ms)
    }

    pub fn buffered_progress(&self) -> Observable<SessionSnapshot, u64> {
        self.observe(|snapshot| snapshot.buffered_ms)
    }

    pub fn quality(&self) -> Observable<SessionSnapshot, Quality> {
        self.observe(|snapshot| snapshot.quality.clone())
    }

    pub fn speed(&self) -> Observable<SessionSnapshot, Speed> {
        self.observe(|snapshot| snapshot.speed)
    }

    pub fn cast_availability(&self) -> Observable<SessionSnapshot, CastAvailability> {
        self.observe(|snapshot| snapshot.cast_availability)
    }

    pub fn is_picture_in_picture_available(&self) -> Observable<SessionSnapshot, bool> {
        self.observe(|snapshot| snapshot.picture_in_picture_available)
    }

    pub fn is_quality_selection_available(&self) -> Observable<SessionSnapshot, bool> {
        self.observe(|snapshot| snapshot.quality_selection_available)
    }

    pub fn is_speed_selection_available(&self) -> Observable<SessionSnapshot, bool> {
        self.observe(|snapshot| snapshot.speed_selection_available)
    }

    /// Error message while in the error state.
    pub fn error(&self) -> Observable<SessionSnapshot, Option<String>> {
        self.observe(|snapshot| snapshot.state.error_message().map(str::to_string))
    }

    pub fn buttons(&self) -> Observable<SessionSnapshot, BTreeMap<String, PlayerButton>> {
        self.observe(|snapshot| snapshot.buttons.clone())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("video_ref", &self.shared.video_ref)
            .finish_non_exhaustive()
    }
}

impl SessionShared {
    fn lock_core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Lock the core, failing loudly once the session was released.
    #[track_caller]
    fn lock_open(&self) -> MutexGuard<'_, SessionCore> {
        let core = self.lock_core();
        if core.closed {
            drop(core);
            contract_violation(SessionError::InvalidReferenceState(format!(
                "session {} used after release",
                self.video_ref
            )));
        }
        core
    }

    fn seek_locked(&self, mut core: MutexGuard<'_, SessionCore>, position_ms: i64) {
        if core.video.is_none() {
            debug!(video_ref = %self.video_ref, "seek without video ignored");
            return;
        }
        let duration = core.duration_ms();
        let mut target = position_ms.max(0) as u64;
        if duration > 0 {
            target = target.min(duration);
        }
        match core.route() {
            Route::Cast => {
                drop(core);
                if let Err(err) = self.cast.try_seek(target) {
                    warn!(video_ref = %self.video_ref, error = %err, "cast seek dropped");
                }
            }
            Route::Pending => debug!(video_ref = %self.video_ref, "seek while cast loading ignored"),
            Route::Local => {
                core.engine().seek_to(target);
                core.local.progress_ms = target;
                self.commit(core, Vec::new());
            }
        }
    }

    /// Publish the recomputed snapshot, then notify delegates unlocked.
    fn commit(&self, mut core: MutexGuard<'_, SessionCore>, notices: Vec<Notice>) {
        self.update_poller(&mut core);
        let next = core.derive(self.picture_in_picture_enabled);
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        let delegates = if notices.is_empty() {
            Vec::new()
        } else {
            core.delegates.clone()
        };
        drop(core);
        for notice in &notices {
            debug!(video_ref = %self.video_ref, ?notice, "notify delegates");
            for delegate in &delegates {
                notice.deliver(delegate.as_ref());
            }
        }
    }

    fn update_poller(&self, core: &mut SessionCore) {
        let should_poll = core.should_poll();
        if !should_poll {
            core.stop_polling();
            return;
        }
        if core.poller.is_some() {
            return;
        }
        let token = self
            .tasks
            .spawn_cancellable(poll_progress(self.this.clone(), self.poll_interval));
        core.poller = Some(token);
    }

    fn refresh_position(&self) {
        let mut core = self.lock_core();
        if core.closed {
            return;
        }
        let Some(engine) = core.engine.as_ref() else {
            return;
        };
        let position = engine.position();
        core.local.progress_ms = position.position_ms;
        core.local.buffered_ms = position.buffered_ms;
        self.commit(core, Vec::new());
    }

    fn on_cast(&self, cast: CastSnapshot) {
        let mut core = self.lock_core();
        if core.closed {
            return;
        }
        let previous = std::mem::replace(&mut core.cast, cast);
        let before = core.availability;
        let after = core.derived_availability();
        core.availability = after;
        if before != after {
            info!(video_ref = %self.video_ref, from = ?before, to = ?after, "cast availability changed");
            if !before.is_casting() && after.is_casting() {
                if let Some(engine) = core.engine.as_mut() {
                    engine.pause();
                }
            }
            if before == CastAvailability::Active && after == CastAvailability::Inactive {
                // Continue locally where the receiver stopped.
                let resume_at = previous.progress_ms;
                core.local.progress_ms = resume_at;
                let ready = core.state.is_ready();
                let speed = core.speed.value();
                let quality = core.quality.clone();
                if let Some(engine) = core.engine.as_mut() {
                    engine.seek_to(resume_at);
                    // Selections made while casting were only remembered.
                    if ready {
                        if engine.speed() != speed {
                            engine.set_speed(speed);
                        }
                        if !quality.same_track(&Quality::Automatic) {
                            engine.apply_quality(&quality);
                        }
                    }
                }
            }
        }
        self.commit(core, Vec::new());
    }

    fn on_engine(&self, status: EngineStatus) {
        let mut core = self.lock_core();
        if core.closed {
            return;
        }
        let previous = std::mem::replace(&mut core.last_status, status.clone());
        let mut notices = Vec::new();

        if let Some(duration_ms) = status.duration_ms {
            core.local.duration_ms = duration_ms;
        }
        if status.state != EngineState::Idle {
            core.local.progress_ms = status.position_ms;
            core.local.buffered_ms = status.buffered_ms;
        }

        let transitioned =
            status.state != previous.state || status.error_code != previous.error_code;
        if transitioned {
            debug!(video_ref = %self.video_ref, from = ?previous.state, to = ?status.state, "engine state");
            match status.state {
                EngineState::Idle => match status.error_code {
                    Some(code) => {
                        let message = SessionError::Engine { code }.to_string();
                        if core.state.error_message() != Some(message.as_str()) {
                            warn!(video_ref = %self.video_ref, code, "playback error");
                            core.state = PlaybackState::Error {
                                message: message.clone(),
                            };
                            notices.push(Notice::Error(message));
                        }
                    }
                    None => core.state = PlaybackState::Loading,
                },
                // Buffering keeps the current state.
                EngineState::Buffering => {}
                EngineState::Ready => {
                    let became_ready = !core.state.is_ready();
                    core.state = PlaybackState::Ready;
                    let speed = core.speed.value();
                    let quality = core.quality.clone();
                    let pending_seek = core.pending_seek.take();
                    let engine = core.engine();
                    if engine.speed() != speed {
                        debug!("re-applying remembered speed");
                        engine.set_speed(speed);
                    }
                    if became_ready && !quality.same_track(&Quality::Automatic) {
                        engine.apply_quality(&quality);
                    }
                    if let Some(position_ms) = pending_seek {
                        engine.seek_to(position_ms);
                        core.local.progress_ms = position_ms;
                    }
                    if became_ready {
                        info!(video_ref = %self.video_ref, duration_ms = core.local.duration_ms, "ready");
                        notices.push(Notice::Ready);
                    }
                }
                EngineState::Ended => {
                    core.state = PlaybackState::Ready;
                    notices.push(Notice::Finish);
                }
            }
        }

        if status.is_playing != core.local.playing {
            core.local.playing = status.is_playing;
            let notice = if status.is_playing {
                Notice::Play
            } else {
                Notice::Pause
            };
            // Finish is reported after the pause that ended playback.
            let at = notices
                .iter()
                .position(|queued| matches!(queued, Notice::Finish))
                .unwrap_or(notices.len());
            notices.insert(at, notice);
        }
        self.commit(core, notices);
    }
}

async fn run_events(
    shared: Weak<SessionShared>,
    mut engine_rx: mpsc::UnboundedReceiver<EngineStatus>,
    mut cast_rx: watch::Receiver<CastSnapshot>,
) {
    loop {
        tokio::select! {
            // Cast wins when both sides changed in the same instant.
            biased;
            changed = cast_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let cast = cast_rx.borrow_and_update().clone();
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.on_cast(cast);
            }
            status = engine_rx.recv() => {
                let Some(status) = status else {
                    break;
                };
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.on_engine(status);
            }
        }
    }
    debug!("session event loop finished");
}

async fn poll_progress(shared: Weak<SessionShared>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.refresh_position();
    }
}
