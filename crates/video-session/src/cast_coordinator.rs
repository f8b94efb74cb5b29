//! Process-wide cast connection and route coordinator.
//!
//! There is a single remote "radio" no matter how many sessions exist. The
//! coordinator owns it: the engine is created on first attach, disposed on
//! last detach, and every session reads the remote state through the same
//! [`CastSnapshot`] channel.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use video_session_types::{CastRoute, CastState, Video, VideoRef};

use crate::cast_engine::{
    CastConnection, CastEngine, CastEngineFactory, CastEvent, CastEventSink, DEFAULT_ROUTE_ID,
    RemotePlayerState, RouteConnection, RouteInfo,
};
use crate::config::CastConfig;
use crate::error::{Result, SessionError, contract_violation};
use crate::navigation::Navigator;
use crate::observable::Observable;
use crate::tasks::TaskGroup;

/// Remote session state as seen by every local session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CastSnapshot {
    pub state: CastState,
    /// Shaped, display-ready routes.
    pub routes: Vec<CastRoute>,
    /// Video currently loaded (or being loaded) on the receiver.
    pub video: Option<Video>,
    pub playing: bool,
    pub progress_ms: u64,
    pub duration_ms: u64,
}

pub struct CastCoordinator {
    shared: Arc<CastShared>,
}

struct CastShared {
    config: CastConfig,
    factory: Option<Arc<dyn CastEngineFactory>>,
    runtime: Handle,
    snapshot: watch::Sender<CastSnapshot>,
    inner: Mutex<CastInner>,
}

#[derive(Default)]
struct CastInner {
    clients: usize,
    engine: Option<Box<dyn CastEngine>>,
    tasks: Option<TaskGroup>,
}

impl CastCoordinator {
    /// Build the coordinator on the current tokio runtime.
    ///
    /// Casting stays permanently `Inactive` when `factory` is `None` or the
    /// config carries no receiver application id.
    pub fn new(config: CastConfig, factory: Option<Arc<dyn CastEngineFactory>>) -> Self {
        Self::with_runtime(config, factory, Handle::current())
    }

    pub fn with_runtime(
        config: CastConfig,
        factory: Option<Arc<dyn CastEngineFactory>>,
        runtime: Handle,
    ) -> Self {
        let factory = factory.filter(|_| config.enabled());
        let initial = idle_snapshot(factory.is_some());
        let (snapshot, _) = watch::channel(initial);
        Self {
            shared: Arc::new(CastShared {
                config,
                factory,
                runtime,
                snapshot,
                inner: Mutex::new(CastInner::default()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.factory.is_some()
    }

    /// Register one interested client; creates the engine on first attach.
    pub fn attach(&self) {
        let shared = &self.shared;
        let mut inner = shared.lock_inner();
        inner.clients += 1;
        debug!(clients = inner.clients, "cast attach");
        if inner.engine.is_some() {
            return;
        }
        let Some(factory) = shared.factory.as_ref() else {
            return;
        };
        let (sink, events) = CastEventSink::channel();
        let engine = factory.create(sink, &shared.config);
        let tasks = TaskGroup::new("cast", shared.runtime.clone());
        tasks.spawn(run_events(Arc::downgrade(shared), events));
        inner.engine = Some(engine);
        inner.tasks = Some(tasks);
        info!("cast engine started");
    }

    /// Drop one client; disposes the engine when the last one leaves.
    pub fn detach(&self) {
        let shared = &self.shared;
        let mut inner = shared.lock_inner();
        if inner.clients == 0 {
            drop(inner);
            contract_violation(SessionError::InvalidReferenceState(
                "cast coordinator detached more often than attached".to_string(),
            ));
        }
        inner.clients -= 1;
        debug!(clients = inner.clients, "cast detach");
        if inner.clients > 0 {
            return;
        }
        if let Some(tasks) = inner.tasks.take() {
            tasks.cancel_all();
        }
        if let Some(mut engine) = inner.engine.take() {
            engine.dispose();
            info!("cast engine disposed");
        }
        shared
            .snapshot
            .send_replace(idle_snapshot(shared.factory.is_some()));
    }

    pub fn clients(&self) -> usize {
        self.shared.lock_inner().clients
    }

    /// React to the cast button of `video_ref`'s player.
    pub fn open(&self, navigator: &dyn Navigator, video_ref: VideoRef, video: Option<Video>) {
        let snapshot = self.shared.snapshot.borrow().clone();
        match snapshot.state {
            CastState::Initializing => contract_violation(SessionError::CastUnavailable),
            CastState::Loading => {
                debug!(%video_ref, "cast loading; replacing video");
                self.shared.replace(video);
            }
            CastState::Inactive => {
                debug!(%video_ref, "cast inactive; opening picker");
                navigator.open_cast_picker(video_ref);
            }
            CastState::Active if snapshot.video == video => {
                debug!(%video_ref, "cast active with same video; opening picker");
                navigator.open_cast_picker(video_ref);
            }
            CastState::Active => {
                debug!(%video_ref, "cast active with other video; replacing");
                self.shared.replace(video);
            }
        }
    }

    pub fn is_selected(&self, route_id: &str) -> bool {
        self.shared
            .lock_inner()
            .engine
            .as_ref()
            .and_then(|engine| engine.selected_route())
            .is_some_and(|selected| selected == route_id)
    }

    /// Switch the output route and cast `video` on it.
    pub fn select(&self, route: &CastRoute, video: Option<Video>) {
        let shared = &self.shared;
        let mut inner = shared.lock_inner();
        if inner.engine.is_none() {
            drop(inner);
            contract_violation(SessionError::InvalidReferenceState(
                "cast coordinator not attached".to_string(),
            ));
        }
        let Some(engine) = inner.engine.as_mut() else {
            return;
        };
        if engine.selected_route().as_deref() == Some(route.id.as_str()) {
            debug!(route = %route.id, "route already selected");
            return;
        }
        if route.id == DEFAULT_ROUTE_ID {
            info!("default route selected; stopping cast");
            shared.snapshot.send_modify(|snapshot| snapshot.video = None);
            engine.stop_casting();
            return;
        }
        info!(route = %route.id, name = %route.name, "switching cast route");
        engine.stop_casting();
        if !engine.select_route(&route.id) {
            warn!(route = %route.id, "cast engine rejected route");
            return;
        }
        shared.replace_locked(&mut inner, video);
    }

    pub fn play(&self) {
        self.try_play().unwrap_or_else(|err| contract_violation(err));
    }

    pub fn pause(&self) {
        self.try_pause().unwrap_or_else(|err| contract_violation(err));
    }

    pub fn seek(&self, position_ms: u64) {
        self.try_seek(position_ms)
            .unwrap_or_else(|err| contract_violation(err));
    }

    pub fn try_play(&self) -> Result<()> {
        self.shared.with_active_engine(|engine| engine.play())
    }

    pub fn try_pause(&self) -> Result<()> {
        self.shared.with_active_engine(|engine| engine.pause())
    }

    pub fn try_seek(&self, position_ms: u64) -> Result<()> {
        self.shared
            .with_active_engine(|engine| engine.seek(position_ms))
    }

    pub fn snapshot(&self) -> CastSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<CastSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn state(&self) -> Observable<CastSnapshot, CastState> {
        Observable::new(self.subscribe(), |snapshot| snapshot.state)
    }

    pub fn routes(&self) -> Observable<CastSnapshot, Vec<CastRoute>> {
        Observable::new(self.subscribe(), |snapshot| snapshot.routes.clone())
    }

    pub fn video(&self) -> Observable<CastSnapshot, Option<Video>> {
        Observable::new(self.subscribe(), |snapshot| snapshot.video.clone())
    }

    pub fn playing(&self) -> Observable<CastSnapshot, bool> {
        Observable::new(self.subscribe(), |snapshot| snapshot.playing)
    }

    pub fn progress(&self) -> Observable<CastSnapshot, u64> {
        Observable::new(self.subscribe(), |snapshot| snapshot.progress_ms)
    }

    pub fn duration(&self) -> Observable<CastSnapshot, u64> {
        Observable::new(self.subscribe(), |snapshot| snapshot.duration_ms)
    }
}

impl CastShared {
    fn lock_inner(&self) -> MutexGuard<'_, CastInner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn with_active_engine(&self, command: impl FnOnce(&mut dyn CastEngine)) -> Result<()> {
        if self.snapshot.borrow().state != CastState::Active {
            return Err(SessionError::CastUnavailable);
        }
        let mut inner = self.lock_inner();
        let engine = inner.engine.as_mut().ok_or(SessionError::CastUnavailable)?;
        command(engine.as_mut());
        Ok(())
    }

    fn replace(&self, video: Option<Video>) {
        let mut inner = self.lock_inner();
        self.replace_locked(&mut inner, video);
    }

    fn replace_locked(&self, inner: &mut CastInner, video: Option<Video>) {
        self.snapshot
            .send_modify(|snapshot| snapshot.video = video.clone());
        let Some(engine) = inner.engine.as_mut() else {
            warn!("cast replace without engine");
            return;
        };
        match video {
            Some(video) => engine.start_casting(&video),
            None => engine.stop_casting(),
        }
    }

    fn handle_event(&self, event: CastEvent) {
        let mut inner = self.lock_inner();
        match event {
            CastEvent::Connection(connection) => {
                let state = match connection {
                    CastConnection::NoDevicesAvailable | CastConnection::NotConnected => {
                        CastState::Inactive
                    }
                    CastConnection::Connecting => CastState::Loading,
                    CastConnection::Connected => CastState::Active,
                };
                self.snapshot.send_if_modified(|snapshot| {
                    if snapshot.state == state {
                        return false;
                    }
                    info!(from = ?snapshot.state, to = ?state, "cast state changed");
                    snapshot.state = state;
                    true
                });
            }
            CastEvent::RoutesChanged(routes) => {
                let routes = shape_routes(routes);
                debug!(count = routes.len(), "cast routes changed");
                self.snapshot
                    .send_if_modified(|snapshot| replace_if_changed(&mut snapshot.routes, routes));
            }
            CastEvent::SessionStarted => {
                let pending = self.snapshot.borrow().video.clone();
                let Some(engine) = inner.engine.as_mut() else {
                    return;
                };
                match pending {
                    Some(video) => {
                        info!(url = %video.url, "cast session started; loading video");
                        engine.start_casting(&video);
                    }
                    None => {
                        info!("cast session started without video; stopping");
                        engine.stop_casting();
                    }
                }
            }
            CastEvent::SessionResumed => {
                debug!("cast session resumed");
            }
            CastEvent::SessionEnded => {
                info!("cast session ended");
                self.snapshot.send_modify(|snapshot| {
                    snapshot.video = None;
                    snapshot.playing = false;
                    snapshot.state = CastState::Inactive;
                });
            }
            CastEvent::PlayerState(state) => match state {
                RemotePlayerState::Playing => {
                    self.snapshot
                        .send_if_modified(|snapshot| replace_if_changed(&mut snapshot.playing, true));
                }
                RemotePlayerState::Paused => {
                    self.snapshot
                        .send_if_modified(|snapshot| replace_if_changed(&mut snapshot.playing, false));
                }
                RemotePlayerState::Idle => {
                    // Ended or failed to load on the receiver.
                    debug!("remote player idle; stopping cast");
                    self.snapshot
                        .send_if_modified(|snapshot| replace_if_changed(&mut snapshot.playing, false));
                    if let Some(engine) = inner.engine.as_mut() {
                        engine.stop_casting();
                    }
                }
                RemotePlayerState::Unknown
                | RemotePlayerState::Buffering
                | RemotePlayerState::Loading => {}
            },
            CastEvent::MediaLoaded { video, playing } => {
                self.snapshot.send_if_modified(|snapshot| {
                    // Receivers do not echo request headers; keep ours for the same url.
                    let video = match (video, snapshot.video.as_ref()) {
                        (Some(loaded), Some(current)) if loaded.url == current.url => {
                            Some(current.clone())
                        }
                        (loaded, _) => loaded,
                    };
                    let changed = snapshot.video != video || snapshot.playing != playing;
                    snapshot.video = video;
                    snapshot.playing = playing;
                    changed
                });
            }
            CastEvent::Progress {
                progress_ms,
                duration_ms,
            } => {
                self.snapshot.send_if_modified(|snapshot| {
                    let changed =
                        snapshot.progress_ms != progress_ms || snapshot.duration_ms != duration_ms;
                    snapshot.progress_ms = progress_ms;
                    snapshot.duration_ms = duration_ms;
                    changed
                });
            }
        }
    }
}

async fn run_events(shared: Weak<CastShared>, mut events: mpsc::UnboundedReceiver<CastEvent>) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_event(event);
    }
    debug!("cast event loop finished");
}

fn idle_snapshot(enabled: bool) -> CastSnapshot {
    CastSnapshot {
        state: if enabled {
            CastState::Initializing
        } else {
            CastState::Inactive
        },
        ..CastSnapshot::default()
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Shape raw routes for display.
///
/// Disconnected routes are all offered. While a route is connecting or
/// connected only the selected one is shown (or the whole group when none
/// is selected). The device route comes first, the rest sort by name.
fn shape_routes(routes: Vec<RouteInfo>) -> Vec<CastRoute> {
    let mut shaped: Vec<RouteInfo> = Vec::with_capacity(routes.len());
    for connection in [
        RouteConnection::Disconnected,
        RouteConnection::Connecting,
        RouteConnection::Connected,
    ] {
        let group: Vec<&RouteInfo> = routes
            .iter()
            .filter(|route| route.connection == connection)
            .collect();
        let selected = group.iter().find(|route| route.selected);
        match (connection, selected) {
            (RouteConnection::Disconnected, _) | (_, None) => {
                shaped.extend(group.into_iter().cloned())
            }
            (_, Some(route)) => shaped.push((*route).clone()),
        }
    }
    shaped.sort_by(|left, right| {
        match (left.id == DEFAULT_ROUTE_ID, right.id == DEFAULT_ROUTE_ID) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => left.name.cmp(&right.name),
        }
    });
    shaped
        .into_iter()
        .map(|route| CastRoute {
            id: route.id,
            name: route.name,
        })
        .collect()
}
