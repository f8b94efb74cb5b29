//! Simulated cast receiver.
//!
//! Offers the device route plus one remote route. Selecting the remote route
//! connects after a short delay; loaded media then advances on the worker
//! thread and reports progress at the configured cadence.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use video_session::{
    CastConfig, CastConnection, CastEngine, CastEngineFactory, CastEvent, CastEventSink,
    DEFAULT_ROUTE_ID, RemotePlayerState, RouteConnection, RouteInfo,
};
use video_session_types::Video;

const REMOTE_ROUTE_ID: &str = "living-room";
const CONNECT_DELAY: Duration = Duration::from_millis(300);

enum CastCommand {
    Connect,
    Disconnect,
    Load(Video),
    Stop,
    Play,
    Pause,
    Seek(u64),
    Quit,
}

/// Creates a simulated receiver whose media lasts `duration_ms`.
pub struct SimulatedCastFactory {
    duration_ms: u64,
}

impl SimulatedCastFactory {
    pub fn new(duration_ms: u64) -> Self {
        Self { duration_ms }
    }
}

impl CastEngineFactory for SimulatedCastFactory {
    fn create(&self, events: CastEventSink, config: &CastConfig) -> Box<dyn CastEngine> {
        tracing::info!(
            receiver = config.receiver_application_id.as_deref().unwrap_or_default(),
            "simulated cast receiver starting"
        );
        Box::new(SimulatedCast::spawn(
            events,
            self.duration_ms,
            config.progress_interval(),
        ))
    }
}

struct SimulatedCast {
    cmd_tx: Sender<CastCommand>,
    selected: Arc<Mutex<String>>,
    join: Option<JoinHandle<()>>,
}

impl SimulatedCast {
    fn spawn(events: CastEventSink, duration_ms: u64, cadence: Duration) -> Self {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let selected = Arc::new(Mutex::new(DEFAULT_ROUTE_ID.to_string()));
        let worker = RemoteReceiver {
            events,
            selected: selected.clone(),
            duration_ms,
            media: None,
            connected: false,
        };
        let join = std::thread::Builder::new()
            .name("sim-cast".to_string())
            .spawn(move || cast_thread_main(worker, cmd_rx, cadence))
            .map_err(|err| tracing::error!(error = %err, "cast thread spawn failed"))
            .ok();
        Self {
            cmd_tx,
            selected,
            join,
        }
    }

    fn send(&self, cmd: CastCommand) {
        let _ = self.cmd_tx.send(cmd);
    }
}

fn lock(selected: &Mutex<String>) -> MutexGuard<'_, String> {
    selected.lock().unwrap_or_else(|err| err.into_inner())
}

impl CastEngine for SimulatedCast {
    fn start_casting(&mut self, video: &Video) {
        self.send(CastCommand::Load(video.clone()));
    }

    fn stop_casting(&mut self) {
        self.send(CastCommand::Stop);
    }

    fn play(&mut self) {
        self.send(CastCommand::Play);
    }

    fn pause(&mut self) {
        self.send(CastCommand::Pause);
    }

    fn seek(&mut self, position_ms: u64) {
        self.send(CastCommand::Seek(position_ms));
    }

    fn select_route(&mut self, route_id: &str) -> bool {
        let cmd = match route_id {
            DEFAULT_ROUTE_ID => CastCommand::Disconnect,
            REMOTE_ROUTE_ID => CastCommand::Connect,
            _ => return false,
        };
        *lock(&self.selected) = route_id.to_string();
        self.send(cmd);
        true
    }

    fn selected_route(&self) -> Option<String> {
        Some(lock(&self.selected).clone())
    }

    fn dispose(&mut self) {
        self.send(CastCommand::Quit);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SimulatedCast {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.dispose();
        }
    }
}

struct RemoteMedia {
    video: Video,
    playing: bool,
    position_ms: u64,
}

/// Worker-side receiver state.
struct RemoteReceiver {
    events: CastEventSink,
    selected: Arc<Mutex<String>>,
    duration_ms: u64,
    media: Option<RemoteMedia>,
    connected: bool,
}

impl RemoteReceiver {
    fn emit(&self, event: CastEvent) {
        self.events.emit(event);
    }

    fn routes(&self) -> Vec<RouteInfo> {
        let selected = lock(&self.selected).clone();
        let remote_connection = if self.connected {
            RouteConnection::Connected
        } else if selected == REMOTE_ROUTE_ID {
            RouteConnection::Connecting
        } else {
            RouteConnection::Disconnected
        };
        vec![
            RouteInfo {
                id: DEFAULT_ROUTE_ID.to_string(),
                name: "This device".to_string(),
                connection: RouteConnection::Disconnected,
                selected: selected == DEFAULT_ROUTE_ID,
            },
            RouteInfo {
                id: REMOTE_ROUTE_ID.to_string(),
                name: "Living Room TV".to_string(),
                connection: remote_connection,
                selected: selected == REMOTE_ROUTE_ID,
            },
        ]
    }

    fn announce(&self) {
        self.emit(CastEvent::Connection(CastConnection::NotConnected));
        self.emit(CastEvent::RoutesChanged(self.routes()));
    }

    fn connect(&mut self) {
        self.emit(CastEvent::Connection(CastConnection::Connecting));
        self.emit(CastEvent::RoutesChanged(self.routes()));
        std::thread::sleep(CONNECT_DELAY);
        self.connected = true;
        self.emit(CastEvent::Connection(CastConnection::Connected));
        self.emit(CastEvent::RoutesChanged(self.routes()));
        self.emit(CastEvent::SessionStarted);
    }

    fn end_session(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.media = None;
        self.emit(CastEvent::MediaLoaded {
            video: None,
            playing: false,
        });
        self.emit(CastEvent::SessionEnded);
        *lock(&self.selected) = DEFAULT_ROUTE_ID.to_string();
        self.announce();
    }

    fn load(&mut self, video: Video) {
        if !self.connected {
            tracing::debug!(url = %video.url, "load ignored without remote session");
            return;
        }
        tracing::info!(url = %video.url, "receiver loading media");
        self.emit(CastEvent::PlayerState(RemotePlayerState::Loading));
        self.emit(CastEvent::MediaLoaded {
            video: Some(video.clone()),
            playing: true,
        });
        self.emit(CastEvent::PlayerState(RemotePlayerState::Playing));
        self.media = Some(RemoteMedia {
            video,
            playing: true,
            position_ms: 0,
        });
        self.report_progress();
    }

    fn set_playing(&mut self, playing: bool) {
        let Some(media) = self.media.as_mut() else {
            return;
        };
        media.playing = playing;
        let video = media.video.clone();
        self.emit(CastEvent::MediaLoaded {
            video: Some(video),
            playing,
        });
        let state = if playing {
            RemotePlayerState::Playing
        } else {
            RemotePlayerState::Paused
        };
        self.emit(CastEvent::PlayerState(state));
    }

    fn seek(&mut self, position_ms: u64) {
        if let Some(media) = self.media.as_mut() {
            media.position_ms = position_ms.min(self.duration_ms);
        }
        self.report_progress();
    }

    fn advance(&mut self, elapsed: Duration) {
        let duration_ms = self.duration_ms;
        let Some(media) = self.media.as_mut() else {
            return;
        };
        if !media.playing {
            return;
        }
        media.position_ms = (media.position_ms + elapsed.as_millis() as u64).min(duration_ms);
        if media.position_ms >= duration_ms {
            tracing::info!("remote media finished");
            self.media = None;
            self.emit(CastEvent::PlayerState(RemotePlayerState::Idle));
            self.emit(CastEvent::MediaLoaded {
                video: None,
                playing: false,
            });
            return;
        }
        self.report_progress();
    }

    fn report_progress(&self) {
        if let Some(media) = &self.media {
            self.emit(CastEvent::Progress {
                progress_ms: media.position_ms,
                duration_ms: self.duration_ms,
            });
        }
    }
}

fn cast_thread_main(mut receiver: RemoteReceiver, cmd_rx: Receiver<CastCommand>, cadence: Duration) {
    receiver.announce();
    let mut last_tick = Instant::now();
    loop {
        match cmd_rx.recv_timeout(cadence) {
            Ok(CastCommand::Quit) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(CastCommand::Connect) => receiver.connect(),
            Ok(CastCommand::Disconnect) | Ok(CastCommand::Stop) => receiver.end_session(),
            Ok(CastCommand::Load(video)) => receiver.load(video),
            Ok(CastCommand::Play) => receiver.set_playing(true),
            Ok(CastCommand::Pause) => receiver.set_playing(false),
            Ok(CastCommand::Seek(ms)) => receiver.seek(ms),
            Err(RecvTimeoutError::Timeout) => {}
        }
        let now = Instant::now();
        if now.duration_since(last_tick) >= cadence {
            receiver.advance(now.duration_since(last_tick));
            last_tick = now;
        }
    }
    tracing::debug!("simulated cast receiver stopped");
}
