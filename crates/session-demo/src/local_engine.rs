//! Simulated local decoder.
//!
//! Runs on its own worker thread fed by a command queue, advances a virtual
//! clock while playing and reports status through the session's sink.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use video_session::{
    EngineEventSink, EnginePosition, EngineState, EngineStatus, PlaybackEngine,
    PlaybackEngineFactory, SurfaceId,
};
use video_session_types::Quality;

const TICK: Duration = Duration::from_millis(50);
const BUFFER_AHEAD_MS: u64 = 4_000;

enum EngineCommand {
    Prepare { url: String },
    Clear,
    Play,
    Pause,
    Seek { ms: u64 },
    Quality(Quality),
    Quit,
}

#[derive(Clone, Copy, Default)]
struct Clock {
    state: EngineState,
    playing: bool,
    position_ms: u64,
    duration_ms: Option<u64>,
    speed: f32,
}

impl Clock {
    fn buffered_ms(&self) -> u64 {
        let ahead = self.position_ms + BUFFER_AHEAD_MS;
        self.duration_ms.map_or(ahead, |duration| ahead.min(duration))
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state,
            is_playing: self.playing,
            position_ms: self.position_ms,
            buffered_ms: self.buffered_ms(),
            duration_ms: self.duration_ms,
            error_code: None,
        }
    }
}

/// Creates simulated engines for media of a fixed length.
pub struct SimulatedEngineFactory {
    duration_ms: u64,
}

impl SimulatedEngineFactory {
    pub fn new(duration_ms: u64) -> Self {
        Self { duration_ms }
    }
}

impl PlaybackEngineFactory for SimulatedEngineFactory {
    fn create(&self, events: EngineEventSink) -> Box<dyn PlaybackEngine> {
        Box::new(SimulatedEngine::spawn(events, self.duration_ms))
    }
}

struct SimulatedEngine {
    cmd_tx: Sender<EngineCommand>,
    clock: Arc<Mutex<Clock>>,
    surface: Option<SurfaceId>,
    join: Option<JoinHandle<()>>,
}

impl SimulatedEngine {
    fn spawn(events: EngineEventSink, duration_ms: u64) -> Self {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let clock = Arc::new(Mutex::new(Clock {
            speed: 1.0,
            ..Clock::default()
        }));
        let worker_clock = clock.clone();
        let join = std::thread::Builder::new()
            .name("sim-engine".to_string())
            .spawn(move || engine_thread_main(worker_clock, events, cmd_rx, duration_ms))
            .map_err(|err| tracing::error!(error = %err, "engine thread spawn failed"))
            .ok();
        Self {
            cmd_tx,
            clock,
            surface: None,
            join,
        }
    }

    fn send(&self, cmd: EngineCommand) {
        let _ = self.cmd_tx.send(cmd);
    }

    fn clock(&self) -> MutexGuard<'_, Clock> {
        lock(&self.clock)
    }
}

fn lock(clock: &Mutex<Clock>) -> MutexGuard<'_, Clock> {
    clock.lock().unwrap_or_else(|err| err.into_inner())
}

impl PlaybackEngine for SimulatedEngine {
    fn prepare(&mut self, url: &str, headers: &BTreeMap<String, String>) {
        tracing::debug!(url, headers = headers.len(), "engine prepare");
        self.send(EngineCommand::Prepare {
            url: url.to_string(),
        });
    }

    fn clear(&mut self) {
        self.send(EngineCommand::Clear);
    }

    fn play(&mut self) {
        self.send(EngineCommand::Play);
    }

    fn pause(&mut self) {
        self.send(EngineCommand::Pause);
    }

    fn seek_to(&mut self, position_ms: u64) {
        self.send(EngineCommand::Seek { ms: position_ms });
    }

    fn set_speed(&mut self, speed: f32) {
        self.clock().speed = speed;
    }

    fn speed(&self) -> f32 {
        self.clock().speed
    }

    fn enumerate_qualities(&self) -> Vec<Quality> {
        [(640, 360, 800_000), (1280, 720, 2_500_000), (1920, 1080, 5_000_000)]
            .into_iter()
            .enumerate()
            .map(|(index, (width, height, bitrate))| Quality::Detected {
                group: 0,
                index: index as u32,
                selected: false,
                width,
                height,
                bitrate,
            })
            .collect()
    }

    fn apply_quality(&mut self, quality: &Quality) {
        self.send(EngineCommand::Quality(quality.clone()));
    }

    fn set_surface(&mut self, surface: Option<SurfaceId>) {
        if self.surface != surface {
            tracing::debug!(surface = ?surface.map(|id| id.raw()), "engine surface");
        }
        self.surface = surface;
    }

    fn position(&self) -> EnginePosition {
        let clock = self.clock();
        EnginePosition {
            position_ms: clock.position_ms,
            buffered_ms: clock.buffered_ms(),
        }
    }

    fn state(&self) -> EngineState {
        self.clock().state
    }

    fn release(&mut self) {
        self.send(EngineCommand::Quit);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.release();
        }
    }
}

/// Worker loop: apply commands, tick the clock, report every change.
fn engine_thread_main(
    clock: Arc<Mutex<Clock>>,
    events: EngineEventSink,
    cmd_rx: Receiver<EngineCommand>,
    duration_ms: u64,
) {
    let emit = |clock: &Clock| {
        events.emit(clock.status());
    };
    loop {
        let cmd = match cmd_rx.recv_timeout(TICK) {
            Ok(cmd) => Some(cmd),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let mut current = lock(&clock);
        match cmd {
            Some(EngineCommand::Quit) => break,
            Some(EngineCommand::Prepare { url }) => {
                tracing::info!(url = %url, duration_ms, "simulated engine preparing");
                *current = Clock {
                    speed: current.speed,
                    state: EngineState::Buffering,
                    ..Clock::default()
                };
                emit(&current);
                current.state = EngineState::Ready;
                current.duration_ms = Some(duration_ms);
                emit(&current);
            }
            Some(EngineCommand::Clear) => {
                *current = Clock {
                    speed: current.speed,
                    ..Clock::default()
                };
                emit(&current);
            }
            Some(EngineCommand::Play) => {
                if current.state == EngineState::Ready && !current.playing {
                    current.playing = true;
                    emit(&current);
                }
            }
            Some(EngineCommand::Pause) => {
                if current.playing {
                    current.playing = false;
                    emit(&current);
                }
            }
            Some(EngineCommand::Seek { ms }) => {
                let limit = current.duration_ms.unwrap_or(ms);
                current.position_ms = ms.min(limit);
                if current.state == EngineState::Ended {
                    current.state = EngineState::Ready;
                }
                emit(&current);
            }
            Some(EngineCommand::Quality(quality)) => {
                tracing::debug!(quality = %quality.key(), "simulated engine switching track");
            }
            None => {
                if !current.playing {
                    continue;
                }
                let step = (TICK.as_millis() as f32 * current.speed) as u64;
                current.position_ms += step;
                if let Some(duration) = current.duration_ms {
                    if current.position_ms >= duration {
                        current.position_ms = duration;
                        current.playing = false;
                        current.state = EngineState::Ended;
                        emit(&current);
                    }
                }
            }
        }
    }
    tracing::debug!("simulated engine stopped");
}
