//! In-crate fakes for engine, cast and navigation boundaries.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use video_session_types::{Quality, Video, VideoRef};

use crate::cast_engine::{CastEngine, CastEngineFactory, CastEvent, CastEventSink};
use crate::config::CastConfig;
use crate::engine::{
    EngineEventSink, EnginePosition, EngineState, EngineStatus, PlaybackEngine,
    PlaybackEngineFactory, SurfaceId,
};
use crate::navigation::{Navigator, PresentationRequest};
use crate::session::PlaybackDelegate;

/// Let spawned tasks drain their queues.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum EngineCommand {
    Prepare(String),
    Clear,
    Play,
    Pause,
    SeekTo(u64),
    SetSpeed(f32),
    ApplyQuality(Quality),
    SetSurface(Option<SurfaceId>),
    Release,
}

/// Test-side handle on one fake engine.
pub(crate) struct EngineProbe {
    sink: EngineEventSink,
    commands: Mutex<Vec<EngineCommand>>,
    state: Mutex<EngineState>,
    position: Mutex<EnginePosition>,
    speed: Mutex<f32>,
    qualities: Mutex<Vec<Quality>>,
}

impl EngineProbe {
    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Push a status event as the engine would.
    pub(crate) fn emit(&self, status: EngineStatus) {
        *Self::lock(&self.state) = status.state;
        *Self::lock(&self.position) = EnginePosition {
            position_ms: status.position_ms,
            buffered_ms: status.buffered_ms,
        };
        self.sink.emit(status);
    }

    pub(crate) fn emit_ready(&self, duration_ms: u64, playing: bool) {
        self.emit(EngineStatus {
            state: EngineState::Ready,
            is_playing: playing,
            duration_ms: Some(duration_ms),
            ..EngineStatus::default()
        });
    }

    pub(crate) fn set_position(&self, position_ms: u64) {
        Self::lock(&self.position).position_ms = position_ms;
    }

    pub(crate) fn set_qualities(&self, qualities: Vec<Quality>) {
        *Self::lock(&self.qualities) = qualities;
    }

    pub(crate) fn commands(&self) -> Vec<EngineCommand> {
        Self::lock(&self.commands).clone()
    }

    pub(crate) fn clear_commands(&self) {
        Self::lock(&self.commands).clear();
    }

    pub(crate) fn count(&self, command: &EngineCommand) -> usize {
        Self::lock(&self.commands)
            .iter()
            .filter(|recorded| *recorded == command)
            .count()
    }

    fn record(&self, command: EngineCommand) {
        Self::lock(&self.commands).push(command);
    }
}

struct FakeEngine {
    probe: Arc<EngineProbe>,
}

impl PlaybackEngine for FakeEngine {
    fn prepare(&mut self, url: &str, _headers: &BTreeMap<String, String>) {
        self.probe.record(EngineCommand::Prepare(url.to_string()));
    }

    fn clear(&mut self) {
        self.probe.record(EngineCommand::Clear);
    }

    fn play(&mut self) {
        self.probe.record(EngineCommand::Play);
    }

    fn pause(&mut self) {
        self.probe.record(EngineCommand::Pause);
    }

    fn seek_to(&mut self, position_ms: u64) {
        EngineProbe::lock(&self.probe.position).position_ms = position_ms;
        self.probe.record(EngineCommand::SeekTo(position_ms));
    }

    fn set_speed(&mut self, speed: f32) {
        *EngineProbe::lock(&self.probe.speed) = speed;
        self.probe.record(EngineCommand::SetSpeed(speed));
    }

    fn speed(&self) -> f32 {
        *EngineProbe::lock(&self.probe.speed)
    }

    fn enumerate_qualities(&self) -> Vec<Quality> {
        EngineProbe::lock(&self.probe.qualities).clone()
    }

    fn apply_quality(&mut self, quality: &Quality) {
        self.probe.record(EngineCommand::ApplyQuality(quality.clone()));
    }

    fn set_surface(&mut self, surface: Option<SurfaceId>) {
        self.probe.record(EngineCommand::SetSurface(surface));
    }

    fn position(&self) -> EnginePosition {
        *EngineProbe::lock(&self.probe.position)
    }

    fn state(&self) -> EngineState {
        *EngineProbe::lock(&self.probe.state)
    }

    fn release(&mut self) {
        self.probe.record(EngineCommand::Release);
    }
}

/// Engine factory that keeps a probe for every engine it created.
#[derive(Default)]
pub(crate) struct FakeEngineFactory {
    probes: Mutex<Vec<Arc<EngineProbe>>>,
}

impl FakeEngineFactory {
    pub(crate) fn created(&self) -> usize {
        EngineProbe::lock(&self.probes).len()
    }

    pub(crate) fn probe(&self, index: usize) -> Arc<EngineProbe> {
        EngineProbe::lock(&self.probes)[index].clone()
    }

    pub(crate) fn last(&self) -> Arc<EngineProbe> {
        let probes = EngineProbe::lock(&self.probes);
        probes.last().cloned().expect("no engine created")
    }
}

impl PlaybackEngineFactory for FakeEngineFactory {
    fn create(&self, events: EngineEventSink) -> Box<dyn PlaybackEngine> {
        let probe = Arc::new(EngineProbe {
            sink: events,
            commands: Mutex::new(Vec::new()),
            state: Mutex::new(EngineState::Idle),
            position: Mutex::new(EnginePosition::default()),
            speed: Mutex::new(1.0),
            qualities: Mutex::new(Vec::new()),
        });
        EngineProbe::lock(&self.probes).push(probe.clone());
        Box::new(FakeEngine { probe })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum CastCommand {
    Start(String),
    Stop,
    Play,
    Pause,
    Seek(u64),
    Select(String),
    Dispose,
}

/// Test-side handle on the fake cast engine.
#[derive(Default)]
pub(crate) struct CastProbe {
    sink: Mutex<Option<CastEventSink>>,
    commands: Mutex<Vec<CastCommand>>,
    selected: Mutex<Option<String>>,
    /// Events the engine reports right after creation.
    initial: Mutex<Vec<CastEvent>>,
    created: AtomicUsize,
}

impl CastProbe {
    pub(crate) fn emit(&self, event: CastEvent) {
        if let Some(sink) = EngineProbe::lock(&self.sink).as_ref() {
            sink.emit(event);
        }
    }

    pub(crate) fn report_on_create(&self, event: CastEvent) {
        EngineProbe::lock(&self.initial).push(event);
    }

    pub(crate) fn select(&self, route_id: &str) {
        *EngineProbe::lock(&self.selected) = Some(route_id.to_string());
    }

    pub(crate) fn commands(&self) -> Vec<CastCommand> {
        EngineProbe::lock(&self.commands).clone()
    }

    pub(crate) fn clear_commands(&self) {
        EngineProbe::lock(&self.commands).clear();
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    fn record(&self, command: CastCommand) {
        EngineProbe::lock(&self.commands).push(command);
    }
}

struct FakeCastEngine {
    probe: Arc<CastProbe>,
}

impl CastEngine for FakeCastEngine {
    fn start_casting(&mut self, video: &Video) {
        self.probe.record(CastCommand::Start(video.url.clone()));
    }

    fn stop_casting(&mut self) {
        self.probe.record(CastCommand::Stop);
    }

    fn play(&mut self) {
        self.probe.record(CastCommand::Play);
    }

    fn pause(&mut self) {
        self.probe.record(CastCommand::Pause);
    }

    fn seek(&mut self, position_ms: u64) {
        self.probe.record(CastCommand::Seek(position_ms));
    }

    fn select_route(&mut self, route_id: &str) -> bool {
        self.probe.select(route_id);
        self.probe.record(CastCommand::Select(route_id.to_string()));
        true
    }

    fn selected_route(&self) -> Option<String> {
        EngineProbe::lock(&self.probe.selected).clone()
    }

    fn dispose(&mut self) {
        *EngineProbe::lock(&self.probe.sink) = None;
        self.probe.record(CastCommand::Dispose);
    }
}

#[derive(Default)]
pub(crate) struct FakeCastFactory {
    pub(crate) probe: Arc<CastProbe>,
}

impl CastEngineFactory for FakeCastFactory {
    fn create(&self, events: CastEventSink, _config: &CastConfig) -> Box<dyn CastEngine> {
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        for event in EngineProbe::lock(&self.probe.initial).iter() {
            events.emit(event.clone());
        }
        *EngineProbe::lock(&self.probe.sink) = Some(events);
        Box::new(FakeCastEngine {
            probe: self.probe.clone(),
        })
    }
}

pub(crate) fn cast_config() -> CastConfig {
    CastConfig {
        receiver_application_id: Some("TEST".to_string()),
        progress_interval_ms: None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NavigationCall {
    Presentation(VideoRef),
    CastPicker(VideoRef),
}

#[derive(Default)]
pub(crate) struct RecordingNavigator {
    calls: Mutex<Vec<NavigationCall>>,
    requests: Mutex<Vec<PresentationRequest>>,
}

impl RecordingNavigator {
    pub(crate) fn calls(&self) -> Vec<NavigationCall> {
        EngineProbe::lock(&self.calls).clone()
    }

    pub(crate) fn requests(&self) -> Vec<PresentationRequest> {
        EngineProbe::lock(&self.requests).clone()
    }
}

impl Navigator for RecordingNavigator {
    fn open_presentation(&self, request: PresentationRequest) {
        EngineProbe::lock(&self.calls).push(NavigationCall::Presentation(request.video_ref));
        EngineProbe::lock(&self.requests).push(request);
    }

    fn open_cast_picker(&self, video_ref: VideoRef) {
        EngineProbe::lock(&self.calls).push(NavigationCall::CastPicker(video_ref));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DelegateCall {
    Ready,
    Play,
    Pause,
    Finish,
    Error(String),
}

#[derive(Default)]
pub(crate) struct RecordingDelegate {
    calls: Mutex<Vec<DelegateCall>>,
}

impl RecordingDelegate {
    pub(crate) fn calls(&self) -> Vec<DelegateCall> {
        EngineProbe::lock(&self.calls).clone()
    }

    fn record(&self, call: DelegateCall) {
        EngineProbe::lock(&self.calls).push(call);
    }
}

impl PlaybackDelegate for RecordingDelegate {
    fn on_ready(&self) {
        self.record(DelegateCall::Ready);
    }

    fn on_play(&self) {
        self.record(DelegateCall::Play);
    }

    fn on_pause(&self) {
        self.record(DelegateCall::Pause);
    }

    fn on_finish(&self) {
        self.record(DelegateCall::Finish);
    }

    fn on_error(&self, message: &str) {
        self.record(DelegateCall::Error(message.to_string()));
    }
}
