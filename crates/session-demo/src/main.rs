//! Session demo: drives the video session core with simulated engines.
//!
//! ## Walkthrough
//! 1. **Embedded**: attach a session, load the video, connect a surface and play.
//! 2. **Cast** (optional): connect to the simulated receiver, then return to the device.
//! 3. **Fullscreen**: hand the surface to a fullscreen view and back.
//! 4. **Picture-in-picture**: open a window session for the same video and let the
//!    embedded session mirror it until the window closes.
//!
//! Ctrl-C interrupts the walkthrough and tears everything down.

mod cast_engine;
mod cli;
mod local_engine;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use video_session::{
    CastCoordinator, CastEngineFactory, DEFAULT_ROUTE_ID, FullscreenCoordinator,
    FullscreenListener, Navigator, PictureInPictureCoordinator, PictureInPictureListener,
    PictureInPictureMirror, PlaybackDelegate, PresentationRequest, Session, SessionConfig,
    SessionRegistry, SurfaceId,
};
use video_session_types::{
    CastAvailability, CastRoute, CastState, PlaybackState, Speed, Video, VideoRef, format_time,
};

use cast_engine::SimulatedCastFactory;
use local_engine::SimulatedEngineFactory;

const DEMO_RECEIVER_ID: &str = "DEMO_RECEIVER";
const MIRROR_CADENCE: Duration = Duration::from_millis(250);
const DWELL: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,session_demo=info,video_session=debug")
        }))
        .init();

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    match args.cmd {
        cli::Command::Play {
            url,
            duration_ms,
            cast,
            title,
        } => {
            if cast {
                let cast_config = config.cast.get_or_insert_with(Default::default);
                cast_config
                    .receiver_application_id
                    .get_or_insert_with(|| DEMO_RECEIVER_ID.to_string());
            }
            config.picture_in_picture_enabled.get_or_insert(true);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name("session-rt")
                .build()
                .context("build tokio runtime")?;

            let cancel = CancellationToken::new();
            let cancel_for_signal = cancel.clone();
            let _ = ctrlc::set_handler(move || {
                tracing::info!("interrupt received; tearing down");
                cancel_for_signal.cancel();
            });

            let video = Video::with_metadata(title, None, url);
            let demo = Demo {
                config,
                video,
                duration_ms,
                cast,
                cancel,
            };
            match runtime.block_on(demo.run()) {
                Ok(()) => tracing::info!("walkthrough complete"),
                Err(err) if demo_interrupted(&err) => tracing::info!("walkthrough interrupted"),
                Err(err) => return Err(err),
            }
        }
    }

    Ok(())
}

#[derive(Debug, Error)]
#[error("interrupted")]
struct Interrupted;

fn demo_interrupted(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Interrupted>().is_some()
}

/// Forwards presentation requests to the demo loop, which plays the host UI.
struct ChannelNavigator {
    requests: mpsc::UnboundedSender<PresentationRequest>,
}

impl Navigator for ChannelNavigator {
    fn open_presentation(&self, request: PresentationRequest) {
        tracing::info!(kind = ?request.kind, video_ref = %request.video_ref, "navigate: presentation");
        let _ = self.requests.send(request);
    }

    fn open_cast_picker(&self, video_ref: VideoRef) {
        tracing::info!(%video_ref, "navigate: cast picker");
    }
}

struct LogDelegate {
    label: &'static str,
}

impl PlaybackDelegate for LogDelegate {
    fn on_ready(&self) {
        tracing::info!(session = self.label, "ready");
    }

    fn on_play(&self) {
        tracing::info!(session = self.label, "playing");
    }

    fn on_pause(&self) {
        tracing::info!(session = self.label, "paused");
    }

    fn on_finish(&self) {
        tracing::info!(session = self.label, "finished");
    }

    fn on_error(&self, message: &str) {
        tracing::warn!(session = self.label, message, "playback error");
    }
}

struct LogPresentation;

impl FullscreenListener for LogPresentation {
    fn on_activated(&self) {
        tracing::info!("fullscreen active");
    }

    fn on_exited(&self, to_picture_in_picture: bool) {
        tracing::info!(to_picture_in_picture, "fullscreen exited");
    }
}

impl PictureInPictureListener for LogPresentation {
    fn on_activated(&self) {
        tracing::info!("picture-in-picture active");
    }

    fn on_exited(&self, video_ref: VideoRef) {
        tracing::info!(%video_ref, "picture-in-picture exited");
    }
}

struct Demo {
    config: SessionConfig,
    video: Video,
    duration_ms: u64,
    cast: bool,
    cancel: CancellationToken,
}

impl Demo {
    async fn run(&self) -> Result<()> {
        let cast_factory: Arc<dyn CastEngineFactory> =
            Arc::new(SimulatedCastFactory::new(self.duration_ms));
        let cast = Arc::new(CastCoordinator::new(self.config.cast(), Some(cast_factory)));
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(SimulatedEngineFactory::new(self.duration_ms)),
            cast,
            self.config.clone(),
        ));
        let (requests_tx, mut requests) = mpsc::unbounded_channel();
        let navigator = Arc::new(ChannelNavigator {
            requests: requests_tx,
        });

        let embedded_ref = VideoRef::new();
        let embedded = registry.attach(embedded_ref);
        embedded.add_delegate(Arc::new(LogDelegate { label: "embedded" }));
        embedded.load(self.video.clone());
        embedded.show();
        let surface = SurfaceId::next();
        embedded.connect_surface(surface);

        let outcome = self
            .walkthrough(&registry, &navigator, &mut requests, &embedded, surface)
            .await;

        if outcome.is_ok() {
            embedded.disconnect_surface(surface);
            embedded.hide();
        }
        registry.detach(embedded_ref);
        tracing::info!(sessions = registry.len(), "sessions released");
        outcome
    }

    async fn walkthrough(
        &self,
        registry: &Arc<SessionRegistry>,
        navigator: &Arc<ChannelNavigator>,
        requests: &mut mpsc::UnboundedReceiver<PresentationRequest>,
        embedded: &Arc<Session>,
        surface: SurfaceId,
    ) -> Result<()> {
        let mut state = embedded.state();
        self.until(state.wait_for(PlaybackState::is_ready)).await?;
        tracing::info!(
            qualities = embedded.available_qualities().len(),
            duration = %format_time(Duration::from_millis(embedded.snapshot().duration_ms)),
            "embedded session ready"
        );
        embedded.set_speed(Speed::X1_50);
        embedded.play();
        self.wait_for_progress(embedded, self.duration_ms / 5).await?;

        if self.cast {
            self.cast_round_trip(registry, navigator.as_ref(), embedded)
                .await?;
        }

        self.fullscreen_round_trip(registry, navigator, requests, embedded, surface)
            .await?;
        self.picture_in_picture_round_trip(registry, navigator, requests, embedded, surface)
            .await?;

        embedded.seek_forward();
        let mut playing = embedded.is_playing();
        self.until(playing.wait_for(|playing| !*playing)).await?;
        tracing::info!(progress_ms = embedded.snapshot().progress_ms, "embedded playback stopped");
        Ok(())
    }

    async fn cast_round_trip(
        &self,
        registry: &SessionRegistry,
        navigator: &dyn Navigator,
        embedded: &Session,
    ) -> Result<()> {
        let cast = registry.cast();
        let mut cast_state = cast.state();
        self.until(cast_state.wait_for(|state| *state != CastState::Initializing))
            .await?;
        cast.open(navigator, embedded.video_ref(), embedded.snapshot().video);

        let route = cast
            .snapshot()
            .routes
            .into_iter()
            .find(|route| route.id != DEFAULT_ROUTE_ID)
            .ok_or_else(|| anyhow!("no remote cast route discovered"))?;
        tracing::info!(route = %route.name, "casting");
        cast.select(&route, embedded.snapshot().video);

        let mut availability = embedded.cast_availability();
        self.until(availability.wait_for(|value| *value == CastAvailability::Active))
            .await?;
        self.wait_for_progress(embedded, self.duration_ms / 3).await?;
        embedded.pause();
        embedded.play();

        let device = CastRoute {
            id: DEFAULT_ROUTE_ID.to_string(),
            name: "This device".to_string(),
        };
        cast.select(&device, None);
        self.until(availability.wait_for(|value| *value == CastAvailability::Inactive))
            .await?;
        tracing::info!(
            progress_ms = embedded.snapshot().progress_ms,
            "back on the device"
        );
        embedded.play();
        Ok(())
    }

    async fn fullscreen_round_trip(
        &self,
        registry: &Arc<SessionRegistry>,
        navigator: &Arc<ChannelNavigator>,
        requests: &mut mpsc::UnboundedReceiver<PresentationRequest>,
        embedded: &Session,
        surface: SurfaceId,
    ) -> Result<()> {
        let fullscreen = FullscreenCoordinator::new(registry.clone(), navigator.clone());
        fullscreen.enter(embedded.video_ref(), Some(surface), Arc::new(LogPresentation));
        let request = self.next_request(requests).await?;
        let screen_surface = SurfaceId::next();
        embedded.connect_surface(screen_surface);
        fullscreen.active(request.video_ref);

        self.dwell().await?;
        fullscreen.exit(false);
        embedded.disconnect_surface(screen_surface);
        embedded.connect_surface(surface);
        Ok(())
    }

    async fn picture_in_picture_round_trip(
        &self,
        registry: &Arc<SessionRegistry>,
        navigator: &Arc<ChannelNavigator>,
        requests: &mut mpsc::UnboundedReceiver<PresentationRequest>,
        embedded: &Session,
        surface: SurfaceId,
    ) -> Result<()> {
        let pip = PictureInPictureCoordinator::new(registry.clone(), navigator.clone());
        let mirror_cancel = self.cancel.child_token();
        let mirror = tokio::spawn(PictureInPictureMirror::new(embedded.video_ref()).run(
            registry.clone(),
            pip.state(),
            MIRROR_CADENCE,
            mirror_cancel.clone(),
        ));

        let window_ref = VideoRef::new();
        let window = registry.attach(window_ref);
        window.add_delegate(Arc::new(LogDelegate { label: "window" }));
        window.load(self.video.clone());
        let mut window_state = window.state();
        self.until(window_state.wait_for(PlaybackState::is_ready))
            .await?;
        registry.sync(embedded.video_ref(), window_ref);
        embedded.disconnect_surface(surface);
        pip.enter(window_ref, None, Arc::new(LogPresentation));

        let request = self.next_request(requests).await?;
        let window_surface = SurfaceId::next();
        window.show();
        window.connect_surface(window_surface);
        pip.active(request.video_ref);

        self.dwell().await?;
        pip.exit();
        window.disconnect_surface(window_surface);
        window.hide();
        embedded.connect_surface(surface);

        // Let the mirror settle against the closed window before it goes away.
        tokio::time::sleep(MIRROR_CADENCE * 2).await;
        mirror_cancel.cancel();
        let _ = mirror.await;
        registry.detach(window_ref);
        Ok(())
    }

    async fn next_request(
        &self,
        requests: &mut mpsc::UnboundedReceiver<PresentationRequest>,
    ) -> Result<PresentationRequest> {
        let request = self
            .until(requests.recv())
            .await?
            .ok_or_else(|| anyhow!("navigator closed"))?;
        if request.is_cancelled() {
            return Err(anyhow!("presentation request cancelled before it opened"));
        }
        Ok(request)
    }

    async fn wait_for_progress(&self, session: &Session, target_ms: u64) -> Result<()> {
        let mut progress = session.progress();
        let reached = self
            .until(progress.wait_for(|progress| *progress >= target_ms))
            .await?
            .ok_or_else(|| anyhow!("session closed"))?;
        tracing::info!(
            progress = %format_time(Duration::from_millis(reached)),
            "progress reached"
        );
        Ok(())
    }

    async fn dwell(&self) -> Result<()> {
        self.until(tokio::time::sleep(DWELL)).await
    }

    async fn until<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Interrupted.into()),
            out = fut => Ok(out),
        }
    }
}
