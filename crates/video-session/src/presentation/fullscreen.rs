use std::sync::Arc;

use tracing::{debug, info};
use video_session_types::{PresentationState, VideoRef};

use super::PresentationSlot;
use crate::engine::SurfaceId;
use crate::error::contract_violation;
use crate::navigation::{Navigator, PresentationKind, PresentationRequest};
use crate::observable::Observable;
use crate::session_registry::SessionRegistry;

pub trait FullscreenListener: Send + Sync {
    fn on_activated(&self) {}
    /// `to_picture_in_picture` is set when fullscreen hands over to PIP, so
    /// the embedded surface must not reconnect eagerly.
    fn on_exited(&self, _to_picture_in_picture: bool) {}
}

/// Arbiter for the single fullscreen presentation.
pub struct FullscreenCoordinator {
    registry: Arc<SessionRegistry>,
    navigator: Arc<dyn Navigator>,
    slot: PresentationSlot<dyn FullscreenListener>,
}

impl FullscreenCoordinator {
    pub fn new(registry: Arc<SessionRegistry>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            registry,
            navigator,
            slot: PresentationSlot::new("fullscreen"),
        }
    }

    /// Listen for the current entry's activation and exit.
    pub fn register(&self, listener: Arc<dyn FullscreenListener>) {
        self.slot.register(listener);
    }

    /// Take `video_ref` fullscreen, releasing `surface` from the embedded view.
    ///
    /// Entering while another fullscreen entry exists is a caller bug.
    pub fn enter(
        &self,
        video_ref: VideoRef,
        surface: Option<SurfaceId>,
        listener: Arc<dyn FullscreenListener>,
    ) {
        let session = self.registry.require(video_ref);
        let token = self
            .slot
            .try_begin(video_ref, listener)
            .unwrap_or_else(|err| contract_violation(err));
        if let Some(surface) = surface {
            session.disconnect_surface(surface);
        }
        info!(%video_ref, "entering fullscreen");
        self.navigator.open_presentation(PresentationRequest::new(
            PresentationKind::Fullscreen,
            video_ref,
            token,
        ));
    }

    /// The fullscreen UI connected and renders.
    pub fn active(&self, video_ref: VideoRef) {
        let Some(listeners) = self.slot.activate(video_ref) else {
            return;
        };
        for listener in listeners {
            listener.on_activated();
        }
    }

    pub fn exit(&self, to_picture_in_picture: bool) {
        let Some(finished) = self.slot.finish() else {
            debug!("fullscreen exit without entry");
            return;
        };
        info!(video_ref = %finished.video_ref, to_picture_in_picture, "fullscreen exited");
        for listener in finished.listeners {
            listener.on_exited(to_picture_in_picture);
        }
    }

    pub fn is_active(&self, video_ref: VideoRef) -> bool {
        self.slot.current() == Some(video_ref)
    }

    pub fn state(&self) -> Observable<PresentationState, PresentationState> {
        self.slot.observe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::cast_coordinator::CastCoordinator;
    use crate::config::SessionConfig;
    use crate::testing::{
        EngineCommand, FakeEngineFactory, NavigationCall, RecordingNavigator,
    };
    use video_session_types::Video;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl FullscreenListener for Recorder {
        fn on_activated(&self) {
            self.events.lock().unwrap().push("activated".to_string());
        }

        fn on_exited(&self, to_picture_in_picture: bool) {
            self.events
                .lock()
                .unwrap()
                .push(format!("exited pip={to_picture_in_picture}"));
        }
    }

    struct Fixture {
        registry: Arc<SessionRegistry>,
        navigator: Arc<RecordingNavigator>,
        engines: Arc<FakeEngineFactory>,
        fullscreen: FullscreenCoordinator,
    }

    fn fixture() -> Fixture {
        let engines = Arc::new(FakeEngineFactory::default());
        let cast = Arc::new(CastCoordinator::new(Default::default(), None));
        let registry = Arc::new(SessionRegistry::new(
            engines.clone(),
            cast,
            SessionConfig::default(),
        ));
        let navigator = Arc::new(RecordingNavigator::default());
        let fullscreen = FullscreenCoordinator::new(registry.clone(), navigator.clone());
        Fixture {
            registry,
            navigator,
            engines,
            fullscreen,
        }
    }

    #[tokio::test]
    async fn enter_activate_exit_cycle() {
        let fixture = fixture();
        let video_ref = VideoRef::new();
        let session = fixture.registry.attach(video_ref);
        session.load(Video::new("https://cdn.test/a.m3u8"));
        let surface = SurfaceId::next();
        session.connect_surface(surface);

        let listener = Arc::new(Recorder::default());
        fixture.fullscreen.enter(video_ref, Some(surface), listener.clone());
        assert_eq!(fixture.fullscreen.state().get(), PresentationState::Loading(video_ref));
        assert_eq!(session.connect_count(), 0);
        assert_eq!(
            fixture.engines.last().commands().last(),
            Some(&EngineCommand::SetSurface(None))
        );
        assert_eq!(
            fixture.navigator.calls(),
            vec![NavigationCall::Presentation(video_ref)]
        );

        fixture.fullscreen.active(video_ref);
        assert_eq!(fixture.fullscreen.state().get(), PresentationState::Active(video_ref));
        fixture.fullscreen.exit(true);
        assert_eq!(fixture.fullscreen.state().get(), PresentationState::Inactive);
        assert_eq!(
            *listener.events.lock().unwrap(),
            vec!["activated".to_string(), "exited pip=true".to_string()]
        );

        // Listeners are one-shot per entry.
        fixture.fullscreen.exit(false);
        assert_eq!(listener.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    #[should_panic(expected = "presentation already active")]
    async fn second_enter_is_rejected() {
        let fixture = fixture();
        let (first, second) = (VideoRef::new(), VideoRef::new());
        fixture.registry.attach(first);
        fixture.registry.attach(second);
        fixture
            .fullscreen
            .enter(first, None, Arc::new(Recorder::default()));
        fixture
            .fullscreen
            .enter(second, None, Arc::new(Recorder::default()));
    }

    #[tokio::test]
    async fn exit_before_activation_cancels_navigation() {
        let fixture = fixture();
        let video_ref = VideoRef::new();
        fixture.registry.attach(video_ref);
        fixture
            .fullscreen
            .enter(video_ref, None, Arc::new(Recorder::default()));
        let request = fixture.navigator.requests().remove(0);
        assert!(!request.is_cancelled());

        fixture.fullscreen.exit(false);
        assert!(request.is_cancelled());
    }

    #[tokio::test]
    async fn registered_listener_hears_exit_and_stale_activation_is_ignored() {
        let fixture = fixture();
        let video_ref = VideoRef::new();
        fixture.registry.attach(video_ref);
        let entering = Arc::new(Recorder::default());
        let screen = Arc::new(Recorder::default());
        fixture.fullscreen.enter(video_ref, None, entering.clone());
        fixture.fullscreen.register(screen.clone());

        fixture.fullscreen.active(VideoRef::new());
        assert!(entering.events.lock().unwrap().is_empty());

        fixture.fullscreen.exit(false);
        assert_eq!(
            *screen.events.lock().unwrap(),
            vec!["exited pip=false".to_string()]
        );
        assert!(!fixture.fullscreen.is_active(video_ref));
    }
}
