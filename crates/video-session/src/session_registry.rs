//! Process-wide table of live sessions.
//!
//! The registry is the only place sessions are constructed. Attach and
//! detach for every key are serialized by the table lock, so the reference
//! count can never be lost or released twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tracing::{debug, info};
use video_session_types::VideoRef;

use crate::cast_coordinator::CastCoordinator;
use crate::config::SessionConfig;
use crate::engine::PlaybackEngineFactory;
use crate::error::{Result, SessionError, contract_violation};
use crate::session::Session;

pub struct SessionRegistry {
    sessions: Mutex<HashMap<VideoRef, Arc<Session>>>,
    engines: Arc<dyn PlaybackEngineFactory>,
    cast: Arc<CastCoordinator>,
    config: SessionConfig,
    runtime: Handle,
}

impl SessionRegistry {
    /// Build the registry on the current tokio runtime.
    pub fn new(
        engines: Arc<dyn PlaybackEngineFactory>,
        cast: Arc<CastCoordinator>,
        config: SessionConfig,
    ) -> Self {
        Self::with_runtime(engines, cast, config, Handle::current())
    }

    pub fn with_runtime(
        engines: Arc<dyn PlaybackEngineFactory>,
        cast: Arc<CastCoordinator>,
        config: SessionConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            engines,
            cast,
            config,
            runtime,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<VideoRef, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Attach to the session for `video_ref`, creating it on first use.
    pub fn attach(&self, video_ref: VideoRef) -> Arc<Session> {
        let mut sessions = self.lock();
        let session = sessions
            .entry(video_ref)
            .or_insert_with(|| {
                info!(%video_ref, "creating session");
                Arc::new(Session::new(
                    video_ref,
                    self.engines.clone(),
                    self.cast.clone(),
                    &self.config,
                    self.runtime.clone(),
                ))
            })
            .clone();
        session.attach();
        session
    }

    /// Live session for `video_ref`; fatal when it is not attached.
    #[track_caller]
    pub fn require(&self, video_ref: VideoRef) -> Arc<Session> {
        self.try_require(video_ref)
            .unwrap_or_else(|err| contract_violation(err))
    }

    pub fn try_require(&self, video_ref: VideoRef) -> Result<Arc<Session>> {
        self.get(video_ref)
            .ok_or(SessionError::UnknownSession(video_ref))
    }

    pub fn get(&self, video_ref: VideoRef) -> Option<Arc<Session>> {
        self.lock().get(&video_ref).cloned()
    }

    /// Drop one reference; the last one evicts the session and releases it.
    pub fn detach(&self, video_ref: VideoRef) {
        let mut sessions = self.lock();
        let session = sessions.get(&video_ref).cloned();
        let Some(session) = session else {
            drop(sessions);
            contract_violation(SessionError::UnknownSession(video_ref));
        };
        if session.detach() {
            sessions.remove(&video_ref);
            debug!(%video_ref, remaining = sessions.len(), "session evicted");
        }
    }

    /// Hand playback from one session to another holding the same video.
    pub fn sync(&self, from: VideoRef, to: VideoRef) {
        let source = self.require(from);
        let target = self.require(to);
        source.sync_to(&target);
    }

    pub fn contains(&self, video_ref: VideoRef) -> bool {
        self.lock().contains_key(&video_ref)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn cast(&self) -> &Arc<CastCoordinator> {
        &self.cast
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EngineCommand, FakeCastFactory, FakeEngineFactory, settle};
    use video_session_types::Video;

    fn registry() -> (SessionRegistry, Arc<FakeEngineFactory>) {
        let engines = Arc::new(FakeEngineFactory::default());
        let cast = Arc::new(CastCoordinator::new(
            crate::testing::cast_config(),
            Some(Arc::new(FakeCastFactory::default())),
        ));
        let registry = SessionRegistry::new(engines.clone(), cast, SessionConfig::default());
        (registry, engines)
    }

    #[tokio::test]
    async fn session_exists_while_attached_and_releases_once() {
        let (registry, engines) = registry();
        let video_ref = VideoRef::new();

        let first = registry.attach(video_ref);
        let second = registry.attach(video_ref);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.attach_count(), 2);
        first.load(Video::new("https://cdn.test/a.m3u8"));

        registry.detach(video_ref);
        assert!(registry.contains(video_ref));
        assert_eq!(engines.last().count(&EngineCommand::Release), 0);

        registry.detach(video_ref);
        assert!(!registry.contains(video_ref));
        assert!(registry.get(video_ref).is_none());
        assert_eq!(engines.last().count(&EngineCommand::Release), 1);
        assert_eq!(registry.cast().clients(), 0);
    }

    #[tokio::test]
    async fn reattach_after_release_builds_a_fresh_session() {
        let (registry, _engines) = registry();
        let video_ref = VideoRef::new();
        let first = registry.attach(video_ref);
        registry.detach(video_ref);
        let second = registry.attach(video_ref);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.attach_count(), 1);
    }

    #[tokio::test]
    async fn try_require_reports_unknown_session() {
        let (registry, _engines) = registry();
        let video_ref = VideoRef::new();
        assert_eq!(
            registry.try_require(video_ref).map(|_| ()),
            Err(SessionError::UnknownSession(video_ref))
        );
    }

    #[tokio::test]
    #[should_panic(expected = "unknown session")]
    async fn require_on_absent_session_is_fatal() {
        let (registry, _engines) = registry();
        registry.require(VideoRef::new());
    }

    #[tokio::test]
    #[should_panic(expected = "unknown session")]
    async fn detach_without_attach_is_fatal() {
        let (registry, _engines) = registry();
        registry.detach(VideoRef::new());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_attach_detach_keeps_count_consistent() {
        let (registry, engines) = registry();
        let registry = Arc::new(registry);
        let video_ref = VideoRef::new();
        let anchor = registry.attach(video_ref);
        anchor.load(Video::new("https://cdn.test/a.m3u8"));

        let mut workers = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            workers.push(tokio::spawn(async move {
                for _ in 0..50 {
                    registry.attach(video_ref);
                    tokio::task::yield_now().await;
                    registry.detach(video_ref);
                }
            }));
        }
        for worker in workers {
            worker.await.expect("worker");
        }
        settle().await;

        assert_eq!(anchor.attach_count(), 1);
        assert_eq!(engines.created(), 1);
        registry.detach(video_ref);
        assert!(registry.is_empty());
        assert_eq!(engines.last().count(&EngineCommand::Release), 1);
    }

    #[tokio::test]
    async fn sync_passes_through_to_session() {
        let (registry, engines) = registry();
        let video = Video::new("https://cdn.test/a.m3u8");
        let (a, b) = (VideoRef::new(), VideoRef::new());
        let source = registry.attach(a);
        source.load(video.clone());
        let source_engine = engines.last();
        let target = registry.attach(b);
        target.load(video);
        source_engine.emit_ready(60_000, false);
        settle().await;
        source.seek(21_000);

        registry.sync(a, b);
        assert_eq!(target.progress().get(), 21_000);
    }
}
