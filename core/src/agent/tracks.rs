use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::AgentInner;
use crate::edge::{Participant, TrackKind, VideoTrack};
use crate::events::AgentNotice;
use crate::video::{Selection, TrackArbiter, TrackInfo, VideoForwarder};

/// Live video tracks and what they are currently routed to.
#[derive(Default)]
pub(crate) struct TrackRouter {
    arbiter: TrackArbiter,
    applied: Selection,
    /// File-backed source standing in for every remote track.
    override_source: Option<Arc<VideoForwarder>>,
}

impl TrackRouter {
    fn is_override(&self, forwarder: &Arc<VideoForwarder>) -> bool {
        self.override_source
            .as_ref()
            .is_some_and(|source| Arc::ptr_eq(source, forwarder))
    }
}

impl AgentInner {
    pub(super) async fn on_track_added(
        &self,
        track_id: String,
        kind: TrackKind,
        participant: Option<Participant>,
    ) {
        if !kind.is_video() {
            return;
        }
        if participant
            .as_ref()
            .is_some_and(|participant| self.agent_user.is(participant))
        {
            return;
        }

        let mut router = self.tracks.lock().await;
        if router.arbiter.get(&track_id).is_some() {
            debug!(target: "video", %track_id, "track already routed");
            return;
        }

        let forwarder = match self.config.video_override_path.as_deref() {
            Some(path) => match self.override_forwarder(&mut router, path).await {
                Some(forwarder) => forwarder,
                None => return,
            },
            None => match self.edge.add_track_subscriber(&track_id).await {
                Ok(Some(track)) => self.forward(track),
                Ok(None) => {
                    warn!(target: "video", %track_id, "track vanished before subscribing");
                    return;
                }
                Err(err) => {
                    warn!(target: "video", %track_id, %err, "failed to subscribe to track");
                    return;
                }
            },
        };

        info!(target: "video", %track_id, kind = kind.as_str(), "video track added");
        router
            .arbiter
            .add(TrackInfo::remote(track_id, kind, participant, forwarder));
        self.route_video(&mut router).await;
    }

    pub(super) async fn on_track_removed(&self, track_id: &str) {
        let mut router = self.tracks.lock().await;
        let Some(info) = router.arbiter.remove(track_id) else {
            return;
        };
        info!(target: "video", track_id, "video track removed");
        if !router.is_override(&info.forwarder) {
            info.forwarder.stop().await;
        }
        self.route_video(&mut router).await;
    }

    /// Adds a track published by one of the agent's processors.
    pub(super) async fn add_published_track(&self, processor: String, track: Arc<dyn VideoTrack>) {
        let track_id = track.id().to_string();
        let forwarder = self.forward(track);
        let mut router = self.tracks.lock().await;
        router
            .arbiter
            .add(TrackInfo::published(track_id, processor, forwarder));
        self.route_video(&mut router).await;
    }

    pub(super) async fn stop_video(&self) {
        let mut router = self.tracks.lock().await;
        for info in router.arbiter.drain() {
            if !router.is_override(&info.forwarder) {
                info.forwarder.stop().await;
            }
        }
        if let Some(source) = router.override_source.take() {
            source.stop().await;
        }
        router.applied = Selection::default();
    }

    fn forward(&self, track: Arc<dyn VideoTrack>) -> Arc<VideoForwarder> {
        VideoForwarder::start(
            track,
            self.config.video_buffer_frames,
            self.config.video_max_fps,
        )
    }

    async fn override_forwarder(
        &self,
        router: &mut TrackRouter,
        path: &Path,
    ) -> Option<Arc<VideoForwarder>> {
        if let Some(source) = &router.override_source {
            return Some(source.clone());
        }
        let loader = self.video_loader.clone()?;

        let owned = path.to_path_buf();
        let opened = tokio::task::spawn_blocking(move || loader.open(&owned)).await;
        match opened {
            Ok(Ok(track)) => {
                info!(target: "video", path = %path.display(), "using local video instead of live tracks");
                let source = self.forward(track);
                router.override_source = Some(source.clone());
                Some(source)
            }
            Ok(Err(err)) => {
                warn!(target: "video", path = %path.display(), %err, "failed to open override video");
                None
            }
            Err(err) => {
                warn!(target: "video", %err, "override video loader panicked");
                None
            }
        }
    }

    /// Routes the best unprocessed track to the video processors and the
    /// best track overall to a video-capable model.
    async fn route_video(&self, router: &mut TrackRouter) {
        let selection = router.arbiter.select();

        if selection.source != router.applied.source {
            match selection
                .source
                .as_deref()
                .and_then(|id| router.arbiter.get(id))
            {
                Some(info) => {
                    for processor in &self.processors.video {
                        if let Err(err) = processor
                            .process_video(info.forwarder.clone(), info.participant.clone())
                            .await
                        {
                            warn!(
                                target: "video",
                                processor = processor.name(),
                                %err,
                                "video processor failed to start"
                            );
                        }
                    }
                }
                None => {
                    for processor in &self.processors.video {
                        if let Err(err) = processor.stop_processing().await {
                            warn!(
                                target: "video",
                                processor = processor.name(),
                                %err,
                                "video processor failed to stop"
                            );
                        }
                    }
                }
            }
        }

        if let Some(model) = &self.caps.video {
            if selection.model != router.applied.model {
                let result = match selection
                    .model
                    .as_deref()
                    .and_then(|id| router.arbiter.get(id))
                {
                    Some(info) => {
                        model
                            .watch_video_track(info.forwarder.clone(), info.participant.clone())
                            .await
                    }
                    None => model.stop_watching_video_track().await,
                };
                if let Err(err) = result {
                    warn!(target: "video", %err, "failed to route video to model");
                }
            }
        }

        if selection != router.applied {
            debug!(
                target: "video",
                source = ?selection.source,
                model = ?selection.model,
                "video routing changed"
            );
            self.notify(AgentNotice::VideoRouting {
                processors: selection.source.clone(),
                model: selection.model.clone(),
            });
        }
        router.applied = selection;
    }
}
