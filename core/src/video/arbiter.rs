use std::collections::HashMap;
use std::sync::Arc;

use super::VideoForwarder;
use crate::edge::{Participant, TrackKind};

/// Priority band for tracks the agent publishes itself.
pub const PUBLISHED_PRIORITY: u8 = 2;

pub fn priority_for(kind: TrackKind) -> u8 {
    match kind {
        TrackKind::ScreenShare => 1,
        TrackKind::Camera | TrackKind::Audio => 0,
    }
}

#[derive(Clone)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
    /// `None` for tracks the agent publishes.
    pub participant: Option<Participant>,
    /// Name of the processor publishing this track.
    pub processor: Option<String>,
    pub priority: u8,
    pub forwarder: Arc<VideoForwarder>,
    seq: u64,
}

impl TrackInfo {
    pub fn remote(
        id: impl Into<String>,
        kind: TrackKind,
        participant: Option<Participant>,
        forwarder: Arc<VideoForwarder>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            participant,
            processor: None,
            priority: priority_for(kind),
            forwarder,
            seq: 0,
        }
    }

    pub fn published(
        id: impl Into<String>,
        processor: impl Into<String>,
        forwarder: Arc<VideoForwarder>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Camera,
            participant: None,
            processor: Some(processor.into()),
            priority: PUBLISHED_PRIORITY,
            forwarder,
            seq: 0,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processor.is_some()
    }
}

impl std::fmt::Debug for TrackInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackInfo")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("participant", &self.participant)
            .field("processor", &self.processor)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Which tracks feed the video processors and the model.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Selection {
    pub source: Option<String>,
    pub model: Option<String>,
}

/// Live video tracks of one agent.
#[derive(Default)]
pub struct TrackArbiter {
    tracks: HashMap<String, TrackInfo>,
    next_seq: u64,
}

impl TrackArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a track, returning the one it replaced under the same id.
    pub fn add(&mut self, mut info: TrackInfo) -> Option<TrackInfo> {
        info.seq = self.next_seq;
        self.next_seq += 1;
        self.tracks.insert(info.id.clone(), info)
    }

    pub fn remove(&mut self, track_id: &str) -> Option<TrackInfo> {
        self.tracks.remove(track_id)
    }

    pub fn get(&self, track_id: &str) -> Option<&TrackInfo> {
        self.tracks.get(track_id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn drain(&mut self) -> Vec<TrackInfo> {
        self.tracks.drain().map(|(_, info)| info).collect()
    }

    /// Highest-priority unprocessed track for the processors and
    /// highest-priority track overall for the model. Ties go to the track
    /// added first. Without any unprocessed track nothing is selected.
    pub fn select(&self) -> Selection {
        let Some(source) = best(self.tracks.values().filter(|info| !info.is_processed())) else {
            return Selection::default();
        };
        let model = best(self.tracks.values()).unwrap_or(source);

        Selection {
            source: Some(source.id.clone()),
            model: Some(model.id.clone()),
        }
    }
}

fn best<'a>(tracks: impl Iterator<Item = &'a TrackInfo>) -> Option<&'a TrackInfo> {
    tracks.min_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)))
}
