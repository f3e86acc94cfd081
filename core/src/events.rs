//! Per-agent event routing.
//!
//! Providers report through an [`EventSender`]. Incoming audio goes straight
//! into the agent's audio buffer and transcript fragments are accumulated
//! before the event is queued, so a turn-ended event always sees every
//! fragment sent ahead of it. A turn-started event triggers barge-in as it is
//! sent, without waiting for the queue. Everything else is handled in order by the
//! agent's dispatcher. Outward notifications go through a broadcast channel
//! of [`AgentNotice`]s.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{trace, warn, Instrument};

use crate::audio::{AudioQueue, PcmData};
use crate::edge::{Participant, TrackKind};
use crate::plugins::LlmResponse;
use crate::turn::{BargeIn, TranscriptStore};

#[derive(Debug, Clone)]
pub enum AgentEvent {
    SttPartial {
        text: String,
        participant: Option<Participant>,
    },
    SttTranscript {
        text: String,
        participant: Option<Participant>,
    },
    SttError {
        message: String,
    },
    TurnStarted {
        participant: Option<Participant>,
        confidence: f32,
    },
    TurnEnded {
        participant: Option<Participant>,
        confidence: f32,
        eager: bool,
    },
    /// A model reply finished. `turn_id` is `None` for prompts issued from code.
    ReplyReady {
        turn_id: Option<u64>,
        response: LlmResponse,
    },
    /// The model request for a turn failed.
    ReplyFailed {
        turn_id: u64,
    },
    LlmResponseChunk {
        item_id: String,
        delta: String,
    },
    RealtimeAudio(Bytes),
    RealtimeUserTranscription {
        text: String,
        participant: Option<Participant>,
    },
    RealtimeAgentTranscription {
        text: String,
    },
    TtsAudio(Bytes),
    TrackAdded {
        track_id: String,
        kind: TrackKind,
        participant: Option<Participant>,
    },
    TrackRemoved {
        track_id: String,
        kind: TrackKind,
        participant: Option<Participant>,
    },
    AudioReceived(PcmData),
    CallEnded,
}

impl AgentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::SttPartial { .. } => "stt_partial",
            AgentEvent::SttTranscript { .. } => "stt_transcript",
            AgentEvent::SttError { .. } => "stt_error",
            AgentEvent::TurnStarted { .. } => "turn_started",
            AgentEvent::TurnEnded { .. } => "turn_ended",
            AgentEvent::ReplyReady { .. } => "reply_ready",
            AgentEvent::ReplyFailed { .. } => "reply_failed",
            AgentEvent::LlmResponseChunk { .. } => "llm_response_chunk",
            AgentEvent::RealtimeAudio(_) => "realtime_audio",
            AgentEvent::RealtimeUserTranscription { .. } => "realtime_user_transcription",
            AgentEvent::RealtimeAgentTranscription { .. } => "realtime_agent_transcription",
            AgentEvent::TtsAudio(_) => "tts_audio",
            AgentEvent::TrackAdded { .. } => "track_added",
            AgentEvent::TrackRemoved { .. } => "track_removed",
            AgentEvent::AudioReceived(_) => "audio_received",
            AgentEvent::CallEnded => "call_ended",
        }
    }
}

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<AgentEvent>,
    audio: Arc<AudioQueue>,
    transcripts: Arc<TranscriptStore>,
    barge_in: Option<Arc<BargeIn>>,
}

pub type EventReceiver = mpsc::UnboundedReceiver<AgentEvent>;

pub fn channel(
    audio: Arc<AudioQueue>,
    transcripts: Arc<TranscriptStore>,
    barge_in: Option<Arc<BargeIn>>,
) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender {
            tx,
            audio,
            transcripts,
            barge_in,
        },
        rx,
    )
}

impl EventSender {
    /// Never blocks. Events sent after the agent closed are dropped.
    pub fn send(&self, event: AgentEvent) {
        match &event {
            AgentEvent::AudioReceived(pcm) => {
                self.audio.put(pcm.clone());
                return;
            }
            AgentEvent::SttPartial { text, participant } => {
                self.transcripts.push_partial(participant.as_ref(), text);
            }
            AgentEvent::SttTranscript { text, participant } => {
                self.transcripts.push_final(participant.as_ref(), text);
            }
            AgentEvent::TurnStarted { participant, .. } => {
                self.barge_in(participant.as_ref());
            }
            _ => {}
        }

        if let Err(err) = self.tx.send(event) {
            trace!(
                target: "agent",
                event = err.0.name(),
                "event dropped after dispatcher shut down"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn barge_in(&self, participant: Option<&Participant>) {
        let Some(barge_in) = &self.barge_in else {
            return;
        };
        if self.tx.is_closed() || !barge_in.applies(participant) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let barge_in = Arc::clone(barge_in);
                handle.spawn(async move { barge_in.interrupt().await }.in_current_span());
            }
            Err(_) => warn!(target: "turn_taking", "no runtime to stop speech on barge-in"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Joining,
    Joined,
    Closing,
    Closed,
}

/// Outward notifications, one broadcast channel per agent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentNotice {
    Lifecycle {
        agent_id: String,
        phase: AgentPhase,
        issued_at: SystemTime,
    },
    TurnStarted {
        participant: Option<Participant>,
    },
    TurnEnded {
        participant: Option<Participant>,
        eager: bool,
    },
    ReplyDispatched {
        turn_id: Option<u64>,
        text: String,
    },
    VideoRouting {
        processors: Option<String>,
        model: Option<String>,
    },
}

impl AgentNotice {
    pub fn lifecycle<S: Into<String>>(agent_id: S, phase: AgentPhase) -> Self {
        AgentNotice::Lifecycle {
            agent_id: agent_id.into(),
            phase,
            issued_at: SystemTime::now(),
        }
    }
}
