use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn, Instrument};

use super::{Agent, AgentInner};
use crate::edge::Participant;
use crate::events::{AgentEvent, AgentNotice, EventReceiver};
use crate::plugins::LlmResponse;
use crate::turn::{ReplyOutcome, TurnOutcome};

impl AgentInner {
    /// Starts the single task that handles this agent's events in order.
    pub(super) fn spawn_dispatcher(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let rx = self.dispatch_rx.lock().take()?;
        let inner = Arc::downgrade(self);
        let ended = self.ended.clone();
        Some(tokio::spawn(
            async move {
                dispatch(inner, rx, ended).await;
                debug!(target: "agent", "event dispatcher stopped");
            }
            .in_current_span(),
        ))
    }

    async fn handle_event(self: &Arc<Self>, event: AgentEvent) {
        match event {
            AgentEvent::SttPartial { .. } => {}
            AgentEvent::SttTranscript { text, participant } => {
                self.sync_conversation(self.user_message(participant.as_ref(), &text))
                    .await;
                if self.transcript_ends_turn() {
                    self.end_turn(participant, 1.0, false, false).await;
                }
            }
            AgentEvent::SttError { message } => {
                warn!(target: "agent", %message, "speech recognition error");
            }
            // Barge-in already ran when the event was sent.
            AgentEvent::TurnStarted {
                participant,
                confidence,
            } => {
                debug!(target: "turn_taking", confidence, "turn started");
                self.notify(AgentNotice::TurnStarted { participant });
            }
            AgentEvent::TurnEnded {
                participant,
                confidence,
                eager,
            } => {
                if self.caps.consumes_audio() {
                    debug!(target: "turn_taking", "audio model handles turns, ignoring turn end");
                    return;
                }
                self.end_turn(participant, confidence, eager, true).await;
            }
            AgentEvent::ReplyReady { turn_id, response } => {
                let outcome = self.turns.lock().await.on_reply(turn_id, response).await;
                if let ReplyOutcome::Spoken(response) = outcome {
                    self.reply_spoken(turn_id, response).await;
                }
            }
            AgentEvent::ReplyFailed { turn_id } => {
                if self.turns.lock().await.on_reply_failed(turn_id) {
                    debug!(target: "turn_taking", turn_id, "cleared turn after model failure");
                }
            }
            AgentEvent::LlmResponseChunk { item_id, delta } => {
                self.sync_conversation(self.assistant_message(Some(item_id), &delta, false))
                    .await;
            }
            AgentEvent::RealtimeAudio(data) | AgentEvent::TtsAudio(data) => {
                let Some(track) = self.output_track() else {
                    debug!(target: "agent", "no outbound audio track, dropping audio");
                    return;
                };
                if let Err(err) = track.write(data).await {
                    warn!(target: "agent", %err, "failed to write outbound audio");
                }
            }
            AgentEvent::RealtimeUserTranscription { text, participant } => {
                self.sync_conversation(self.user_message(participant.as_ref(), &text))
                    .await;
            }
            AgentEvent::RealtimeAgentTranscription { text } => {
                self.sync_conversation(self.assistant_message(None, &text, true))
                    .await;
            }
            AgentEvent::TrackAdded {
                track_id,
                kind,
                participant,
            } => {
                self.on_track_added(track_id, kind, participant).await;
            }
            AgentEvent::TrackRemoved { track_id, .. } => {
                self.on_track_removed(&track_id).await;
            }
            AgentEvent::AudioReceived(pcm) => self.audio.put(pcm),
            AgentEvent::CallEnded => {
                info!(target: "agent", "call ended");
                self.ended.cancel();
                let agent = Agent {
                    inner: Arc::clone(self),
                };
                tokio::spawn(async move { agent.close().await }.in_current_span());
            }
        }
    }

    /// Without turn detection, a complete transcript ends the turn.
    fn transcript_ends_turn(&self) -> bool {
        !self.caps.consumes_audio()
            && self.turn_detection.is_none()
            && !self
                .stt
                .as_ref()
                .is_some_and(|stt| stt.provides_turn_detection())
    }

    /// Reads the speaker's transcript and hands the turn end to the turn
    /// machine. A final ending first flushes the recognizer so its last
    /// words make it into the transcript.
    async fn end_turn(
        &self,
        participant: Option<Participant>,
        confidence: f32,
        eager: bool,
        flush_recognizer: bool,
    ) {
        if !eager && flush_recognizer {
            if let Some(stt) = &self.stt {
                if let Err(err) = stt.clear().await {
                    warn!(target: "turn_taking", %err, "failed to flush speech recognition");
                }
                sleep(self.config.stt_settle_delay).await;
            }
        }

        // An eager ending keeps the transcript for the confirmation.
        let text = if eager {
            self.transcripts.peek(participant.as_ref())
        } else {
            self.transcripts.take(participant.as_ref())
        };

        self.notify(AgentNotice::TurnEnded {
            participant: participant.clone(),
            eager,
        });
        let outcome = self
            .turns
            .lock()
            .await
            .on_turn_ended(participant, &text, confidence, eager)
            .await;
        debug!(target: "turn_taking", ?outcome, eager, "turn ended");
        if let TurnOutcome::Spoken { turn_id, response } = outcome {
            self.reply_spoken(Some(turn_id), response).await;
        }
    }

    async fn reply_spoken(&self, turn_id: Option<u64>, response: LlmResponse) {
        self.notify(AgentNotice::ReplyDispatched {
            turn_id,
            text: response.text.clone(),
        });
        self.sync_conversation(self.assistant_message(
            Some(response.item_id),
            &response.text,
            true,
        ))
        .await;
    }
}

async fn dispatch(
    inner: Weak<AgentInner>,
    mut rx: EventReceiver,
    ended: tokio_util::sync::CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = ended.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(event).await;
    }
}
