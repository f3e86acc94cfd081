use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

use crate::edge::Participant;
use crate::events::{AgentEvent, EventSender};
use crate::plugins::{Llm, LlmResponse, SpeechSynthesizer};
use crate::telemetry::events::{
    record_eager_turn_confirmed, record_turn_cancelled, record_turn_dispatched,
};

/// A user utterance waiting for, or holding, its model reply.
#[derive(Debug)]
pub struct Turn {
    pub id: u64,
    pub text: String,
    pub participant: Option<Participant>,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
    pub response: Option<LlmResponse>,
    /// `false` while the turn only ended speculatively.
    pub turn_finished: bool,
    /// Started from an eager ending.
    pub speculative: bool,
    task: Option<JoinHandle<()>>,
}

impl Turn {
    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A model request went out for a new turn.
    Requested(u64),
    /// The text matched the pending turn; no new request.
    Confirmed(u64),
    /// The confirmation released a reply that was already waiting.
    Spoken { turn_id: u64, response: LlmResponse },
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Handed to speech synthesis.
    Spoken(LlmResponse),
    /// Attached to a turn that has not been confirmed yet.
    Held,
    /// The reply belongs to a superseded turn.
    Dropped,
}

/// Decides when model replies are requested and when they are spoken.
///
/// At most one turn is pending. A turn-ended signal with new text cancels the
/// pending reply request and starts another one. An eager ending may start
/// the request early; the reply is held until a final ending with the same
/// text confirms it.
pub struct TurnTaker {
    llm: Arc<dyn Llm>,
    tts: Option<Arc<dyn SpeechSynthesizer>>,
    events: EventSender,
    eager_min_confidence: f32,
    pending: Option<Turn>,
    next_id: u64,
}

impl TurnTaker {
    pub fn new(
        llm: Arc<dyn Llm>,
        tts: Option<Arc<dyn SpeechSynthesizer>>,
        events: EventSender,
        eager_min_confidence: f32,
    ) -> Self {
        Self {
            llm,
            tts,
            events,
            eager_min_confidence,
            pending: None,
            next_id: 1,
        }
    }

    pub fn pending(&self) -> Option<&Turn> {
        self.pending.as_ref()
    }

    /// Whether a reply request is still running.
    pub fn has_active_request(&self) -> bool {
        self.pending
            .as_ref()
            .and_then(|turn| turn.task.as_ref())
            .is_some_and(|task| !task.is_finished())
    }

    pub async fn on_turn_ended(
        &mut self,
        participant: Option<Participant>,
        text: &str,
        confidence: f32,
        eager: bool,
    ) -> TurnOutcome {
        let text = text.trim();
        if text.is_empty() {
            debug!(target: "turn_taking", eager, "turn ended without transcript");
            return TurnOutcome::Ignored;
        }
        if eager && confidence < self.eager_min_confidence {
            debug!(target: "turn_taking", confidence, "eager turn end below confidence floor");
            return TurnOutcome::Ignored;
        }

        if let Some(turn) = self.pending.as_mut() {
            if turn.text == text {
                let id = turn.id;
                if eager || turn.turn_finished {
                    return TurnOutcome::Confirmed(id);
                }

                let now = Instant::now();
                turn.turn_finished = true;
                turn.finished_at = Some(now);
                let reply_ready = turn.response.is_some();
                if turn.speculative {
                    record_eager_turn_confirmed(id, reply_ready, now - turn.started_at);
                }
                if reply_ready {
                    if let Some(response) = self.finish_turn().await {
                        return TurnOutcome::Spoken {
                            turn_id: id,
                            response,
                        };
                    }
                }
                return TurnOutcome::Confirmed(id);
            }
        }

        self.cancel_pending("superseded");

        let id = self.next_id;
        self.next_id += 1;
        let started_at = Instant::now();
        let task = self.request_reply(id, text.to_string(), participant.clone());
        self.pending = Some(Turn {
            id,
            text: text.to_string(),
            participant,
            started_at,
            finished_at: (!eager).then_some(started_at),
            response: None,
            turn_finished: !eager,
            speculative: eager,
            task: Some(task),
        });
        debug!(target: "turn_taking", turn_id = id, eager, "requested model reply");
        TurnOutcome::Requested(id)
    }

    /// Handles a finished model reply. Replies without a turn come from
    /// prompts issued in code and are spoken right away.
    pub async fn on_reply(&mut self, turn_id: Option<u64>, response: LlmResponse) -> ReplyOutcome {
        let Some(turn_id) = turn_id else {
            self.speak(&response.text).await;
            return ReplyOutcome::Spoken(response);
        };

        match self.pending.as_mut() {
            Some(turn) if turn.id == turn_id => {
                turn.response = Some(response);
                turn.task = None;
                if !turn.turn_finished {
                    return ReplyOutcome::Held;
                }
                match self.finish_turn().await {
                    Some(response) => ReplyOutcome::Spoken(response),
                    None => ReplyOutcome::Dropped,
                }
            }
            _ => {
                debug!(target: "turn_taking", turn_id, "dropping reply for superseded turn");
                ReplyOutcome::Dropped
            }
        }
    }

    /// Drops the pending turn when its model request failed, so the same
    /// utterance can be asked again. Returns whether a turn was cleared.
    pub fn on_reply_failed(&mut self, turn_id: u64) -> bool {
        if !self.pending.as_ref().is_some_and(|turn| turn.id == turn_id) {
            return false;
        }
        self.cancel_pending("model_error");
        true
    }

    /// Cancels any pending request. Used on teardown.
    pub fn shutdown(&mut self) {
        self.cancel_pending("shutdown");
    }

    fn cancel_pending(&mut self, reason: &'static str) {
        if let Some(mut turn) = self.pending.take() {
            if turn.response.is_none() {
                record_turn_cancelled(turn.id, reason, turn.started_at.elapsed());
            }
            turn.cancel();
        }
    }

    async fn finish_turn(&mut self) -> Option<LlmResponse> {
        let turn = self.pending.take()?;
        let response = turn.response?;
        record_turn_dispatched(
            turn.id,
            turn.speculative,
            turn.started_at.elapsed(),
            response.text.len(),
        );
        self.speak(&response.text).await;
        Some(response)
    }

    async fn speak(&self, text: &str) {
        let Some(tts) = &self.tts else {
            return;
        };
        let text = sanitize(text);
        if text.is_empty() {
            return;
        }
        if let Err(err) = tts.send(&text, &HashMap::new()).await {
            warn!(target: "turn_taking", %err, "failed to synthesize reply");
        }
    }

    fn request_reply(
        &self,
        turn_id: u64,
        text: String,
        participant: Option<Participant>,
    ) -> JoinHandle<()> {
        let llm = Arc::clone(&self.llm);
        let events = self.events.clone();
        tokio::spawn(
            async move {
                match llm.simple_response(&text, participant.as_ref()).await {
                    Ok(response) => events.send(AgentEvent::ReplyReady {
                        turn_id: Some(turn_id),
                        response,
                    }),
                    Err(err) => {
                        warn!(target: "turn_taking", turn_id, %err, "model request failed");
                        events.send(AgentEvent::ReplyFailed { turn_id });
                    }
                }
            }
            .in_current_span(),
        )
    }
}

/// Strips markdown emphasis and heading marks that would be read aloud.
pub fn sanitize(text: &str) -> String {
    text.replace(['*', '#'], "").trim().to_string()
}
