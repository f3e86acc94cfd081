use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::audio::AudioQueue;
use crate::edge::{AgentUser, Participant};
use crate::events::{self, AgentEvent, EventReceiver};
use crate::plugins::LlmResponse;
use crate::testing::{settle, HookLog, MockAudioTrack, MockLlm, MockTts};

struct Harness {
    machine: TurnTaker,
    rx: EventReceiver,
    llm: Arc<MockLlm>,
    tts: Arc<MockTts>,
}

fn harness(llm: MockLlm) -> Harness {
    let llm = Arc::new(llm);
    let tts = Arc::new(MockTts::new(HookLog::default()));
    let (sender, rx) = events::channel(
        Arc::new(AudioQueue::new(Duration::from_secs(8))),
        Arc::new(TranscriptStore::new()),
        None,
    );
    let machine = TurnTaker::new(llm.clone(), Some(tts.clone()), sender, 0.0);
    Harness {
        machine,
        rx,
        llm,
        tts,
    }
}

impl Harness {
    /// Feeds every reply that has arrived so far back into the machine.
    async fn pump(&mut self) -> Vec<ReplyOutcome> {
        settle().await;
        let mut outcomes = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            match event {
                AgentEvent::ReplyReady { turn_id, response } => {
                    outcomes.push(self.machine.on_reply(turn_id, response).await);
                }
                AgentEvent::ReplyFailed { turn_id } => {
                    self.machine.on_reply_failed(turn_id);
                }
                _ => {}
            }
        }
        outcomes
    }
}

fn alice() -> Option<Participant> {
    Some(Participant::new("alice"))
}

#[tokio::test]
async fn eager_then_matching_final_requests_once() {
    let mut h = harness(MockLlm::new(HookLog::default()).reply_with("hi!"));

    let eager = h.machine.on_turn_ended(alice(), "hello", 0.9, true).await;
    assert!(matches!(eager, TurnOutcome::Requested(1)));

    let outcomes = h.pump().await;
    assert!(matches!(outcomes.as_slice(), [ReplyOutcome::Held]));
    assert!(h.tts.texts().is_empty());

    let confirmed = h.machine.on_turn_ended(alice(), "hello", 0.9, false).await;
    assert!(matches!(confirmed, TurnOutcome::Spoken { turn_id: 1, .. }));
    assert_eq!(h.llm.prompts(), vec!["hello".to_string()]);
    assert_eq!(h.tts.texts(), vec!["hi!".to_string()]);
    assert!(h.machine.pending().is_none());
}

#[tokio::test]
async fn reply_after_confirmation_is_spoken_on_arrival() {
    let mut h = harness(MockLlm::new(HookLog::default()).gated());

    h.machine.on_turn_ended(alice(), "hello", 1.0, true).await;
    h.machine.on_turn_ended(alice(), "hello", 1.0, false).await;
    assert!(h.pump().await.is_empty());
    assert!(h.machine.pending().is_some_and(|turn| turn.turn_finished));

    h.llm.release(1);
    let outcomes = h.pump().await;
    assert!(matches!(outcomes.as_slice(), [ReplyOutcome::Spoken(_)]));
    assert_eq!(h.tts.texts(), vec!["reply to hello".to_string()]);
    assert_eq!(h.llm.prompts().len(), 1);
}

#[tokio::test]
async fn eager_then_different_final_supersedes() {
    let mut h = harness(MockLlm::new(HookLog::default()).gated());

    h.machine.on_turn_ended(alice(), "hello", 1.0, true).await;
    settle().await;
    assert_eq!(h.llm.active(), 1);

    let outcome = h.machine.on_turn_ended(alice(), "hello there", 1.0, false).await;
    assert_eq!(outcome, TurnOutcome::Requested(2));
    settle().await;
    assert_eq!(h.llm.active(), 1);
    assert_eq!(h.llm.prompts(), vec!["hello".to_string(), "hello there".to_string()]);

    h.llm.release(2);
    h.pump().await;
    assert_eq!(h.tts.texts(), vec!["reply to hello there".to_string()]);
}

#[tokio::test]
async fn at_most_one_reply_request_in_flight() {
    let mut h = harness(MockLlm::new(HookLog::default()).gated());

    for text in ["one", "one two", "one two three"] {
        h.machine.on_turn_ended(alice(), text, 1.0, true).await;
        settle().await;
        assert_eq!(h.llm.active(), 1);
        assert!(h.machine.has_active_request());
    }
    assert_eq!(h.machine.pending().map(|turn| turn.id), Some(3));
}

#[tokio::test]
async fn stale_reply_is_dropped() {
    let mut h = harness(MockLlm::new(HookLog::default()));

    h.machine.on_turn_ended(alice(), "hello there", 1.0, false).await;
    let stale = h
        .machine
        .on_reply(Some(99), LlmResponse::new("old", "too late"))
        .await;
    assert_eq!(stale, ReplyOutcome::Dropped);

    h.pump().await;
    assert_eq!(h.tts.texts(), vec!["reply to hello there".to_string()]);
}

#[tokio::test]
async fn duplicate_eager_does_not_request_again() {
    let mut h = harness(MockLlm::new(HookLog::default()).gated());

    h.machine.on_turn_ended(alice(), "hello", 1.0, true).await;
    let again = h.machine.on_turn_ended(alice(), "hello", 1.0, true).await;
    assert_eq!(again, TurnOutcome::Confirmed(1));
    settle().await;
    assert_eq!(h.llm.prompts().len(), 1);
    assert!(!h.machine.pending().unwrap().turn_finished);
}

#[tokio::test]
async fn blank_and_low_confidence_endings_are_ignored() {
    let mut h = harness(MockLlm::new(HookLog::default()));
    assert_eq!(
        h.machine.on_turn_ended(alice(), "   ", 1.0, false).await,
        TurnOutcome::Ignored
    );

    let llm = Arc::new(MockLlm::new(HookLog::default()));
    let (sender, _rx) = events::channel(
        Arc::new(AudioQueue::new(Duration::from_secs(1))),
        Arc::new(TranscriptStore::new()),
        None,
    );
    let mut strict = TurnTaker::new(llm.clone(), None, sender, 0.5);
    assert_eq!(
        strict.on_turn_ended(alice(), "hello", 0.2, true).await,
        TurnOutcome::Ignored
    );
    assert!(matches!(
        strict.on_turn_ended(alice(), "hello", 0.2, false).await,
        TurnOutcome::Requested(_)
    ));
    settle().await;
    assert_eq!(llm.prompts().len(), 1);
}

#[tokio::test]
async fn barge_in_silences_output() {
    let tts = Arc::new(MockTts::new(HookLog::default()));
    let output = Arc::new(MockAudioTrack::default());
    let agent = AgentUser::new("agent-1");
    let barge_in = BargeIn::new(agent.clone(), Some(tts.clone()));
    barge_in.set_output_track(output.clone());

    assert!(barge_in.applies(alice().as_ref()));
    barge_in.interrupt().await;
    assert_eq!(tts.stops.load(Ordering::SeqCst), 1);
    assert_eq!(output.flushes.load(Ordering::SeqCst), 1);

    let own = Participant::new(agent.id.clone());
    assert!(!barge_in.applies(Some(&own)));
}

#[tokio::test]
async fn failed_request_frees_the_turn_for_a_retry() {
    let mut h = harness(MockLlm::new(HookLog::default()).failing(1));

    h.machine.on_turn_ended(alice(), "hello", 1.0, false).await;
    h.pump().await;
    assert!(h.machine.pending().is_none());
    assert!(h.tts.texts().is_empty());

    let again = h.machine.on_turn_ended(alice(), "hello", 1.0, false).await;
    assert_eq!(again, TurnOutcome::Requested(2));
    h.pump().await;
    assert_eq!(h.llm.prompts().len(), 2);
    assert_eq!(h.tts.texts(), vec!["reply to hello".to_string()]);
}

#[tokio::test]
async fn failure_of_a_superseded_request_is_ignored() {
    let mut h = harness(MockLlm::new(HookLog::default()).gated());

    h.machine.on_turn_ended(alice(), "hello", 1.0, true).await;
    h.machine.on_turn_ended(alice(), "hello there", 1.0, false).await;
    assert!(!h.machine.on_reply_failed(1));
    assert_eq!(h.machine.pending().map(|turn| turn.id), Some(2));
}

#[tokio::test]
async fn code_initiated_reply_is_sanitized_and_spoken() {
    let mut h = harness(MockLlm::new(HookLog::default()));

    let outcome = h
        .machine
        .on_reply(None, LlmResponse::new("x", "**Hello** # there"))
        .await;
    assert!(matches!(outcome, ReplyOutcome::Spoken(_)));
    assert_eq!(h.tts.texts(), vec!["Hello  there".to_string()]);
}

#[tokio::test]
async fn shutdown_cancels_pending_request() {
    let mut h = harness(MockLlm::new(HookLog::default()).gated());

    h.machine.on_turn_ended(alice(), "hello", 1.0, false).await;
    settle().await;
    assert_eq!(h.llm.active(), 1);

    h.machine.shutdown();
    settle().await;
    assert_eq!(h.llm.active(), 0);
    assert!(h.machine.pending().is_none());
}

#[test]
fn sanitize_strips_markdown_marks() {
    assert_eq!(sanitize("## Title\n*bold*"), "Title\nbold");
    assert_eq!(sanitize("  ***  "), "");
}
