use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) const TARGET: &str = "telemetry::agent";
pub(crate) const EVENT_TURN_DISPATCHED: &str = "turn_dispatched";
pub(crate) const EVENT_EAGER_CONFIRMED: &str = "eager_turn_confirmed";
pub(crate) const EVENT_TURN_CANCELLED: &str = "turn_cancelled";
pub(crate) const EVENT_SESSION_STARTED: &str = "session_started";
pub(crate) const EVENT_SESSION_EVICTED: &str = "session_evicted";

#[derive(Debug, Serialize)]
pub struct TurnDispatchedEvent {
    pub turn_id: u64,
    pub speculative: bool,
    pub latency_ms: u64,
    pub chars: usize,
}

#[derive(Debug, Serialize)]
pub struct EagerTurnConfirmedEvent {
    pub turn_id: u64,
    pub reply_ready: bool,
    pub saved_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct TurnCancelledEvent {
    pub turn_id: u64,
    pub reason: &'static str,
    pub age_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionStartedEvent<'a> {
    pub session_id: &'a str,
    pub call_id: &'a str,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionEvictedEvent<'a> {
    pub session_id: &'a str,
    pub call_id: &'a str,
    pub reason: &'static str,
    pub idle_ms: u64,
    pub on_call_ms: u64,
}

/// Reply handed to speech synthesis. `latency` runs from the turn's start.
pub fn record_turn_dispatched(turn_id: u64, speculative: bool, latency: Duration, chars: usize) {
    let event = TurnDispatchedEvent {
        turn_id,
        speculative,
        latency_ms: duration_to_ms(latency),
        chars,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_TURN_DISPATCHED,
            turn_id = event.turn_id,
            speculative = event.speculative,
            latency_ms = event.latency_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_TURN_DISPATCHED,
            %err,
            "failed to encode turn dispatched event"
        ),
    }
}

/// A speculative turn was confirmed. `saved` is how far ahead of the
/// confirmation the model request went out.
pub fn record_eager_turn_confirmed(turn_id: u64, reply_ready: bool, saved: Duration) {
    let event = EagerTurnConfirmedEvent {
        turn_id,
        reply_ready,
        saved_ms: duration_to_ms(saved),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_EAGER_CONFIRMED,
            turn_id = event.turn_id,
            reply_ready = event.reply_ready,
            saved_ms = event.saved_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_EAGER_CONFIRMED,
            %err,
            "failed to encode eager turn event"
        ),
    }
}

pub fn record_turn_cancelled(turn_id: u64, reason: &'static str, age: Duration) {
    let event = TurnCancelledEvent {
        turn_id,
        reason,
        age_ms: duration_to_ms(age),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_TURN_CANCELLED,
            turn_id = event.turn_id,
            reason = event.reason,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_TURN_CANCELLED,
            %err,
            "failed to encode turn cancelled event"
        ),
    }
}

pub fn record_session_started(session_id: &str, call_id: &str, active_sessions: usize) {
    let event = SessionStartedEvent {
        session_id,
        call_id,
        active_sessions,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_SESSION_STARTED,
            session_id,
            call_id,
            active_sessions,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_SESSION_STARTED,
            %err,
            "failed to encode session started event"
        ),
    }
}

pub fn record_session_evicted(
    session_id: &str,
    call_id: &str,
    reason: &'static str,
    idle: Duration,
    on_call: Duration,
) {
    let event = SessionEvictedEvent {
        session_id,
        call_id,
        reason,
        idle_ms: duration_to_ms(idle),
        on_call_ms: duration_to_ms(on_call),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_SESSION_EVICTED,
            session_id,
            call_id,
            reason,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_SESSION_EVICTED,
            %err,
            "failed to encode session evicted event"
        ),
    }
}

pub(crate) fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_clamps_to_u64() {
        let duration = Duration::new(u64::MAX, 0);
        assert_eq!(duration_to_ms(duration), u64::MAX);
    }

    #[test]
    fn eviction_payload_is_flat_json() {
        let event = SessionEvictedEvent {
            session_id: "agent-1",
            call_id: "call-1",
            reason: "idle",
            idle_ms: 6_000,
            on_call_ms: 9_000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["reason"], "idle");
        assert_eq!(json["idle_ms"], 6_000);
    }
}
