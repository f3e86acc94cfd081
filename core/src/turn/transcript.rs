use std::collections::HashMap;

use parking_lot::Mutex;

use crate::edge::Participant;

/// Fragments recognised for one speaker's current utterance.
///
/// Partial results revise the segment in progress; a final result commits
/// it and the next fragment opens a new segment.
#[derive(Debug, Default, Clone)]
pub struct TranscriptBuffer {
    committed: Vec<String>,
    in_progress: Option<String>,
}

impl TranscriptBuffer {
    pub fn push_partial(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.in_progress = Some(text.to_string());
    }

    pub fn push_final(&mut self, text: &str) {
        self.in_progress = None;
        let text = text.trim();
        if !text.is_empty() {
            self.committed.push(text.to_string());
        }
    }

    pub fn text(&self) -> String {
        let mut parts: Vec<&str> = self.committed.iter().map(String::as_str).collect();
        if let Some(partial) = &self.in_progress {
            parts.push(partial);
        }
        parts.join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.in_progress.is_none()
    }

    pub fn reset(&mut self) {
        self.committed.clear();
        self.in_progress = None;
    }
}

/// Per-speaker transcript buffers for one agent.
#[derive(Debug, Default)]
pub struct TranscriptStore {
    buffers: Mutex<HashMap<String, TranscriptBuffer>>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_partial(&self, participant: Option<&Participant>, text: &str) {
        self.buffers
            .lock()
            .entry(speaker_key(participant))
            .or_default()
            .push_partial(text);
    }

    pub fn push_final(&self, participant: Option<&Participant>, text: &str) {
        self.buffers
            .lock()
            .entry(speaker_key(participant))
            .or_default()
            .push_final(text);
    }

    /// Current utterance without resetting it.
    pub fn peek(&self, participant: Option<&Participant>) -> String {
        self.buffers
            .lock()
            .get(&speaker_key(participant))
            .map(TranscriptBuffer::text)
            .unwrap_or_default()
    }

    /// Current utterance, resetting the speaker's buffer.
    pub fn take(&self, participant: Option<&Participant>) -> String {
        self.buffers
            .lock()
            .remove(&speaker_key(participant))
            .map(|buffer| buffer.text())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.buffers.lock().clear();
    }
}

fn speaker_key(participant: Option<&Participant>) -> String {
    participant
        .map(|participant| participant.user_id.clone())
        .unwrap_or_default()
}
