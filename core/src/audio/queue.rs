use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::PcmData;

/// Duration-capped FIFO of incoming PCM.
///
/// Producers never wait: when a write would push the buffered duration past
/// the limit, the oldest audio is dropped first.
pub struct AudioQueue {
    limit: Duration,
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Default)]
struct QueueState {
    frames: VecDeque<PcmData>,
    buffered: Duration,
    dropped: Duration,
}

impl AudioQueue {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Audio without a sample rate or channel count has no duration to
    /// count against the limit, so it is dropped.
    pub fn put(&self, pcm: PcmData) {
        if pcm.is_empty() {
            return;
        }
        if pcm.sample_rate == 0 || pcm.channels == 0 {
            warn!(
                target: "audio_ingest",
                sample_rate = pcm.sample_rate,
                channels = pcm.channels,
                samples = pcm.samples.len(),
                "dropping audio without a valid format"
            );
            return;
        }
        if pcm.duration().is_zero() {
            return;
        }

        let mut pcm = pcm;
        let mut state = self.state.lock();

        let incoming = pcm.duration();
        if incoming > self.limit {
            let (head, tail) = pcm.split_at(incoming - self.limit);
            state.dropped += head.duration();
            pcm = tail;
        }

        let incoming = pcm.duration();
        while state.buffered + incoming > self.limit {
            let overflow = state.buffered + incoming - self.limit;
            let Some(oldest) = state.frames.pop_front() else {
                break;
            };
            let oldest_duration = oldest.duration();
            if oldest_duration > overflow {
                let (head, tail) = oldest.split_at(overflow);
                let removed = head.duration();
                state.buffered = state.buffered.saturating_sub(removed);
                state.dropped += removed;
                if tail.is_empty() {
                    continue;
                }
                state.frames.push_front(tail);
                if removed.is_zero() {
                    // Rounding left less than one frame to trim.
                    break;
                }
            } else {
                state.buffered = state.buffered.saturating_sub(oldest_duration);
                state.dropped += oldest_duration;
            }
        }

        state.buffered += incoming;
        state.frames.push_back(pcm);
        drop(state);

        self.notify.notify_one();
    }

    /// Takes up to `duration` of audio from a single speaker, waiting until
    /// something is buffered.
    pub async fn get_duration(&self, duration: Duration) -> PcmData {
        loop {
            if let Some(pcm) = self.try_get_duration(duration) {
                return pcm;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_get_duration(&self, duration: Duration) -> Option<PcmData> {
        let mut state = self.state.lock();
        let mut taken: Vec<PcmData> = Vec::new();
        let mut collected = Duration::ZERO;

        while collected < duration {
            let Some(front) = state.frames.front() else {
                break;
            };
            if let Some(first) = taken.first() {
                if front.participant != first.participant
                    || front.sample_rate != first.sample_rate
                    || front.channels != first.channels
                {
                    break;
                }
            }

            let Some(frame) = state.frames.pop_front() else {
                break;
            };
            let remaining = duration - collected;
            let frame_duration = frame.duration();
            if frame_duration > remaining {
                let (head, tail) = frame.split_at(remaining);
                if head.is_empty() {
                    state.frames.push_front(tail);
                    break;
                }
                collected += head.duration();
                state.buffered = state.buffered.saturating_sub(head.duration());
                taken.push(head);
                if !tail.is_empty() {
                    state.frames.push_front(tail);
                }
                break;
            }

            collected += frame_duration;
            state.buffered = state.buffered.saturating_sub(frame_duration);
            taken.push(frame);
        }

        if state.frames.is_empty() {
            state.buffered = Duration::ZERO;
        }
        let leftover = !state.frames.is_empty();
        drop(state);

        if leftover {
            // Hand the permit on so the next reader does not wait.
            self.notify.notify_one();
        }

        PcmData::concat(taken)
    }

    pub fn buffered(&self) -> Duration {
        self.state.lock().buffered
    }

    /// Total audio discarded to respect the limit.
    pub fn dropped(&self) -> Duration {
        self.state.lock().dropped
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().frames.is_empty()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let cleared = state.buffered;
        state.frames.clear();
        state.buffered = Duration::ZERO;
        drop(state);
        debug!(target: "audio_ingest", ?cleared, "cleared incoming audio buffer");
    }
}
