//! PCM frames and the bounded incoming-audio buffer.

mod queue;

pub use queue::AudioQueue;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::edge::Participant;

/// One chunk of interleaved signed 16-bit PCM.
#[derive(Debug, Clone)]
pub struct PcmData {
    pub samples: Arc<[i16]>,
    pub sample_rate: u32,
    pub channels: u16,
    pub participant: Option<Participant>,
    pub received_at: Instant,
}

impl PcmData {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels: channels.max(1),
            participant: None,
            received_at: Instant::now(),
        }
    }

    pub fn with_participant(mut self, participant: Participant) -> Self {
        self.participant = Some(participant);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        frames_to_duration(self.frame_count(), self.sample_rate)
    }

    /// Splits after `duration`, rounded down to a whole frame.
    pub(crate) fn split_at(&self, duration: Duration) -> (PcmData, PcmData) {
        let frames = duration_to_frames(duration, self.sample_rate).min(self.frame_count());
        let offset = frames * self.channels as usize;
        let head = self.slice(0, offset);
        let mut tail = self.slice(offset, self.samples.len());
        tail.received_at = self.received_at + frames_to_duration(frames, self.sample_rate);
        (head, tail)
    }

    fn slice(&self, start: usize, end: usize) -> PcmData {
        PcmData {
            samples: self.samples[start..end].into(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            participant: self.participant.clone(),
            received_at: self.received_at,
        }
    }

    /// Joins consecutive chunks that share format and speaker.
    pub(crate) fn concat(parts: Vec<PcmData>) -> Option<PcmData> {
        let mut iter = parts.into_iter();
        let first = iter.next()?;
        let rest: Vec<PcmData> = iter.collect();
        if rest.is_empty() {
            return Some(first);
        }

        let mut samples: Vec<i16> = first.samples.to_vec();
        for part in &rest {
            samples.extend_from_slice(&part.samples);
        }

        Some(PcmData {
            samples: samples.into(),
            sample_rate: first.sample_rate,
            channels: first.channels,
            participant: first.participant,
            received_at: first.received_at,
        })
    }
}

pub(crate) fn frames_to_duration(frames: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((frames as u64).saturating_mul(1_000_000_000) / sample_rate as u64)
}

pub(crate) fn duration_to_frames(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_nanos() * sample_rate as u128 / 1_000_000_000) as usize
}
