use std::path::PathBuf;
use std::time::Duration;

use super::error::ConfigError;

/// How long `join` waits for someone else to show up on the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantWait {
    Skip,
    Timeout(Duration),
    Forever,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub audio_buffer_limit: Duration,
    pub ingest_interval: Duration,
    /// Longest the ingestion loop waits for audio in one cycle.
    pub drain_timeout: Duration,
    /// Pause after flushing the recognizer before a final transcript is read.
    pub stt_settle_delay: Duration,
    pub participant_wait: ParticipantWait,
    pub video_buffer_frames: usize,
    pub video_max_fps: u32,
    /// Eager turn endings below this confidence are ignored.
    pub eager_turn_min_confidence: f32,
    pub output_sample_rate: u32,
    pub output_channels: u16,
    /// Local file that replaces every incoming video track.
    pub video_override_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            audio_buffer_limit: Duration::from_secs(8),
            ingest_interval: Duration::from_millis(20),
            drain_timeout: Duration::from_secs(1),
            stt_settle_delay: Duration::from_millis(20),
            participant_wait: ParticipantWait::Timeout(Duration::from_secs(10)),
            video_buffer_frames: 30,
            video_max_fps: 30,
            eager_turn_min_confidence: 0.0,
            output_sample_rate: 48_000,
            output_channels: 2,
            video_override_path: None,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("audio_buffer_limit", self.audio_buffer_limit),
            ("ingest_interval", self.ingest_interval),
            ("drain_timeout", self.drain_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        if self.ingest_interval > self.audio_buffer_limit {
            return Err(ConfigError::IntervalExceedsBuffer {
                interval: self.ingest_interval,
                limit: self.audio_buffer_limit,
            });
        }
        if self.video_buffer_frames == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "video_buffer_frames",
            });
        }
        if self.video_max_fps == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "video_max_fps",
            });
        }
        if self.output_sample_rate == 0 || self.output_channels == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "output_format",
            });
        }
        if !(0.0..=1.0).contains(&self.eager_turn_min_confidence) {
            return Err(ConfigError::InvalidConfidence(
                self.eager_turn_min_confidence,
            ));
        }
        Ok(())
    }
}
