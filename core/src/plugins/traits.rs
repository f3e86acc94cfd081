use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::LlmResponse;
use crate::audio::PcmData;
use crate::edge::{Conversation, OutputAudioTrack, Participant, VideoTrack};
use crate::events::EventSender;
use crate::video::VideoForwarder;
use crate::warmup::WarmupTarget;

/// Lifecycle shared by every provider the agent drives.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Hands over the sender used to report provider events.
    fn attach(&self, _events: EventSender) {}

    /// Components holding an expensive shared resource expose it here.
    fn warmup_target(&self) -> Option<&dyn WarmupTarget> {
        None
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Text model. Streams `LlmResponseChunk` events while generating.
#[async_trait]
pub trait Llm: Component {
    async fn simple_response(
        &self,
        text: &str,
        participant: Option<&Participant>,
    ) -> Result<LlmResponse>;

    fn as_audio(self: Arc<Self>) -> Option<Arc<dyn AudioLlm>> {
        None
    }

    fn as_video(self: Arc<Self>) -> Option<Arc<dyn VideoLlm>> {
        None
    }

    fn as_realtime(self: Arc<Self>) -> Option<Arc<dyn RealtimeLlm>> {
        None
    }
}

/// Model that listens to raw audio and answers through `RealtimeAudio` events.
#[async_trait]
pub trait AudioLlm: Send + Sync {
    async fn simple_audio_response(
        &self,
        pcm: &PcmData,
        participant: Option<&Participant>,
    ) -> Result<()>;
}

#[async_trait]
pub trait VideoLlm: Send + Sync {
    async fn watch_video_track(
        &self,
        forwarder: Arc<VideoForwarder>,
        participant: Option<Participant>,
    ) -> Result<()>;

    async fn stop_watching_video_track(&self) -> Result<()>;
}

/// Model behind a persistent session that must be connected before use.
#[async_trait]
pub trait RealtimeLlm: Send + Sync {
    async fn connect(&self) -> Result<()>;
}

/// Speech to text. Emits `SttPartial`, `SttTranscript` and `SttError`; a
/// recognizer with built-in turn detection also emits turn events.
#[async_trait]
pub trait SpeechRecognizer: Component {
    async fn process_audio(&self, pcm: &PcmData, participant: Option<&Participant>)
        -> Result<()>;

    /// Flushes any pending recognition so the final transcript is emitted.
    async fn clear(&self) -> Result<()>;

    fn provides_turn_detection(&self) -> bool {
        false
    }
}

/// Text to speech. Emits `TtsAudio` chunks for the outbound track.
#[async_trait]
pub trait SpeechSynthesizer: Component {
    async fn send(&self, text: &str, metadata: &HashMap<String, String>) -> Result<()>;

    /// Stops any synthesis in flight.
    async fn stop_audio(&self) -> Result<()>;
}

/// Emits `TurnStarted` and `TurnEnded` events.
#[async_trait]
pub trait TurnDetector: Component {
    async fn process_audio(
        &self,
        pcm: &PcmData,
        participant: Option<&Participant>,
        conversation: Option<Arc<dyn Conversation>>,
    ) -> Result<()>;
}

/// Audio or video processor. Each role is exposed through a view.
pub trait Processor: Component {
    fn as_audio_processor(self: Arc<Self>) -> Option<Arc<dyn AudioProcessor>> {
        None
    }

    fn as_video_processor(self: Arc<Self>) -> Option<Arc<dyn VideoProcessor>> {
        None
    }

    fn as_video_publisher(self: Arc<Self>) -> Option<Arc<dyn VideoPublisher>> {
        None
    }

    fn as_audio_publisher(self: Arc<Self>) -> Option<Arc<dyn AudioPublisher>> {
        None
    }
}

#[async_trait]
pub trait AudioProcessor: Component {
    async fn process_audio(&self, pcm: &PcmData) -> Result<()>;
}

#[async_trait]
pub trait VideoProcessor: Component {
    async fn process_video(
        &self,
        forwarder: Arc<VideoForwarder>,
        participant: Option<Participant>,
    ) -> Result<()>;

    async fn stop_processing(&self) -> Result<()>;
}

#[async_trait]
pub trait VideoPublisher: Component {
    async fn publish_video_track(&self) -> Result<Arc<dyn VideoTrack>>;
}

#[async_trait]
pub trait AudioPublisher: Component {
    /// Receives the agent's outbound track to write into.
    async fn publish_audio_track(&self, output: Arc<dyn OutputAudioTrack>) -> Result<()>;
}

#[async_trait]
pub trait ToolServer: Component {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Opens a local video file as a looping track. Blocking; the agent calls it
/// from the blocking pool.
pub trait VideoFileLoader: Send + Sync + 'static {
    fn open(&self, path: &Path) -> Result<Arc<dyn VideoTrack>>;
}
