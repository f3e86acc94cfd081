//! Provider contracts: model, speech, turn detection, processors and tools.

mod traits;

pub use traits::{
    AudioLlm, AudioProcessor, AudioPublisher, Component, Llm, Processor, RealtimeLlm,
    SpeechRecognizer, SpeechSynthesizer, ToolServer, TurnDetector, VideoFileLoader, VideoLlm,
    VideoProcessor, VideoPublisher,
};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A completed model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub item_id: String,
    pub text: String,
}

impl LlmResponse {
    pub fn new<I: Into<String>, T: Into<String>>(item_id: I, text: T) -> Self {
        Self {
            item_id: item_id.into(),
            text: text.into(),
        }
    }
}

/// Optional capabilities of the configured model, resolved once per agent.
#[derive(Clone, Default)]
pub struct ModelCapabilities {
    pub audio: Option<Arc<dyn AudioLlm>>,
    pub video: Option<Arc<dyn VideoLlm>>,
    pub realtime: Option<Arc<dyn RealtimeLlm>>,
}

impl ModelCapabilities {
    pub fn resolve(llm: &Arc<dyn Llm>) -> Self {
        Self {
            audio: Arc::clone(llm).as_audio(),
            video: Arc::clone(llm).as_video(),
            realtime: Arc::clone(llm).as_realtime(),
        }
    }

    /// The model consumes audio end to end, so speech recognition and turn
    /// detection are bypassed.
    pub fn consumes_audio(&self) -> bool {
        self.audio.is_some()
    }
}

impl std::fmt::Debug for ModelCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCapabilities")
            .field("audio", &self.audio.is_some())
            .field("video", &self.video.is_some())
            .field("realtime", &self.realtime.is_some())
            .finish()
    }
}

/// Processor views resolved once per agent.
#[derive(Clone, Default)]
pub(crate) struct ProcessorSet {
    pub all: Vec<Arc<dyn Processor>>,
    pub audio: Vec<Arc<dyn AudioProcessor>>,
    pub video: Vec<Arc<dyn VideoProcessor>>,
    pub video_publishers: Vec<Arc<dyn VideoPublisher>>,
    pub audio_publishers: Vec<Arc<dyn AudioPublisher>>,
}

impl ProcessorSet {
    pub fn resolve(processors: Vec<Arc<dyn Processor>>) -> Self {
        let mut set = ProcessorSet::default();
        for processor in &processors {
            if let Some(view) = Arc::clone(processor).as_audio_processor() {
                set.audio.push(view);
            }
            if let Some(view) = Arc::clone(processor).as_video_processor() {
                set.video.push(view);
            }
            if let Some(view) = Arc::clone(processor).as_video_publisher() {
                set.video_publishers.push(view);
            }
            if let Some(view) = Arc::clone(processor).as_audio_publisher() {
                set.audio_publishers.push(view);
            }
        }
        set.all = processors;
        set
    }
}
