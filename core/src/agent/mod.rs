//! One conversational agent attached to one call.
//!
//! An [`Agent`] is a cheap handle; clones share the same session. It joins a
//! call at most once and is closed exactly once, after which it cannot be
//! reused. Always close an agent that joined: the background tasks it starts
//! only stop on close or when the call ends.

mod config;
mod dispatch;
mod error;
mod ingest;
mod lifecycle;
mod tracks;

pub use config::{AgentConfig, ParticipantWait};
pub use error::{AgentError, ConfigError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Span};
use uuid::Uuid;

use crate::audio::AudioQueue;
use crate::edge::{
    AgentUser, CallRef, Connection, Conversation, ConversationMessage, EdgeTransport,
    MessageRole, OutputAudioTrack,
};
use crate::events::{self, AgentEvent, AgentNotice, EventReceiver, EventSender};
use crate::plugins::{
    Llm, ModelCapabilities, Processor, ProcessorSet, SpeechRecognizer, SpeechSynthesizer,
    ToolServer, TurnDetector, VideoFileLoader,
};
use crate::turn::{BargeIn, TranscriptStore, TurnTaker};
use crate::warmup::{WarmupCache, WarmupTarget};

use self::tracks::TrackRouter;

const NOTICE_CAPACITY: usize = 64;

/// Everything an agent is built from.
pub struct AgentParts {
    pub edge: Arc<dyn EdgeTransport>,
    pub llm: Arc<dyn Llm>,
    pub agent_user: AgentUser,
    pub instructions: String,
    pub stt: Option<Arc<dyn SpeechRecognizer>>,
    pub tts: Option<Arc<dyn SpeechSynthesizer>>,
    pub turn_detection: Option<Arc<dyn TurnDetector>>,
    pub processors: Vec<Arc<dyn Processor>>,
    pub tool_servers: Vec<Arc<dyn ToolServer>>,
    pub video_loader: Option<Arc<dyn VideoFileLoader>>,
    pub config: AgentConfig,
}

impl AgentParts {
    pub fn new(edge: Arc<dyn EdgeTransport>, llm: Arc<dyn Llm>) -> Self {
        Self {
            edge,
            llm,
            agent_user: AgentUser::generated(),
            instructions: String::new(),
            stt: None,
            tts: None,
            turn_detection: None,
            processors: Vec::new(),
            tool_servers: Vec::new(),
            video_loader: None,
            config: AgentConfig::default(),
        }
    }

    pub fn agent_user(mut self, user: AgentUser) -> Self {
        self.agent_user = user;
        self
    }

    pub fn instructions<S: Into<String>>(mut self, instructions: S) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn stt(mut self, stt: Arc<dyn SpeechRecognizer>) -> Self {
        self.stt = Some(stt);
        self
    }

    pub fn tts(mut self, tts: Arc<dyn SpeechSynthesizer>) -> Self {
        self.tts = Some(tts);
        self
    }

    pub fn turn_detection(mut self, detector: Arc<dyn TurnDetector>) -> Self {
        self.turn_detection = Some(detector);
        self
    }

    pub fn processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn tool_server(mut self, server: Arc<dyn ToolServer>) -> Self {
        self.tool_servers.push(server);
        self
    }

    pub fn video_loader(mut self, loader: Arc<dyn VideoFileLoader>) -> Self {
        self.video_loader = Some(loader);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

pub(crate) struct AgentInner {
    id: String,
    agent_user: AgentUser,
    instructions: String,
    config: AgentConfig,
    edge: Arc<dyn EdgeTransport>,
    llm: Arc<dyn Llm>,
    caps: ModelCapabilities,
    stt: Option<Arc<dyn SpeechRecognizer>>,
    tts: Option<Arc<dyn SpeechSynthesizer>>,
    turn_detection: Option<Arc<dyn TurnDetector>>,
    processors: ProcessorSet,
    tool_servers: Vec<Arc<dyn ToolServer>>,
    video_loader: Option<Arc<dyn VideoFileLoader>>,
    audio: Arc<AudioQueue>,
    transcripts: Arc<TranscriptStore>,
    events: EventSender,
    dispatch_rx: Mutex<Option<EventReceiver>>,
    notices: broadcast::Sender<AgentNotice>,
    barge_in: Arc<BargeIn>,
    turns: tokio::sync::Mutex<TurnTaker>,
    tracks: tokio::sync::Mutex<TrackRouter>,
    session: Mutex<SessionState>,
    join_lock: tokio::sync::Mutex<()>,
    /// Fires when the call ends or the agent starts closing.
    ended: CancellationToken,
    closed_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct SessionState {
    call: Option<CallRef>,
    joined_at: Option<Instant>,
    connection: Option<Arc<dyn Connection>>,
    conversation: Option<Arc<dyn Conversation>>,
    audio_track: Option<Arc<dyn OutputAudioTrack>>,
    span: Option<Span>,
    dispatcher: Option<JoinHandle<()>>,
    ingest: Option<JoinHandle<()>>,
    close_started: bool,
}

impl Agent {
    pub fn new(parts: AgentParts) -> Result<Self, ConfigError> {
        parts.config.validate()?;

        let caps = ModelCapabilities::resolve(&parts.llm);
        let processors = ProcessorSet::resolve(parts.processors);
        validate_components(
            &caps,
            parts.stt.is_some(),
            parts.tts.is_some(),
            parts.turn_detection.is_some(),
            &processors,
        )?;
        if parts.config.video_override_path.is_some() && parts.video_loader.is_none() {
            return Err(ConfigError::MissingVideoLoader);
        }

        // An audio model speaks for itself; a separate synthesizer is ignored.
        let synthesizer = if caps.consumes_audio() {
            None
        } else {
            parts.tts.clone()
        };

        let audio = Arc::new(AudioQueue::new(parts.config.audio_buffer_limit));
        let transcripts = Arc::new(TranscriptStore::new());
        let barge_in = Arc::new(BargeIn::new(
            parts.agent_user.clone(),
            synthesizer.clone(),
        ));
        let (sender, rx) = events::channel(
            audio.clone(),
            transcripts.clone(),
            Some(barge_in.clone()),
        );

        parts.edge.attach(sender.clone());
        parts.llm.attach(sender.clone());
        if let Some(stt) = &parts.stt {
            stt.attach(sender.clone());
        }
        if let Some(tts) = &parts.tts {
            tts.attach(sender.clone());
        }
        if let Some(detector) = &parts.turn_detection {
            detector.attach(sender.clone());
        }
        for processor in &processors.all {
            processor.attach(sender.clone());
        }
        for server in &parts.tool_servers {
            server.attach(sender.clone());
        }

        let turns = TurnTaker::new(
            parts.llm.clone(),
            synthesizer,
            sender.clone(),
            parts.config.eager_turn_min_confidence,
        );

        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let (closed_tx, _) = watch::channel(false);

        let inner = AgentInner {
            id: Uuid::new_v4().to_string(),
            agent_user: parts.agent_user,
            instructions: parts.instructions,
            config: parts.config,
            edge: parts.edge,
            llm: parts.llm,
            caps,
            stt: parts.stt,
            tts: parts.tts,
            turn_detection: parts.turn_detection,
            processors,
            tool_servers: parts.tool_servers,
            video_loader: parts.video_loader,
            audio,
            transcripts,
            events: sender,
            dispatch_rx: Mutex::new(Some(rx)),
            notices,
            barge_in,
            turns: tokio::sync::Mutex::new(turns),
            tracks: tokio::sync::Mutex::new(TrackRouter::default()),
            session: Mutex::new(SessionState::default()),
            join_lock: tokio::sync::Mutex::new(()),
            ended: CancellationToken::new(),
            closed_tx,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn agent_user(&self) -> &AgentUser {
        &self.inner.agent_user
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    pub fn capabilities(&self) -> &ModelCapabilities {
        &self.inner.caps
    }

    pub fn call(&self) -> Option<CallRef> {
        self.inner.session.lock().call.clone()
    }

    pub fn is_joined(&self) -> bool {
        self.inner.session.lock().joined_at.is_some()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed_tx.borrow()
    }

    /// Sender for providers created outside the agent.
    pub fn events(&self) -> EventSender {
        self.inner.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentNotice> {
        self.inner.notices.subscribe()
    }

    pub fn audio_buffer(&self) -> &AudioQueue {
        &self.inner.audio
    }

    /// Time the agent has been alone on the call; zero before joining.
    pub fn idle_for(&self) -> Duration {
        let (joined_at, connection) = {
            let state = self.inner.session.lock();
            (state.joined_at, state.connection.clone())
        };
        let (Some(joined_at), Some(connection)) = (joined_at, connection) else {
            return Duration::ZERO;
        };
        match connection.idle_since() {
            Some(since) => since.max(joined_at).elapsed(),
            None => Duration::ZERO,
        }
    }

    /// Time since the agent joined; zero before joining.
    pub fn on_call_for(&self) -> Duration {
        self.inner
            .session
            .lock()
            .joined_at
            .map(|joined_at| joined_at.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Speaks `text` directly, bypassing the model.
    pub async fn say(
        &self,
        text: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), AgentError> {
        let tts = self.inner.tts.as_ref().ok_or(AgentError::NoSynthesizer)?;
        let mut metadata = metadata;
        metadata
            .entry("user_id".to_string())
            .or_insert_with(|| self.inner.agent_user.id.clone());

        tts.send(text, &metadata)
            .await
            .map_err(AgentError::Synthesis)?;
        self.inner
            .sync_conversation(self.inner.assistant_message(None, text, true))
            .await;
        Ok(())
    }

    /// Prompts the model from code. The reply is spoken as soon as it arrives.
    pub async fn simple_response(&self, text: &str) -> Result<(), AgentError> {
        let response = self
            .inner
            .llm
            .simple_response(text, None)
            .await
            .map_err(AgentError::Model)?;
        self.inner.events.send(AgentEvent::ReplyReady {
            turn_id: None,
            response,
        });
        Ok(())
    }

    /// Loads shared resources through `cache`, once per provider type.
    /// Different types load concurrently.
    pub async fn warmup(&self, cache: &WarmupCache) -> anyhow::Result<()> {
        let targets = self.inner.warmup_targets();
        try_join_all(targets.into_iter().map(|target| cache.warmup(target))).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.inner.id)
            .field("agent_user", &self.inner.agent_user.id)
            .field("caps", &self.inner.caps)
            .finish()
    }
}

impl AgentInner {
    fn notify(&self, notice: AgentNotice) {
        // No subscribers is the common case.
        let _ = self.notices.send(notice);
    }

    fn warmup_targets(&self) -> Vec<&dyn WarmupTarget> {
        let mut targets = Vec::new();
        targets.extend(self.llm.warmup_target());
        if let Some(stt) = &self.stt {
            targets.extend(stt.warmup_target());
        }
        if let Some(tts) = &self.tts {
            targets.extend(tts.warmup_target());
        }
        if let Some(detector) = &self.turn_detection {
            targets.extend(detector.warmup_target());
        }
        for processor in &self.processors.all {
            targets.extend(processor.warmup_target());
        }
        targets
    }

    fn output_track(&self) -> Option<Arc<dyn OutputAudioTrack>> {
        self.session.lock().audio_track.clone()
    }

    fn user_message(
        &self,
        participant: Option<&crate::edge::Participant>,
        text: &str,
    ) -> ConversationMessage {
        ConversationMessage {
            message_id: None,
            role: MessageRole::User,
            user_id: participant
                .map(|participant| participant.user_id.clone())
                .unwrap_or_default(),
            content: text.to_string(),
            completed: true,
            replace: true,
        }
    }

    fn assistant_message(
        &self,
        message_id: Option<String>,
        text: &str,
        completed: bool,
    ) -> ConversationMessage {
        ConversationMessage {
            message_id,
            role: MessageRole::Assistant,
            user_id: self.agent_user.id.clone(),
            content: text.to_string(),
            completed,
            replace: completed,
        }
    }

    async fn sync_conversation(&self, message: ConversationMessage) {
        let conversation = self.session.lock().conversation.clone();
        let Some(conversation) = conversation else {
            debug!(target: "agent", "no conversation yet, message not synced");
            return;
        };
        if let Err(err) = conversation.upsert_message(message).await {
            warn!(target: "agent", %err, "failed to sync conversation");
        }
    }
}

fn validate_components(
    caps: &ModelCapabilities,
    has_stt: bool,
    has_tts: bool,
    has_turn_detection: bool,
    processors: &ProcessorSet,
) -> Result<(), ConfigError> {
    if caps.consumes_audio() {
        if has_stt || has_tts {
            warn!(
                target: "agent",
                "audio model configured; separate speech recognition and synthesis are ignored"
            );
        }
        if has_turn_detection {
            warn!(
                target: "agent",
                "audio model configured; turn detection is only used for barge-in"
            );
        }
        return Ok(());
    }

    let has_audio = has_stt || has_tts || has_turn_detection;
    let has_video = !processors.video.is_empty() || caps.video.is_some();
    if !has_audio && !has_video {
        return Err(ConfigError::NoProcessingCapability);
    }
    Ok(())
}
