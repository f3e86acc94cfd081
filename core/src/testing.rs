//! Hand-written providers shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

use crate::audio::PcmData;
use crate::edge::{
    AgentUser, CallRef, Connection, Conversation, ConversationMessage, EdgeTransport,
    OutputAudioTrack, Participant, VideoFrame, VideoTrack,
};
use crate::events::{AgentEvent, EventSender};
use crate::plugins::{
    AudioLlm, Component, Llm, LlmResponse, Processor, RealtimeLlm, SpeechRecognizer,
    SpeechSynthesizer, ToolServer, TurnDetector, VideoFileLoader, VideoLlm, VideoProcessor,
    VideoPublisher,
};
use crate::video::VideoForwarder;

/// Ordered record of lifecycle hooks across providers.
#[derive(Default, Clone)]
pub struct HookLog(Arc<Mutex<Vec<String>>>);

impl HookLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }
}

macro_rules! hooked_component {
    ($ty:ty, $label:literal) => {
        #[async_trait]
        impl Component for $ty {
            fn name(&self) -> &str {
                $label
            }

            fn attach(&self, events: EventSender) {
                *self.events.lock().unwrap() = Some(events);
            }

            async fn start(&self) -> Result<()> {
                self.hooks.push(concat!($label, ":start"));
                Ok(())
            }

            async fn stop(&self) -> Result<()> {
                self.hooks.push(concat!($label, ":stop"));
                Ok(())
            }

            async fn close(&self) -> Result<()> {
                self.hooks.push(concat!($label, ":close"));
                Ok(())
            }
        }
    };
}

pub fn frame(pts_ms: u64) -> VideoFrame {
    VideoFrame {
        width: 2,
        height: 2,
        pts: Duration::from_millis(pts_ms),
        data: Bytes::from_static(&[0, 0, 0, 0]),
    }
}

pub fn pcm(ms: u64, participant: &str) -> PcmData {
    PcmData::new(vec![1; (16 * ms) as usize], 16_000, 1)
        .with_participant(Participant::new(participant))
}

pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockLlm {
    pub hooks: HookLog,
    pub events: Mutex<Option<EventSender>>,
    pub prompts: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<String>>,
    gate: Option<Arc<Semaphore>>,
    active: Arc<AtomicUsize>,
    pub audio_chunks: AtomicUsize,
    pub watched: Mutex<Vec<String>>,
    pub stop_watching: AtomicUsize,
    pub connects: AtomicUsize,
    failures: AtomicUsize,
    video: bool,
    audio: bool,
}

impl MockLlm {
    pub fn new(hooks: HookLog) -> Self {
        Self {
            hooks,
            ..Default::default()
        }
    }

    /// Replies are held until [`MockLlm::release`] hands out permits.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn with_video(mut self) -> Self {
        self.video = true;
        self
    }

    pub fn with_audio(mut self) -> Self {
        self.audio = true;
        self
    }

    /// The first `count` requests fail.
    pub fn failing(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn reply_with(self, reply: &str) -> Self {
        self.replies.lock().unwrap().push_back(reply.to_string());
        self
    }

    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

hooked_component!(MockLlm, "llm");

#[async_trait]
impl Llm for MockLlm {
    async fn simple_response(
        &self,
        text: &str,
        _participant: Option<&Participant>,
    ) -> Result<LlmResponse> {
        let _active = ActiveGuard::enter(&self.active);
        let n = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(text.to_string());
            prompts.len()
        };
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("model unavailable"));
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("reply to {text}"));
        Ok(LlmResponse::new(format!("item-{n}"), reply))
    }

    fn as_audio(self: Arc<Self>) -> Option<Arc<dyn AudioLlm>> {
        if self.audio {
            Some(self)
        } else {
            None
        }
    }

    fn as_video(self: Arc<Self>) -> Option<Arc<dyn VideoLlm>> {
        if self.video {
            Some(self)
        } else {
            None
        }
    }

    fn as_realtime(self: Arc<Self>) -> Option<Arc<dyn RealtimeLlm>> {
        if self.audio {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl AudioLlm for MockLlm {
    async fn simple_audio_response(
        &self,
        _pcm: &PcmData,
        _participant: Option<&Participant>,
    ) -> Result<()> {
        self.audio_chunks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl VideoLlm for MockLlm {
    async fn watch_video_track(
        &self,
        forwarder: Arc<VideoForwarder>,
        _participant: Option<Participant>,
    ) -> Result<()> {
        self.watched
            .lock()
            .unwrap()
            .push(forwarder.track_id().to_string());
        Ok(())
    }

    async fn stop_watching_video_track(&self) -> Result<()> {
        self.stop_watching.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RealtimeLlm for MockLlm {
    async fn connect(&self) -> Result<()> {
        self.hooks.push("llm:connect");
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockStt {
    pub hooks: HookLog,
    pub events: Mutex<Option<EventSender>>,
    pub audio: Mutex<Vec<PcmData>>,
    pub clears: AtomicUsize,
    pub turn_detection: bool,
}

impl MockStt {
    pub fn new(hooks: HookLog) -> Self {
        Self {
            hooks,
            ..Default::default()
        }
    }

    pub fn chunks(&self) -> usize {
        self.audio.lock().unwrap().len()
    }
}

hooked_component!(MockStt, "stt");

#[async_trait]
impl SpeechRecognizer for MockStt {
    async fn process_audio(
        &self,
        pcm: &PcmData,
        _participant: Option<&Participant>,
    ) -> Result<()> {
        self.audio.lock().unwrap().push(pcm.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn provides_turn_detection(&self) -> bool {
        self.turn_detection
    }
}

#[derive(Default)]
pub struct MockTts {
    pub hooks: HookLog,
    pub events: Mutex<Option<EventSender>>,
    pub sent: Mutex<Vec<(String, HashMap<String, String>)>>,
    pub stops: AtomicUsize,
    send_delay: Option<Duration>,
}

impl MockTts {
    pub fn new(hooks: HookLog) -> Self {
        Self {
            hooks,
            ..Default::default()
        }
    }

    /// Each send takes `delay` after recording its text.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }
}

hooked_component!(MockTts, "tts");

#[async_trait]
impl SpeechSynthesizer for MockTts {
    async fn send(&self, text: &str, metadata: &HashMap<String, String>) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((text.to_string(), metadata.clone()));
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn stop_audio(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTurnDetector {
    pub hooks: HookLog,
    pub events: Mutex<Option<EventSender>>,
    pub chunks: AtomicUsize,
}

impl MockTurnDetector {
    pub fn new(hooks: HookLog) -> Self {
        Self {
            hooks,
            ..Default::default()
        }
    }
}

hooked_component!(MockTurnDetector, "turn");

#[async_trait]
impl TurnDetector for MockTurnDetector {
    async fn process_audio(
        &self,
        _pcm: &PcmData,
        _participant: Option<&Participant>,
        _conversation: Option<Arc<dyn Conversation>>,
    ) -> Result<()> {
        self.chunks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Video processor that also publishes an annotated track when built with
/// [`MockVideoProcessor::publishing`].
#[derive(Default)]
pub struct MockVideoProcessor {
    pub hooks: HookLog,
    pub events: Mutex<Option<EventSender>>,
    pub processing: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
    published: Option<Arc<MockVideoTrack>>,
}

impl MockVideoProcessor {
    pub fn new(hooks: HookLog) -> Self {
        Self {
            hooks,
            ..Default::default()
        }
    }

    pub fn publishing(mut self, track: Arc<MockVideoTrack>) -> Self {
        self.published = Some(track);
        self
    }

    pub fn processed(&self) -> Vec<String> {
        self.processing.lock().unwrap().clone()
    }
}

hooked_component!(MockVideoProcessor, "video_processor");

impl Processor for MockVideoProcessor {
    fn as_video_processor(self: Arc<Self>) -> Option<Arc<dyn VideoProcessor>> {
        Some(self)
    }

    fn as_video_publisher(self: Arc<Self>) -> Option<Arc<dyn VideoPublisher>> {
        if self.published.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl VideoProcessor for MockVideoProcessor {
    async fn process_video(
        &self,
        forwarder: Arc<VideoForwarder>,
        _participant: Option<Participant>,
    ) -> Result<()> {
        self.processing
            .lock()
            .unwrap()
            .push(forwarder.track_id().to_string());
        Ok(())
    }

    async fn stop_processing(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl VideoPublisher for MockVideoProcessor {
    async fn publish_video_track(&self) -> Result<Arc<dyn VideoTrack>> {
        match &self.published {
            Some(track) => Ok(track.clone()),
            None => Err(anyhow!("nothing to publish")),
        }
    }
}

#[derive(Default)]
pub struct MockToolServer {
    pub hooks: HookLog,
    pub events: Mutex<Option<EventSender>>,
}

impl MockToolServer {
    pub fn new(hooks: HookLog) -> Self {
        Self {
            hooks,
            ..Default::default()
        }
    }
}

hooked_component!(MockToolServer, "tools");

#[async_trait]
impl ToolServer for MockToolServer {
    async fn connect(&self) -> Result<()> {
        self.hooks.push("tools:connect");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.hooks.push("tools:disconnect");
        Ok(())
    }
}

pub struct MockVideoTrack {
    id: String,
    frames: tokio::sync::Mutex<mpsc::UnboundedReceiver<VideoFrame>>,
    stopped: AtomicBool,
}

impl MockVideoTrack {
    pub fn new(id: &str) -> (Arc<Self>, mpsc::UnboundedSender<VideoFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let track = Arc::new(Self {
            id: id.to_string(),
            frames: tokio::sync::Mutex::new(rx),
            stopped: AtomicBool::new(false),
        });
        (track, tx)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoTrack for MockVideoTrack {
    fn id(&self) -> &str {
        &self.id
    }

    async fn recv(&self) -> Result<Option<VideoFrame>> {
        let mut frames = self.frames.lock().await;
        Ok(frames.recv().await)
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockVideoLoader {
    pub opened: Mutex<Vec<PathBuf>>,
    feeds: Mutex<Vec<mpsc::UnboundedSender<VideoFrame>>>,
}

impl VideoFileLoader for MockVideoLoader {
    fn open(&self, path: &Path) -> Result<Arc<dyn VideoTrack>> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        let (track, feed) = MockVideoTrack::new("override");
        self.feeds.lock().unwrap().push(feed);
        Ok(track)
    }
}

#[derive(Default)]
pub struct MockAudioTrack {
    pub writes: Mutex<Vec<Bytes>>,
    pub flushes: AtomicUsize,
    pub stops: AtomicUsize,
}

#[async_trait]
impl OutputAudioTrack for MockAudioTrack {
    async fn write(&self, data: Bytes) -> Result<()> {
        self.writes.lock().unwrap().push(data);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockConversation {
    pub messages: Mutex<Vec<ConversationMessage>>,
}

impl MockConversation {
    pub fn contents(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|message| message.content.clone())
            .collect()
    }
}

#[async_trait]
impl Conversation for MockConversation {
    async fn upsert_message(&self, message: ConversationMessage) -> Result<()> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

pub struct MockConnection {
    idle_since: Mutex<Option<Instant>>,
    pub closes: AtomicUsize,
    pub waits: Mutex<Vec<Option<Duration>>>,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self {
            idle_since: Mutex::new(None),
            closes: AtomicUsize::new(0),
            waits: Mutex::new(Vec::new()),
        }
    }
}

impl MockConnection {
    pub fn set_idle_since(&self, since: Option<Instant>) {
        *self.idle_since.lock().unwrap() = since;
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn wait_for_participant(&self, timeout: Option<Duration>) -> Result<bool> {
        self.waits.lock().unwrap().push(timeout);
        Ok(true)
    }

    fn idle_since(&self) -> Option<Instant> {
        *self.idle_since.lock().unwrap()
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockEdge {
    pub hooks: HookLog,
    events: Mutex<Option<EventSender>>,
    pub connection: Arc<MockConnection>,
    pub audio_track: Arc<MockAudioTrack>,
    pub conversation: Arc<MockConversation>,
    pub remote_tracks: Mutex<HashMap<String, Arc<MockVideoTrack>>>,
    pub published: Mutex<Vec<(bool, Option<String>)>>,
    pub joins: AtomicUsize,
    pub join_delay: Option<Duration>,
    pub fail_join: AtomicBool,
}

impl MockEdge {
    pub fn new(hooks: HookLog) -> Self {
        Self {
            hooks,
            ..Default::default()
        }
    }

    pub fn with_join_delay(mut self, delay: Duration) -> Self {
        self.join_delay = Some(delay);
        self
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            events.send(event);
        }
    }

    pub fn add_remote_track(&self, id: &str) -> mpsc::UnboundedSender<VideoFrame> {
        let (track, feed) = MockVideoTrack::new(id);
        self.remote_tracks
            .lock()
            .unwrap()
            .insert(id.to_string(), track);
        feed
    }
}

#[async_trait]
impl EdgeTransport for MockEdge {
    fn attach(&self, events: EventSender) {
        *self.events.lock().unwrap() = Some(events);
    }

    async fn create_user(&self, _user: &AgentUser) -> Result<()> {
        self.hooks.push("edge:create_user");
        Ok(())
    }

    async fn create_audio_track(
        &self,
        _sample_rate: u32,
        _channels: u16,
    ) -> Result<Arc<dyn OutputAudioTrack>> {
        Ok(self.audio_track.clone())
    }

    async fn join(&self, _user: &AgentUser, _call: &CallRef) -> Result<Arc<dyn Connection>> {
        self.hooks.push("edge:join");
        self.joins.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.join_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(anyhow!("transport unavailable"));
        }
        Ok(self.connection.clone())
    }

    async fn publish_tracks(
        &self,
        audio: Option<Arc<dyn OutputAudioTrack>>,
        video: Option<Arc<dyn VideoTrack>>,
    ) -> Result<()> {
        self.hooks.push("edge:publish");
        self.published
            .lock()
            .unwrap()
            .push((audio.is_some(), video.map(|track| track.id().to_string())));
        Ok(())
    }

    async fn create_conversation(
        &self,
        _call: &CallRef,
        _user: &AgentUser,
        _instructions: &str,
    ) -> Result<Arc<dyn Conversation>> {
        self.hooks.push("edge:conversation");
        Ok(self.conversation.clone())
    }

    async fn add_track_subscriber(&self, track_id: &str) -> Result<Option<Arc<dyn VideoTrack>>> {
        Ok(self
            .remote_tracks
            .lock()
            .unwrap()
            .get(track_id)
            .cloned()
            .map(|track| track as Arc<dyn VideoTrack>))
    }
}
