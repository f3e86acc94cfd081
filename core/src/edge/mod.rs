//! Contracts with the media transport that carries the call.

mod types;

pub use types::{AgentUser, CallRef, Participant, TrackKind};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::events::EventSender;

/// Call transport. Reports `TrackAdded`, `TrackRemoved`, `AudioReceived` and
/// `CallEnded` through the sender handed over in [`EdgeTransport::attach`].
#[async_trait]
pub trait EdgeTransport: Send + Sync {
    fn attach(&self, _events: EventSender) {}

    async fn create_user(&self, user: &AgentUser) -> Result<()>;

    async fn create_audio_track(
        &self,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Arc<dyn OutputAudioTrack>>;

    async fn join(&self, user: &AgentUser, call: &CallRef) -> Result<Arc<dyn Connection>>;

    async fn publish_tracks(
        &self,
        audio: Option<Arc<dyn OutputAudioTrack>>,
        video: Option<Arc<dyn VideoTrack>>,
    ) -> Result<()>;

    async fn create_conversation(
        &self,
        call: &CallRef,
        user: &AgentUser,
        instructions: &str,
    ) -> Result<Arc<dyn Conversation>>;

    /// Subscribes to a remote video track. `None` when the track is gone.
    async fn add_track_subscriber(&self, track_id: &str) -> Result<Option<Arc<dyn VideoTrack>>>;
}

/// A joined call.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Resolves once another participant is present, or after `timeout`.
    /// Returns whether a participant showed up.
    async fn wait_for_participant(&self, timeout: Option<Duration>) -> Result<bool>;

    /// Since when the agent has been alone on the call. `None` while anyone
    /// else is present.
    fn idle_since(&self) -> Option<Instant>;

    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub message_id: Option<String>,
    pub role: MessageRole,
    pub user_id: String,
    pub content: String,
    pub completed: bool,
    /// Replace the stored content instead of appending to it.
    pub replace: bool,
}

/// Chat history sink shared with the call participants.
#[async_trait]
pub trait Conversation: Send + Sync {
    async fn upsert_message(&self, message: ConversationMessage) -> Result<()>;
}

/// Outbound PCM track the agent speaks through.
#[async_trait]
pub trait OutputAudioTrack: Send + Sync {
    async fn write(&self, data: Bytes) -> Result<()>;

    /// Drops anything queued but not yet played.
    async fn flush(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pts: Duration,
    pub data: Bytes,
}

#[async_trait]
pub trait VideoTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Next decoded frame. `Ok(None)` once the track has ended.
    async fn recv(&self) -> Result<Option<VideoFrame>>;

    async fn stop(&self);
}
