use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A participant heard or seen on the call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub session_id: Option<String>,
}

impl Participant {
    pub fn new<S: Into<String>>(user_id: S) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: None,
        }
    }
}

/// Identity the agent uses on the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUser {
    pub id: String,
    pub name: Option<String>,
}

impl AgentUser {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    /// Generates an `agent-<uuid>` identity.
    pub fn generated() -> Self {
        Self::new(format!("agent-{}", Uuid::new_v4()))
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn is(&self, participant: &Participant) -> bool {
        participant.user_id == self.id
    }
}

impl Default for AgentUser {
    fn default() -> Self {
        Self::generated()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallRef {
    pub call_type: String,
    pub id: String,
}

impl CallRef {
    pub fn new<T: Into<String>, I: Into<String>>(call_type: T, id: I) -> Self {
        Self {
            call_type: call_type.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Camera,
    ScreenShare,
}

impl TrackKind {
    pub fn is_video(&self) -> bool {
        matches!(self, TrackKind::Camera | TrackKind::ScreenShare)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Camera => "camera",
            TrackKind::ScreenShare => "screen_share",
        }
    }
}
