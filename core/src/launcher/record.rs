use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::edge::CallRef;
use crate::telemetry::events::duration_to_ms;

/// One agent session owned by the launcher. The session id is the agent id.
pub struct SessionRecord {
    call: CallRef,
    created_by: Option<String>,
    started_at: SystemTime,
    agent: Agent,
    pub(super) cancel: CancellationToken,
    /// Cancelled once the session task has finished and the agent is closed.
    pub(super) done: CancellationToken,
    pub(super) task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRecord {
    pub(super) fn new(agent: Agent, call: CallRef, created_by: Option<String>) -> Self {
        Self {
            call,
            created_by,
            started_at: SystemTime::now(),
            agent,
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        self.agent.id()
    }

    pub fn call(&self) -> &CallRef {
        &self.call
    }

    pub fn call_id(&self) -> &str {
        &self.call.id
    }

    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Waits until the session task has finished.
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }

    pub fn idle_for(&self) -> Duration {
        self.agent.idle_for()
    }

    pub fn on_call_for(&self) -> Duration {
        self.agent.on_call_for()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id().to_string(),
            call_id: self.call.id.clone(),
            call_type: self.call.call_type.clone(),
            created_by: self.created_by.clone(),
            started_at: self.started_at,
            joined: self.agent.is_joined(),
            finished: self.finished(),
            idle_ms: duration_to_ms(self.idle_for()),
            on_call_ms: duration_to_ms(self.on_call_for()),
        }
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("id", &self.id())
            .field("call", &self.call)
            .field("created_by", &self.created_by)
            .field("finished", &self.finished())
            .finish()
    }
}

/// Serializable snapshot of a session, for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub call_id: String,
    pub call_type: String,
    pub created_by: Option<String>,
    pub started_at: SystemTime,
    pub joined: bool,
    pub finished: bool,
    pub idle_ms: u64,
    pub on_call_ms: u64,
}
