use thiserror::Error;

use crate::agent::ConfigError;

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("launcher is already running")]
    AlreadyRunning,
    #[error("reached maximum concurrent sessions of {limit}")]
    MaxConcurrentSessions { limit: usize },
    #[error("reached maximum sessions per call of {limit} for call {call_id}")]
    MaxSessionsPerCall { call_id: String, limit: usize },
    #[error("failed to launch agent: {0}")]
    Launch(#[source] anyhow::Error),
    #[error("agent warmup failed: {0}")]
    Warmup(#[source] anyhow::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl LauncherError {
    /// Whether the start was refused by a session limit.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            LauncherError::MaxConcurrentSessions { .. } | LauncherError::MaxSessionsPerCall { .. }
        )
    }
}
