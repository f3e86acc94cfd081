use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::ConfigError;

pub const ENV_IDLE_TIMEOUT_SECS: &str = "PARLEY_AGENT_IDLE_TIMEOUT_SECS";
pub const ENV_MAX_CONCURRENT_SESSIONS: &str = "PARLEY_MAX_CONCURRENT_SESSIONS";
pub const ENV_MAX_SESSIONS_PER_CALL: &str = "PARLEY_MAX_SESSIONS_PER_CALL";
pub const ENV_MAX_SESSION_DURATION_SECS: &str = "PARLEY_MAX_SESSION_DURATION_SECS";
pub const ENV_CLEANUP_INTERVAL_SECS: &str = "PARLEY_CLEANUP_INTERVAL_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// How long an agent may stay alone on a call. Zero disables idle
    /// eviction.
    pub agent_idle_timeout: Duration,
    pub max_concurrent_sessions: Option<usize>,
    pub max_sessions_per_call: Option<usize>,
    pub max_session_duration: Option<Duration>,
    pub cleanup_interval: Duration,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            agent_idle_timeout: Duration::from_secs(60),
            max_concurrent_sessions: None,
            max_sessions_per_call: None,
            max_session_duration: None,
            cleanup_interval: Duration::from_secs(5),
        }
    }
}

impl LauncherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "cleanup_interval",
            });
        }
        if self.max_concurrent_sessions == Some(0) {
            return Err(ConfigError::InvalidLimit {
                field: "max_concurrent_sessions",
            });
        }
        if self.max_sessions_per_call == Some(0) {
            return Err(ConfigError::InvalidLimit {
                field: "max_sessions_per_call",
            });
        }
        if self.max_session_duration.is_some_and(|max| max.is_zero()) {
            return Err(ConfigError::ZeroDuration {
                field: "max_session_duration",
            });
        }
        Ok(())
    }

    pub fn idle_eviction_enabled(&self) -> bool {
        !self.agent_idle_timeout.is_zero()
    }

    /// Defaults overridden by `PARLEY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_env::<u64, _>(&lookup, ENV_IDLE_TIMEOUT_SECS)? {
            config.agent_idle_timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = parse_env(&lookup, ENV_MAX_CONCURRENT_SESSIONS)? {
            config.max_concurrent_sessions = Some(limit);
        }
        if let Some(limit) = parse_env(&lookup, ENV_MAX_SESSIONS_PER_CALL)? {
            config.max_sessions_per_call = Some(limit);
        }
        if let Some(secs) = parse_env::<u64, _>(&lookup, ENV_MAX_SESSION_DURATION_SECS)? {
            config.max_session_duration = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_env::<u64, _>(&lookup, ENV_CLEANUP_INTERVAL_SECS)? {
            config.cleanup_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        })
}
