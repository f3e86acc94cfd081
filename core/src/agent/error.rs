use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("at least one processing capability (audio or video) is required")]
    NoProcessingCapability,
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("{field} must be greater than zero")]
    InvalidLimit { field: &'static str },
    #[error("ingest interval {interval:?} exceeds audio buffer limit {limit:?}")]
    IntervalExceedsBuffer { interval: Duration, limit: Duration },
    #[error("eager turn confidence floor {0} is outside 0.0..=1.0")]
    InvalidConfidence(f32),
    #[error("video override path set without a video file loader")]
    MissingVideoLoader,
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: String, value: String },
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent is already joining a call")]
    JoinInProgress,
    #[error("agent has already joined a call")]
    AlreadyJoined,
    #[error("agent is closed")]
    Closed,
    #[error("{stage} failed: {source}")]
    Join {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("speech synthesis failed: {0}")]
    Synthesis(#[source] anyhow::Error),
    #[error("model request failed: {0}")]
    Model(#[source] anyhow::Error),
    #[error("agent has no speech synthesizer")]
    NoSynthesizer,
}

impl AgentError {
    pub(crate) fn join(stage: &'static str) -> impl FnOnce(anyhow::Error) -> AgentError {
        move |source| AgentError::Join { stage, source }
    }
}
