//! Parley Core Library
//!
//! This crate provides the orchestration core of a realtime conversational
//! agent: audio ingestion, turn taking, video routing, the per-call agent
//! session lifecycle, and a launcher that runs many sessions at once.

pub mod agent;
pub mod audio;
pub mod edge;
pub mod events;
pub mod launcher;
pub mod plugins;
pub mod telemetry;
pub mod turn;
pub mod video;
pub mod warmup;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentConfig, AgentError, AgentParts, ConfigError, ParticipantWait};
pub use launcher::{AgentFactory, AgentLauncher, LauncherConfig, LauncherError, SessionStatus};
pub use warmup::{Warmable, WarmupCache};
