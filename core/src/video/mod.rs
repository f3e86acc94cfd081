//! Video fan-out and track arbitration.

mod arbiter;
mod forwarder;

pub use arbiter::{priority_for, Selection, TrackArbiter, TrackInfo, PUBLISHED_PRIORITY};
pub use forwarder::{FrameSubscriber, VideoForwarder};
