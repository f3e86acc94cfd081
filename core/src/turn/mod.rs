//! Turn taking: transcript accumulation, barge-in and reply scheduling.

mod barge_in;
mod machine;
mod transcript;

pub use barge_in::BargeIn;
pub use machine::{sanitize, ReplyOutcome, Turn, TurnOutcome, TurnTaker};
pub use transcript::{TranscriptBuffer, TranscriptStore};

#[cfg(test)]
mod tests;
