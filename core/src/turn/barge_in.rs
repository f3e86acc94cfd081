use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::edge::{AgentUser, OutputAudioTrack, Participant};
use crate::plugins::SpeechSynthesizer;

/// Silences the agent when someone else starts speaking.
///
/// Runs outside the ordered event path so it never waits behind synthesis
/// or a pending turn.
pub struct BargeIn {
    speaker: AgentUser,
    tts: Option<Arc<dyn SpeechSynthesizer>>,
    output: Mutex<Option<Arc<dyn OutputAudioTrack>>>,
}

impl BargeIn {
    pub fn new(speaker: AgentUser, tts: Option<Arc<dyn SpeechSynthesizer>>) -> Self {
        Self {
            speaker,
            tts,
            output: Mutex::new(None),
        }
    }

    pub fn set_output_track(&self, output: Arc<dyn OutputAudioTrack>) {
        *self.output.lock() = Some(output);
    }

    /// The agent's own speech never interrupts itself.
    pub fn applies(&self, participant: Option<&Participant>) -> bool {
        !participant.is_some_and(|participant| self.speaker.is(participant))
    }

    pub async fn interrupt(&self) {
        debug!(target: "turn_taking", "barge-in, stopping speech");
        if let Some(tts) = &self.tts {
            if let Err(err) = tts.stop_audio().await {
                warn!(target: "turn_taking", %err, "failed to stop speech synthesis");
            }
        }
        let output = self.output.lock().clone();
        if let Some(output) = output {
            if let Err(err) = output.flush().await {
                warn!(target: "turn_taking", %err, "failed to flush outbound audio");
            }
        }
    }
}
