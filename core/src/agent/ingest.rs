use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audio::{AudioQueue, PcmData};
use crate::edge::{AgentUser, Conversation};
use crate::plugins::{AudioLlm, AudioProcessor, SpeechRecognizer, TurnDetector};

/// Drains the incoming audio buffer at a fixed cadence and fans each chunk
/// out to processors, the recognizer or audio model, and turn detection.
pub(crate) struct IngestLoop {
    pub audio: Arc<AudioQueue>,
    pub agent_user: AgentUser,
    pub processors: Vec<Arc<dyn AudioProcessor>>,
    /// Audio model; when present it replaces speech recognition.
    pub model: Option<Arc<dyn AudioLlm>>,
    pub stt: Option<Arc<dyn SpeechRecognizer>>,
    pub turn_detection: Option<Arc<dyn TurnDetector>>,
    pub conversation: Option<Arc<dyn Conversation>>,
    pub interval: Duration,
    pub drain_timeout: Duration,
}

impl IngestLoop {
    pub async fn run(self, ended: CancellationToken) {
        debug!(target: "audio_ingest", interval = ?self.interval, "audio ingestion started");

        loop {
            let cycle = Instant::now();

            let pcm = tokio::select! {
                biased;
                _ = ended.cancelled() => break,
                pcm = timeout(self.drain_timeout, self.audio.get_duration(self.interval)) => pcm.ok(),
            };
            if let Some(pcm) = pcm {
                self.process(&pcm).await;
            }

            // Sleep only what is left of this cycle.
            let remaining = self.interval.saturating_sub(cycle.elapsed());
            if !remaining.is_zero() {
                tokio::select! {
                    biased;
                    _ = ended.cancelled() => break,
                    _ = sleep(remaining) => {}
                }
            }
        }

        debug!(target: "audio_ingest", "audio ingestion stopped");
    }

    pub async fn process(&self, pcm: &PcmData) {
        if pcm
            .participant
            .as_ref()
            .is_some_and(|participant| self.agent_user.is(participant))
        {
            return;
        }
        let participant = pcm.participant.as_ref();

        for processor in &self.processors {
            if let Err(err) = processor.process_audio(pcm).await {
                warn!(
                    target: "audio_ingest",
                    processor = processor.name(),
                    %err,
                    "audio processor failed"
                );
            }
        }

        if let Some(model) = &self.model {
            if let Err(err) = model.simple_audio_response(pcm, participant).await {
                warn!(target: "audio_ingest", %err, "failed to send audio to model");
            }
        } else if let Some(stt) = &self.stt {
            if let Err(err) = stt.process_audio(pcm, participant).await {
                warn!(target: "audio_ingest", %err, "speech recognition failed");
            }
        }

        if let Some(detector) = &self.turn_detection {
            if let Err(err) = detector
                .process_audio(pcm, participant, self.conversation.clone())
                .await
            {
                warn!(target: "audio_ingest", %err, "turn detection failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pcm, settle, HookLog, MockLlm, MockStt, MockTurnDetector};
    use std::sync::atomic::Ordering;

    fn ingest(
        stt: Option<Arc<MockStt>>,
        model: Option<Arc<MockLlm>>,
        detector: Option<Arc<MockTurnDetector>>,
    ) -> (IngestLoop, Arc<AudioQueue>) {
        let audio = Arc::new(AudioQueue::new(Duration::from_secs(8)));
        let ingest = IngestLoop {
            audio: audio.clone(),
            agent_user: AgentUser::new("agent-1"),
            processors: Vec::new(),
            model: model.map(|model| model as Arc<dyn AudioLlm>),
            stt: stt.map(|stt| stt as Arc<dyn SpeechRecognizer>),
            turn_detection: detector.map(|detector| detector as Arc<dyn TurnDetector>),
            conversation: None,
            interval: Duration::from_millis(20),
            drain_timeout: Duration::from_secs(1),
        };
        (ingest, audio)
    }

    #[tokio::test(start_paused = true)]
    async fn drains_in_interval_sized_chunks() {
        let stt = Arc::new(MockStt::new(HookLog::default()));
        let detector = Arc::new(MockTurnDetector::new(HookLog::default()));
        let (ingest, audio) = ingest(Some(stt.clone()), None, Some(detector.clone()));
        audio.put(pcm(100, "alice"));

        let ended = CancellationToken::new();
        let task = tokio::spawn(ingest.run(ended.clone()));
        sleep(Duration::from_millis(150)).await;

        assert_eq!(stt.chunks(), 5);
        assert!(stt
            .audio
            .lock()
            .unwrap()
            .iter()
            .all(|chunk| chunk.duration() == Duration::from_millis(20)));
        assert_eq!(detector.chunks.load(Ordering::SeqCst), 5);

        ended.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn skips_the_agents_own_audio() {
        let stt = Arc::new(MockStt::new(HookLog::default()));
        let (ingest, audio) = ingest(Some(stt.clone()), None, None);
        audio.put(pcm(20, "agent-1"));
        audio.put(pcm(20, "alice"));

        let ended = CancellationToken::new();
        let task = tokio::spawn(ingest.run(ended.clone()));
        sleep(Duration::from_millis(100)).await;

        assert_eq!(stt.chunks(), 1);
        ended.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn audio_model_replaces_recognizer() {
        let stt = Arc::new(MockStt::new(HookLog::default()));
        let model = Arc::new(MockLlm::new(HookLog::default()).with_audio());
        let (ingest, audio) = ingest(Some(stt.clone()), Some(model.clone()), None);
        audio.put(pcm(40, "alice"));

        let ended = CancellationToken::new();
        let task = tokio::spawn(ingest.run(ended.clone()));
        sleep(Duration::from_millis(100)).await;

        assert_eq!(model.audio_chunks.load(Ordering::SeqCst), 2);
        assert_eq!(stt.chunks(), 0);
        ended.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_promptly_while_waiting_for_audio() {
        let (ingest, _audio) = ingest(None, None, None);
        let ended = CancellationToken::new();
        let task = tokio::spawn(ingest.run(ended.clone()));
        settle().await;

        let started = Instant::now();
        ended.cancel();
        task.await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(20));
    }
}
