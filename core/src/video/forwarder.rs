use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::edge::{VideoFrame, VideoTrack};

type SenderSlot = Arc<Mutex<Option<broadcast::Sender<VideoFrame>>>>;

/// Reads one video track and fans its frames out to any number of
/// subscribers. Slow subscribers skip frames instead of holding others back.
/// Subscriptions end when the forwarder stops or the track ends.
pub struct VideoForwarder {
    track: Arc<dyn VideoTrack>,
    track_id: String,
    /// Emptied by whichever of the reader or `stop` finishes first.
    sender: SenderSlot,
    cancel: CancellationToken,
    producer: Mutex<Option<JoinHandle<()>>>,
}

impl VideoForwarder {
    /// Spawns the reader. Frames arriving faster than `max_fps` are dropped.
    pub fn start(track: Arc<dyn VideoTrack>, buffer: usize, max_fps: u32) -> Arc<Self> {
        let (sender, _) = broadcast::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        let track_id = track.id().to_string();
        let slot: SenderSlot = Arc::new(Mutex::new(Some(sender.clone())));

        let producer = tokio::spawn(produce(
            Arc::clone(&track),
            sender,
            Arc::clone(&slot),
            cancel.clone(),
            frame_interval(max_fps),
        ));

        Arc::new(Self {
            track,
            track_id,
            sender: slot,
            cancel,
            producer: Mutex::new(Some(producer)),
        })
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    /// New consumer receiving at most `fps` frames per second, or every frame
    /// the forwarder emits when `None`.
    pub fn subscribe(&self, fps: Option<u32>) -> FrameSubscriber {
        let rx = match self.sender.lock().as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).0.subscribe(),
        };
        FrameSubscriber {
            rx,
            min_interval: fps.map(frame_interval).unwrap_or(Duration::ZERO),
            last: None,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    /// `false` once stopped or once the track ended.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.sender.lock().is_some()
    }

    /// Stops reading and ends every subscription. Safe to call twice.
    pub async fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let producer = self.producer.lock().take();
        if let Some(producer) = producer {
            if let Err(err) = producer.await {
                warn!(target: "video", track_id = %self.track_id, %err, "frame reader failed");
            }
        }
        self.sender.lock().take();
        self.track.stop().await;
        debug!(target: "video", track_id = %self.track_id, "video forwarder stopped");
    }
}

async fn produce(
    track: Arc<dyn VideoTrack>,
    sender: broadcast::Sender<VideoFrame>,
    slot: SenderSlot,
    cancel: CancellationToken,
    min_interval: Duration,
) {
    let mut last: Option<Instant> = None;
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = track.recv() => frame,
        };

        match frame {
            Ok(Some(frame)) => {
                let now = Instant::now();
                if last.is_some_and(|last| now.duration_since(last) < min_interval) {
                    continue;
                }
                last = Some(now);
                // No subscribers is fine; the frame is simply dropped.
                let _ = sender.send(frame);
            }
            Ok(None) => {
                debug!(target: "video", track_id = track.id(), "video track ended");
                break;
            }
            Err(err) => {
                warn!(target: "video", track_id = track.id(), %err, "failed to read video frame");
                break;
            }
        }
    }
    // Dropping the last sender ends every subscription.
    slot.lock().take();
}

fn frame_interval(fps: u32) -> Duration {
    if fps == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs(1) / fps
}

pub struct FrameSubscriber {
    rx: broadcast::Receiver<VideoFrame>,
    min_interval: Duration,
    last: Option<Instant>,
}

impl FrameSubscriber {
    /// Next frame, or `None` once the forwarder stopped.
    pub async fn next(&mut self) -> Option<VideoFrame> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => {
                    let now = Instant::now();
                    if self
                        .last
                        .is_some_and(|last| now.duration_since(last) < self.min_interval)
                    {
                        continue;
                    }
                    self.last = Some(now);
                    return Some(frame);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(target: "video", skipped, "subscriber lagging, frames skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
