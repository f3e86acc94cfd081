use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AgentLauncher, LauncherConfig, LauncherInner, SessionRecord};
use crate::telemetry::events::record_session_evicted;

struct Eviction {
    session_id: String,
    call_id: String,
    reason: &'static str,
    idle: Duration,
    on_call: Duration,
}

fn due(
    record: &SessionRecord,
    idle_timeout: Option<Duration>,
    max_duration: Option<Duration>,
) -> Option<Eviction> {
    let idle = record.idle_for();
    let on_call = record.on_call_for();
    let reason = if idle_timeout.is_some_and(|timeout| idle >= timeout) {
        "idle"
    } else if max_duration.is_some_and(|max| on_call >= max) {
        "max_duration"
    } else {
        return None;
    };
    Some(Eviction {
        session_id: record.id().to_string(),
        call_id: record.call_id().to_string(),
        reason,
        idle,
        on_call,
    })
}

/// Periodically closes sessions that were alone on their call for too long
/// or exceeded the maximum session duration.
pub(super) async fn run(
    launcher: Weak<LauncherInner>,
    config: LauncherConfig,
    cancel: CancellationToken,
) {
    let idle_timeout = config
        .idle_eviction_enabled()
        .then_some(config.agent_idle_timeout);
    if idle_timeout.is_none() && config.max_session_duration.is_none() {
        debug!(target: "launcher", "no idle timeout or max duration, eviction sweep disabled");
        return;
    }

    let mut ticker = interval(config.cleanup_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = launcher.upgrade() else {
            break;
        };

        let evictions: Vec<Eviction> = {
            let registry = inner.registry.lock();
            registry
                .sessions
                .values()
                .filter_map(|record| due(record, idle_timeout, config.max_session_duration))
                .collect()
        };
        if evictions.is_empty() {
            continue;
        }

        let handle = AgentLauncher {
            inner: Arc::clone(&inner),
        };
        // Each eviction runs in its own task so stopping the sweep never
        // leaves one half done.
        let handles: Vec<_> = evictions
            .into_iter()
            .map(|eviction| {
                let launcher = handle.clone();
                tokio::spawn(async move {
                    info!(
                        target: "launcher",
                        session_id = %eviction.session_id,
                        reason = eviction.reason,
                        idle_ms = eviction.idle.as_millis() as u64,
                        on_call_ms = eviction.on_call.as_millis() as u64,
                        "evicting agent session"
                    );
                    let closed = launcher.close_session(&eviction.session_id, false).await;
                    (eviction, closed)
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            match result {
                Ok((eviction, true)) => record_session_evicted(
                    &eviction.session_id,
                    &eviction.call_id,
                    eviction.reason,
                    eviction.idle,
                    eviction.on_call,
                ),
                Ok((eviction, false)) => debug!(
                    target: "launcher",
                    session_id = %eviction.session_id,
                    "session already closed"
                ),
                Err(err) => warn!(target: "launcher", %err, "failed to evict agent session"),
            }
        }
    }

    debug!(target: "launcher", "eviction sweep stopped");
}
