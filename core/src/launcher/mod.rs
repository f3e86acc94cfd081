//! Session launcher: warms shared resources once, starts one background task
//! per agent session under global and per-call limits, and evicts sessions
//! that sit idle or run past their maximum duration.

mod config;
mod error;
mod record;
mod sweep;

pub use config::{
    LauncherConfig, ENV_CLEANUP_INTERVAL_SECS, ENV_IDLE_TIMEOUT_SECS,
    ENV_MAX_CONCURRENT_SESSIONS, ENV_MAX_SESSIONS_PER_CALL, ENV_MAX_SESSION_DURATION_SECS,
};
pub use error::LauncherError;
pub use record::{SessionRecord, SessionStatus};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::agent::{Agent, ConfigError};
use crate::edge::CallRef;
use crate::telemetry::events::record_session_started;
use crate::warmup::WarmupCache;

/// Builds agents for the launcher and drives each session.
#[async_trait]
pub trait AgentFactory: Send + Sync + 'static {
    async fn create(&self) -> Result<Agent>;

    /// Runs one session. The default joins the call and waits for it to end;
    /// the launcher closes the agent afterwards either way.
    async fn run_session(&self, agent: Agent, call: CallRef) -> Result<()> {
        agent.join(&call).await?;
        agent.finish().await;
        Ok(())
    }
}

#[derive(Clone)]
pub struct AgentLauncher {
    inner: Arc<LauncherInner>,
}

struct LauncherInner {
    factory: Arc<dyn AgentFactory>,
    config: LauncherConfig,
    cache: WarmupCache,
    warmup_lock: tokio::sync::Mutex<()>,
    warmed_up: AtomicBool,
    running: AtomicBool,
    /// Held while checking limits and registering a session.
    start_lock: tokio::sync::Mutex<()>,
    registry: Mutex<Registry>,
    sweep: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, Arc<SessionRecord>>,
    calls: HashMap<String, HashSet<String>>,
}

impl Registry {
    fn insert(&mut self, record: Arc<SessionRecord>) {
        self.calls
            .entry(record.call_id().to_string())
            .or_default()
            .insert(record.id().to_string());
        self.sessions.insert(record.id().to_string(), record);
    }

    fn remove(&mut self, session_id: &str) -> Option<Arc<SessionRecord>> {
        let record = self.sessions.remove(session_id)?;
        if let Some(ids) = self.calls.get_mut(record.call_id()) {
            ids.remove(session_id);
            if ids.is_empty() {
                self.calls.remove(record.call_id());
            }
        }
        Some(record)
    }

    fn sessions_for_call(&self, call_id: &str) -> usize {
        self.calls.get(call_id).map_or(0, HashSet::len)
    }
}

/// Drops a finished session from the registry, however its task ended.
struct SessionCleanup {
    launcher: Weak<LauncherInner>,
    record: Arc<SessionRecord>,
}

impl Drop for SessionCleanup {
    fn drop(&mut self) {
        if let Some(inner) = self.launcher.upgrade() {
            let mut registry = inner.registry.lock();
            let current = registry
                .sessions
                .get(self.record.id())
                .is_some_and(|record| Arc::ptr_eq(record, &self.record));
            if current {
                registry.remove(self.record.id());
            }
        }
        self.record.done.cancel();
    }
}

impl AgentLauncher {
    pub fn new(factory: Arc<dyn AgentFactory>, config: LauncherConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(LauncherInner {
                factory,
                config,
                cache: WarmupCache::new(),
                warmup_lock: tokio::sync::Mutex::new(()),
                warmed_up: AtomicBool::new(false),
                running: AtomicBool::new(false),
                start_lock: tokio::sync::Mutex::new(()),
                registry: Mutex::new(Registry::default()),
                sweep: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.inner.config
    }

    pub fn warmup_cache(&self) -> &WarmupCache {
        &self.inner.cache
    }

    pub fn warmed_up(&self) -> bool {
        self.inner.warmed_up.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn ready(&self) -> bool {
        self.warmed_up() && self.running()
    }

    /// Warms up and starts the eviction sweep.
    pub async fn start(&self) -> Result<(), LauncherError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(LauncherError::AlreadyRunning);
        }
        debug!(target: "launcher", "starting launcher");

        if let Err(err) = self.warmup().await {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(err);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sweep::run(
            Arc::downgrade(&self.inner),
            self.inner.config.clone(),
            cancel.clone(),
        ));
        *self.inner.sweep.lock() = Some((cancel, handle));
        info!(target: "launcher", "launcher started");
        Ok(())
    }

    /// Stops the sweep, then cancels every session and waits for each to
    /// close. Individual failures are logged.
    pub async fn stop(&self) {
        debug!(target: "launcher", "stopping launcher");
        self.inner.running.store(false, Ordering::SeqCst);

        let sweep = self.inner.sweep.lock().take();
        if let Some((cancel, handle)) = sweep {
            cancel.cancel();
            if let Err(err) = handle.await {
                warn!(target: "launcher", %err, "eviction sweep failed");
            }
        }

        let records: Vec<Arc<SessionRecord>> =
            self.inner.registry.lock().sessions.values().cloned().collect();
        for record in &records {
            record.cancel.cancel();
        }
        let stopped = records.iter().map(|record| async move {
            let task = record.task.lock().take();
            match task {
                Some(task) => task.await,
                None => {
                    record.wait().await;
                    Ok(())
                }
            }
        });
        let results = futures::future::join_all(stopped).await;
        for (record, result) in records.iter().zip(results) {
            if let Err(err) = result {
                warn!(
                    target: "launcher",
                    session_id = record.id(),
                    %err,
                    "agent session task failed while stopping"
                );
            }
        }
        info!(target: "launcher", sessions = records.len(), "launcher stopped");
    }

    /// Creates a throwaway agent and loads its shared resources. Later
    /// calls return immediately.
    pub async fn warmup(&self) -> Result<(), LauncherError> {
        if self.warmed_up() {
            return Ok(());
        }
        let _guard = self.inner.warmup_lock.lock().await;
        if self.warmed_up() {
            return Ok(());
        }

        info!(target: "launcher", "warming up agent components");
        let started = Instant::now();
        let agent = self
            .inner
            .factory
            .create()
            .await
            .map_err(LauncherError::Launch)?;
        let result = agent.warmup(&self.inner.cache).await;
        agent.close().await;
        result.map_err(LauncherError::Warmup)?;

        self.inner.warmed_up.store(true, Ordering::SeqCst);
        info!(
            target: "launcher",
            elapsed_ms = started.elapsed().as_millis() as u64,
            "agent warmup completed"
        );
        Ok(())
    }

    /// Creates an agent with warmed-up resources.
    pub async fn launch(&self) -> Result<Agent, LauncherError> {
        let agent = self
            .inner
            .factory
            .create()
            .await
            .map_err(LauncherError::Launch)?;
        agent
            .warmup(&self.inner.cache)
            .await
            .map_err(LauncherError::Warmup)?;
        Ok(agent)
    }

    /// Launches an agent and runs it on `call` in the background.
    pub async fn start_session(
        &self,
        call: CallRef,
        created_by: Option<String>,
    ) -> Result<Arc<SessionRecord>, LauncherError> {
        let _start = self.inner.start_lock.lock().await;
        self.check_limits(&call.id)?;

        let agent = self.launch().await?;
        let record = Arc::new(SessionRecord::new(agent, call, created_by));

        // The task waits for registration so its cleanup never runs first.
        let (registered_tx, registered_rx) = oneshot::channel();
        let span = info_span!(
            target: "launcher",
            "agent_session",
            session_id = record.id(),
            call_id = record.call_id()
        );
        let task = tokio::spawn(
            run_session(
                Arc::downgrade(&self.inner),
                Arc::clone(&self.inner.factory),
                Arc::clone(&record),
                registered_rx,
            )
            .instrument(span),
        );
        *record.task.lock() = Some(task);

        let active = {
            let mut registry = self.inner.registry.lock();
            registry.insert(Arc::clone(&record));
            registry.sessions.len()
        };
        let _ = registered_tx.send(());

        info!(
            target: "launcher",
            session_id = record.id(),
            call_id = record.call_id(),
            "started agent session"
        );
        record_session_started(record.id(), record.call_id(), active);
        Ok(record)
    }

    /// Closes a session. Returns `false` when no such session is running.
    /// With `wait`, returns once the agent has closed.
    pub async fn close_session(&self, session_id: &str, wait: bool) -> bool {
        let Some(record) = self.inner.registry.lock().remove(session_id) else {
            return false;
        };
        info!(target: "launcher", session_id, "closing agent session");
        record.cancel.cancel();
        if wait {
            record.wait().await;
        }
        true
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<SessionRecord>> {
        self.inner.registry.lock().sessions.get(session_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry.lock().sessions.len()
    }

    pub fn sessions_for_call(&self, call_id: &str) -> usize {
        self.inner.registry.lock().sessions_for_call(call_id)
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        let records: Vec<Arc<SessionRecord>> =
            self.inner.registry.lock().sessions.values().cloned().collect();
        records.iter().map(|record| record.status()).collect()
    }

    fn check_limits(&self, call_id: &str) -> Result<(), LauncherError> {
        let registry = self.inner.registry.lock();
        if let Some(limit) = self.inner.config.max_concurrent_sessions {
            if registry.sessions.len() >= limit {
                return Err(LauncherError::MaxConcurrentSessions { limit });
            }
        }
        if let Some(limit) = self.inner.config.max_sessions_per_call {
            if registry.sessions_for_call(call_id) >= limit {
                return Err(LauncherError::MaxSessionsPerCall {
                    call_id: call_id.to_string(),
                    limit,
                });
            }
        }
        Ok(())
    }
}

async fn run_session(
    launcher: Weak<LauncherInner>,
    factory: Arc<dyn AgentFactory>,
    record: Arc<SessionRecord>,
    registered: oneshot::Receiver<()>,
) {
    let _cleanup = SessionCleanup {
        launcher,
        record: Arc::clone(&record),
    };
    let agent = record.agent().clone();

    if registered.await.is_ok() {
        tokio::select! {
            _ = record.cancel.cancelled() => {
                debug!(target: "launcher", "agent session cancelled");
            }
            result = factory.run_session(agent.clone(), record.call().clone()) => {
                match result {
                    Ok(()) => debug!(target: "launcher", "agent session finished"),
                    Err(err) => warn!(target: "launcher", %err, "agent session failed"),
                }
            }
        }
    }

    agent.close().await;
}
