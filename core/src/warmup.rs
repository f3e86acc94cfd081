//! One-time loading of expensive provider resources.
//!
//! A resource is loaded once per component type and shared with every later
//! instance of that type. Concurrent warmups of the same type wait on the same
//! per-type lock instead of loading twice.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

pub type SharedResource = Arc<dyn Any + Send + Sync>;

#[async_trait]
pub trait Warmable: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;

    /// Loads the shared resource. Blocking loads belong in [`load_blocking`].
    async fn on_warmup(&self) -> Result<Self::Resource>;

    /// Receives the shared resource, fresh or cached.
    fn on_warmed_up(&self, resource: Arc<Self::Resource>);

    fn warmup_key(&self) -> TypeId {
        TypeId::of::<Self>()
    }
}

/// Type-erased view of a [`Warmable`] used by the cache.
#[async_trait]
pub trait WarmupTarget: Send + Sync {
    fn key(&self) -> TypeId;

    fn label(&self) -> &'static str;

    async fn load(&self) -> Result<SharedResource>;

    fn apply(&self, resource: SharedResource) -> Result<()>;
}

#[async_trait]
impl<T: Warmable> WarmupTarget for T {
    fn key(&self) -> TypeId {
        self.warmup_key()
    }

    fn label(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    async fn load(&self) -> Result<SharedResource> {
        let resource = self.on_warmup().await?;
        Ok(Arc::new(resource))
    }

    fn apply(&self, resource: SharedResource) -> Result<()> {
        let resource = resource
            .downcast::<T::Resource>()
            .map_err(|_| anyhow!("cached resource for {} has the wrong type", self.label()))?;
        self.on_warmed_up(resource);
        Ok(())
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<SharedResource>>>;

#[derive(Default)]
pub struct WarmupCache {
    slots: Mutex<HashMap<TypeId, Slot>>,
}

impl WarmupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn warmup(&self, target: &dyn WarmupTarget) -> Result<()> {
        let slot = self.slot(target.key());
        let mut guard = slot.lock().await;

        let resource = match guard.as_ref() {
            Some(resource) => {
                debug!(target: "warmup", component = target.label(), "reusing warmed resource");
                Arc::clone(resource)
            }
            None => {
                let started = Instant::now();
                let resource = target.load().await?;
                info!(
                    target: "warmup",
                    component = target.label(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "warmed up component"
                );
                *guard = Some(Arc::clone(&resource));
                resource
            }
        };
        drop(guard);

        target.apply(resource)
    }

    pub fn contains(&self, key: TypeId) -> bool {
        self.slots
            .lock()
            .get(&key)
            .map(|slot| matches!(slot.try_lock(), Ok(guard) if guard.is_some()))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: TypeId) -> Slot {
        Arc::clone(self.slots.lock().entry(key).or_default())
    }
}

/// Runs a blocking load on the blocking pool.
pub async fn load_blocking<R, F>(load: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> Result<R> + Send + 'static,
{
    tokio::task::spawn_blocking(load)
        .await
        .map_err(|err| anyhow!("warmup task failed: {err}"))?
}
