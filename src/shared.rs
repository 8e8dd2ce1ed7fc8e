//! Shared Registry
//!
//! TigerStyle: one seam where callers meet the registry.
//!
//! ```text
//!            Serialized                         Racy
//!   ┌──────────────────────────┐   ┌──────────────────────────────────┐
//!   │ lock                     │   │ lock  lookup / reserve   unlock  │
//!   │   lookup → mutate        │   │ ── yield: other callers run ──   │
//!   │ unlock                   │   │ lock  install / unlink   unlock  │
//!   └──────────────────────────┘   └──────────────────────────────────┘
//! ```
//!
//! In racy mode no operation holds the registry across its lookup and its
//! mutation, so two callers can act on the same stale observation: both
//! unlink the same compartment, both fill the same empty slot, or link to an
//! engine that a concurrent sweep has already freed. Memory stays sound; the
//! bookkeeping does not. [`crate::audit::audit`] reports the result.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::audit::{self, Divergence, RegistrySnapshot};
use crate::config::{ConcurrencyMode, RegistryConfig};
use crate::error::RegistryResult;
use crate::registry::Registry;
use crate::slot::RecordId;
use crate::user::{UserMemory, UserPtr};

/// Registry shared between concurrent callers.
#[derive(Debug, Clone)]
pub struct SharedRegistry {
    inner: Arc<Mutex<Registry>>,
    mode: ConcurrencyMode,
}

impl SharedRegistry {
    /// Build a registry from `config` and share it.
    #[must_use]
    pub fn new(config: &RegistryConfig) -> Self {
        Self::from_registry(Registry::new(config), config.concurrency)
    }

    /// Share an existing registry.
    #[must_use]
    pub fn from_registry(registry: Registry, mode: ConcurrencyMode) -> Self {
        Self {
            inner: Arc::new(Mutex::new(registry)),
            mode,
        }
    }

    /// Concurrency mode in force.
    #[must_use]
    pub fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    /// Run `f` with exclusive access, for inspection between operations.
    pub async fn with<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        let registry = self.inner.lock().await;
        f(&registry)
    }

    /// Current contents.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.with(audit::snapshot).await
    }

    /// Current divergences.
    pub async fn audit(&self) -> Vec<Divergence> {
        self.with(audit::audit).await
    }

    /// Give other callers a turn between two steps of one operation.
    async fn interleave(&self) {
        tokio::task::yield_now().await;
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// See [`Registry::create_engine`].
    pub async fn create_engine<M>(&self, mem: &M, name: UserPtr) -> RegistryResult<RecordId>
    where
        M: UserMemory + ?Sized,
    {
        if self.mode == ConcurrencyMode::Serialized {
            return self.inner.lock().await.create_engine(mem, name);
        }

        let index = {
            let mut registry = self.inner.lock().await;
            registry.reclaim_orphans();
            registry.reserve_engine_slot()?
        };
        self.interleave().await;
        self.inner.lock().await.install_engine(index, mem, name)
    }

    /// See [`Registry::create_compartment`].
    pub async fn create_compartment<M>(
        &self,
        mem: &M,
        desc: UserPtr,
        engine_id: RecordId,
    ) -> RegistryResult<RecordId>
    where
        M: UserMemory + ?Sized,
    {
        if self.mode == ConcurrencyMode::Serialized {
            return self
                .inner
                .lock()
                .await
                .create_compartment(mem, desc, engine_id);
        }

        let (target, index) = {
            let registry = self.inner.lock().await;
            let target = registry.locate_link_target(engine_id)?;
            (target, registry.reserve_compartment_slot()?)
        };
        self.interleave().await;
        self.inner
            .lock()
            .await
            .install_compartment(index, target, mem, desc)
    }

    /// See [`Registry::delete_compartment`].
    pub async fn delete_compartment(&self, id: RecordId) -> RegistryResult<()> {
        if self.mode == ConcurrencyMode::Serialized {
            return self.inner.lock().await.delete_compartment(id);
        }

        let (index, engine) = self.inner.lock().await.locate_compartment(id)?;
        self.interleave().await;
        self.inner.lock().await.unlink_compartment(index, engine);
        Ok(())
    }

    /// See [`Registry::show_log`].
    pub async fn show_log<M>(&self, mem: &mut M, id: RecordId, out: UserPtr) -> RegistryResult<()>
    where
        M: UserMemory + ?Sized,
    {
        if self.mode == ConcurrencyMode::Serialized {
            return self.inner.lock().await.show_log(mem, id, out);
        }

        let (_, engine) = self.inner.lock().await.locate_compartment(id)?;
        self.interleave().await;
        self.inner.lock().await.read_engine_log(engine, mem, out)
    }

    /// See [`Registry::update_log`].
    pub async fn update_log<M>(&self, mem: &M, id: RecordId, src: UserPtr) -> RegistryResult<()>
    where
        M: UserMemory + ?Sized,
    {
        if self.mode == ConcurrencyMode::Serialized {
            return self.inner.lock().await.update_log(mem, id, src);
        }

        let (_, engine) = self.inner.lock().await.locate_compartment(id)?;
        self.interleave().await;
        self.inner.lock().await.write_engine_log(engine, mem, src)
    }
}
